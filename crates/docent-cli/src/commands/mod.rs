//! Slash commands for interactive mode

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the agent)
    Message(String),
    /// Show the current thread and whether it waits for input
    ShowThread,
    /// List threads held by the checkpoint store
    ListThreads,
    /// Start over on a fresh thread
    NewThread,
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary input.
pub fn parse_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let command = input.strip_prefix('/')?;
    let command = command
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),
        "thread" | "t" => CommandResult::ShowThread,
        "threads" => CommandResult::ListThreads,
        "new" | "n" => CommandResult::NewThread,
        "quit" | "exit" | "q" => CommandResult::Exit,
        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /thread, /t          Show the current conversation thread
  /threads             List saved conversation threads
  /new, /n             Start a new conversation
  /quit, /exit, /q     Exit

Ask about museums (opening hours, locations, contacts) or book tickets.
When asked a follow-up question during a booking, just type the answer."#
        .to_string()
}
