//! docent - museum information and ticket booking assistant

mod commands;
mod config;
mod utils;

use anyhow::Context as _;
use clap::Parser;
use docent_agent::{
    Capabilities, Checkpointer, Engine, EngineConfig, LayeredSafety, LlmClassifier,
    LlmQuerySafety, ProviderTransport, ResumeHandle, RunConfig, StatementGuard, StepEvent,
    StepEventStream, ThreadId, Transport,
};
use docent_ai::{Model, providers::google::GoogleProvider};
use docent_db::{DbPool, SqliteCheckpointer, SqliteDataAccess};
use futures::StreamExt;
use std::io::{self, Write};
use std::sync::Arc;

use commands::CommandResult;
use config::{Config, DEFAULT_MODEL};

/// docent - museum information and ticket booking assistant
#[derive(Parser, Debug)]
#[command(name = "docent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gemini model to use (default: gemini-2.5-flash)
    #[arg(short, long)]
    model: Option<String>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<String>,

    /// Reattach to an existing conversation thread by id
    #[arg(short, long)]
    thread: Option<String>,

    /// Run a single utterance, answering follow-up questions on stdin
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Insert the demonstration museums before starting
    #[arg(long)]
    seed: bool,

    /// Maximum tool round-trips per lookup or booking step
    #[arg(long)]
    max_tool_rounds: Option<u32>,

    /// Rely on the built-in SQL guard only
    #[arg(long)]
    no_llm_safety: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::new("docent=debug,docent_agent=debug,docent_ai=debug,docent_db=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = Config::load();

    let provider = match GoogleProvider::from_env_or(config.api_keys.google.as_deref()) {
        Ok(provider) => provider,
        Err(_) => {
            eprintln!("Error: No API key found for Gemini");
            eprintln!();
            eprintln!("Set your API key with: export GOOGLE_API_KEY=your-key");
            eprintln!("Or add it to config file: docent --init-config");
            std::process::exit(1);
        }
    };

    let database = args
        .database
        .clone()
        .or_else(|| config.database.clone())
        .unwrap_or_else(|| Config::default_database_path().to_string_lossy().to_string());
    if let Some(dir) = std::path::Path::new(&database).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating database directory {}", dir.display()))?;
        }
    }
    let pool = docent_db::open(&database)
        .await
        .with_context(|| format!("opening database {}", database))?;

    if args.seed || config.seed.unwrap_or(false) {
        let added = docent_db::seed_museums(&pool).await?;
        if added > 0 {
            eprintln!("Seeded {} museums", added);
        }
    }

    let model_id = args
        .model
        .clone()
        .or_else(|| config.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let llm_safety = !args.no_llm_safety && config.llm_safety.unwrap_or(true);
    let max_tool_rounds = args.max_tool_rounds.or(config.max_tool_rounds);

    let transport: Arc<dyn Transport> = Arc::new(ProviderTransport::new(Arc::new(provider)));
    let engine = build_engine(
        transport,
        &model_id,
        pool.clone(),
        llm_safety,
        max_tool_rounds,
    )?;
    let checkpoints = SqliteCheckpointer::new(pool);

    let thread = match &args.thread {
        Some(id) => id
            .parse::<ThreadId>()
            .with_context(|| format!("invalid thread id {:?}", id))?,
        None => ThreadId::new(),
    };

    if let Some(command) = args.command {
        return run_command(&engine, thread, &command).await;
    }

    run_interactive(&engine, &checkpoints, thread, &model_id).await
}

/// Wire the graph to Gemini and the SQLite store.
fn build_engine(
    transport: Arc<dyn Transport>,
    model_id: &str,
    pool: DbPool,
    llm_safety: bool,
    max_tool_rounds: Option<u32>,
) -> anyhow::Result<Engine> {
    let mut engine_config = EngineConfig::new(Model::gemini(model_id));
    if let Some(rounds) = max_tool_rounds {
        engine_config.max_tool_rounds = rounds;
    }

    // Classification and safety verdicts should be deterministic
    let verdict_config = RunConfig {
        temperature: Some(0.0),
        ..RunConfig::new(Model::gemini(model_id))
    };

    let mut safety = LayeredSafety::new(StatementGuard::new());
    if llm_safety {
        safety = safety.with_second_opinion(Arc::new(LlmQuerySafety::new(
            transport.clone(),
            verdict_config.clone(),
        )?));
    }

    let capabilities = Capabilities {
        classifier: Arc::new(LlmClassifier::new(transport.clone(), verdict_config)?),
        safety: Arc::new(safety),
        data: Arc::new(SqliteDataAccess::new(pool.clone())),
        transport,
    };
    Ok(Engine::new(
        engine_config,
        capabilities,
        Arc::new(SqliteCheckpointer::new(pool)),
    )?)
}

/// Print a drive of the graph as it happens. Returns the resume handle when the
/// graph stopped to ask the user something.
async fn print_events(mut stream: StepEventStream) -> anyhow::Result<Option<ResumeHandle>> {
    while let Some(event) = stream.next().await {
        match event {
            StepEvent::AssistantMessage { message, .. } => {
                println!("{}\n", message.text());
            }
            StepEvent::ToolExecutionStart { tool_name, .. } => {
                eprintln!("[Running {}...]", tool_name);
            }
            StepEvent::ToolExecutionEnd {
                tool_name,
                result,
                is_error,
                ..
            } => {
                if is_error {
                    eprintln!("[{} failed: {}]", tool_name, utils::truncate_chars(&result, 200));
                } else {
                    tracing::debug!("{}: {}", tool_name, utils::truncate_chars(&result, 200));
                }
            }
            StepEvent::Interrupted { handle, .. } => return Ok(Some(handle)),
            StepEvent::TurnEnd { usage, .. } => {
                tracing::debug!("Tokens: {} in, {} out", usage.input, usage.output);
                return Ok(None);
            }
            StepEvent::Error { message, fatal } => {
                if fatal {
                    anyhow::bail!(message);
                }
                eprintln!("Error: {}", message);
                return Ok(None);
            }
            _ => {}
        }
    }
    Ok(None)
}

fn read_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

async fn run_command(engine: &Engine, thread: ThreadId, command: &str) -> anyhow::Result<()> {
    println!("docent> {}", command);
    println!();

    let mut pending = print_events(engine.send(thread, command).await?).await?;
    while let Some(handle) = pending {
        let Some(answer) = read_line("? ")? else {
            eprintln!("Conversation suspended; continue with --thread {}", thread);
            break;
        };
        pending = print_events(engine.resume_at(&handle, answer).await?).await?;
    }
    Ok(())
}

async fn run_interactive(
    engine: &Engine,
    checkpoints: &SqliteCheckpointer,
    mut thread: ThreadId,
    model_id: &str,
) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("docent ({}) thread: {}", model_id, utils::short_id(&thread));
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    // A reattached thread may be waiting on a question
    let mut pending = engine.pending(thread).await?.map(|interrupt| {
        println!("{}\n", interrupt.payload.message);
        ResumeHandle {
            thread_id: thread,
            token: interrupt.token,
        }
    });

    loop {
        let prompt = if pending.is_some() { "? " } else { "> " };
        let Some(input) = read_line(prompt)? else {
            break;
        };

        if let Some(result) = commands::parse_command(&input) {
            match result {
                CommandResult::Message(msg) => println!("{}\n", msg),
                CommandResult::ShowThread => {
                    let status = if pending.is_some() {
                        "waiting for your answer"
                    } else {
                        "idle"
                    };
                    println!("Thread {} ({})\n", thread, status);
                }
                CommandResult::ListThreads => {
                    for id in checkpoints.list().await? {
                        let marker = if id == thread { "*" } else { " " };
                        println!("{} {}", marker, id);
                    }
                    println!();
                }
                CommandResult::NewThread => {
                    thread = ThreadId::new();
                    pending = None;
                    println!("Started thread {}\n", utils::short_id(&thread));
                }
                CommandResult::Exit => break,
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}. Type /help for commands.\n", cmd);
                }
            }
            continue;
        }

        // An empty line is still an answer while a question is open
        let stream = match pending.take() {
            Some(handle) => engine.resume_at(&handle, input).await?,
            None if input.is_empty() => continue,
            None => engine.send(thread, &input).await?,
        };
        pending = print_events(stream).await?;
    }

    if pending.is_some() {
        eprintln!("Conversation suspended; continue with --thread {}", thread);
    }
    Ok(())
}
