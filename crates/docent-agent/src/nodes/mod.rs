//! The nodes of the conversation graph

mod booking;
mod detect_intent;
mod human_input;
mod museum_info;
mod router;

pub use booking::{BookingAnswer, BookingNode};
pub use detect_intent::{DetectIntentNode, apply_intent};
pub use human_input::HumanInputNode;
pub use museum_info::MuseumInfoNode;
pub use router::route;

use docent_ai::{Content, Message};

/// Keep only the text of a model reply; tool exchanges stay out of the transcript.
fn text_only(reply: Message, fallback: &str) -> Message {
    match reply {
        Message::Assistant { content, metadata } => {
            let text: String = content.iter().filter_map(|c| c.as_text()).collect();
            let text = if text.trim().is_empty() {
                fallback.to_string()
            } else {
                text
            };
            Message::Assistant {
                content: vec![Content::text(text)],
                metadata,
            }
        }
        _ => Message::assistant(fallback),
    }
}
