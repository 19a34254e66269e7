//! Chat channel implementations for ragbot.
//!
//! Each channel delivers user queries to the orchestrator and displays the
//! streamed answer by sending one message and editing it in place.
//!
//! Available channels:
//! - **Telegram** — Bot API over HTTPS (long polling, send, edit)
//! - **Console** — interactive terminal chat (stdin/stdout)

pub mod console;
pub mod telegram;

pub use console::ConsoleChannel;
pub use telegram::{TelegramChannel, TelegramConfig};
