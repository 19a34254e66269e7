//! # ragbot core
//!
//! Domain types, traits, and error definitions shared by every ragbot crate.
//! This crate has no framework dependencies: it defines the seams
//! (`Provider`, `Tool`, `Channel`) that the other crates implement.
//!
//! All other crates depend inward on this one, so swapping a chat surface
//! or an LLM backend never touches the retrieval or streaming code.

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use channel::{Channel, ChannelId, ChannelMessage, MessageHandle};
pub use tool::{Tool, ToolCall, ToolResult, ToolRegistry};
