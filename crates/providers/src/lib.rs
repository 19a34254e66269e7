//! LLM provider implementations for ragbot.
//!
//! Providers implement the `ragbot_core::Provider` trait. The streaming
//! agent talks to any OpenAI-compatible chat completions endpoint.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
