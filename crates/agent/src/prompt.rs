//! System prompt loading.

use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
using the company knowledge base.\n\
Always call the request_to_rag tool to find documents relevant to the user's question \
before answering, and base your answer only on what it returns.\n\
If the documents do not contain the answer, say so plainly.\n\
Answer in the language of the question.\n\
At the end of the answer, list the sources you used.";

/// Read the system prompt from `path`, falling back to [`DEFAULT_SYSTEM_PROMPT`].
///
/// A missing, unreadable or blank file yields the default.
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };

    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            debug!(path = %path.display(), "Loaded system prompt");
            text.trim().to_string()
        }
        Ok(_) => {
            warn!(path = %path.display(), "System prompt file is empty, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read system prompt, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}
