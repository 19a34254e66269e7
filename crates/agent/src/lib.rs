//! Turn execution for ragbot.
//!
//! A turn flows through three pieces:
//!
//! 1. **[`StreamingAgent`]** asks the LLM, runs the knowledge base tool when
//!    the model calls it, and streams the answer as text fragments
//! 2. **[`OutputAggregator`]** coalesces those fragments into occasional
//!    full-text edits of one chat message
//! 3. **[`Orchestrator`]** wires a channel message to the two above and
//!    guarantees a final flush on every exit path

pub mod aggregator;
pub mod orchestrator;
pub mod prompt;
pub mod streaming;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use aggregator::{
    AggregatorSettings, AggregatorState, MessageRenderer, OutputAggregator, Renderer,
};
pub use orchestrator::{Orchestrator, TurnOutcome, TurnSettings, TurnStatus};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, load_system_prompt};
pub use streaming::{Reasoner, StreamingAgent};
