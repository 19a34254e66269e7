//! Turn orchestration.
//!
//! The [`Orchestrator`] turns one inbound chat message into one streamed
//! answer: it posts a placeholder, pipes the reasoner's fragments through an
//! [`OutputAggregator`] bound to that placeholder, and always finishes with a
//! final flush. `serve` runs the dispatch loop for a whole channel, one task
//! per turn.

use ragbot_config::StreamConfig;
use ragbot_core::channel::{Channel, ChannelMessage};
use ragbot_core::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::{AggregatorSettings, MessageRenderer, OutputAggregator};
use crate::streaming::Reasoner;

pub const DEFAULT_GREETING: &str = "👋 Hi! I answer questions using the knowledge base. \
Ask me anything.";

/// Per-turn presentation settings.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub aggregator: AggregatorSettings,
    pub placeholder: String,
    /// Upper bound for the final edit of a cancelled turn.
    pub final_flush_timeout: Duration,
    pub greeting: String,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

impl TurnSettings {
    pub fn from_config(config: &StreamConfig) -> Self {
        let defaults = AggregatorSettings::default();
        Self {
            aggregator: AggregatorSettings {
                interval: Duration::try_from_secs_f64(config.edit_interval_secs)
                    .unwrap_or(defaults.interval),
                min_chars_delta: config.min_chars_delta,
                prefix: String::new(),
            },
            placeholder: config.placeholder_text.clone(),
            final_flush_timeout: Duration::try_from_secs_f64(config.final_flush_timeout_secs)
                .unwrap_or(Duration::from_secs(2)),
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    /// The answer stream or the final render failed.
    Failed(String),
    Cancelled,
}

/// Summary of one finished turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: String,
    /// Text the user was last shown.
    pub text: String,
    pub fragments: usize,
    pub renders: usize,
    pub status: TurnStatus,
}

/// Drives turns between a [`Channel`] and a [`Reasoner`].
pub struct Orchestrator {
    reasoner: Arc<dyn Reasoner>,
    channel: Arc<dyn Channel>,
    settings: TurnSettings,
}

impl Orchestrator {
    pub fn new(reasoner: Arc<dyn Reasoner>, channel: Arc<dyn Channel>, settings: TurnSettings) -> Self {
        Self {
            reasoner,
            channel,
            settings,
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Answer `query` in `chat_id`.
    ///
    /// Fails only when the placeholder cannot be posted; everything after
    /// that is reported through [`TurnOutcome::status`].
    pub async fn run_turn(
        &self,
        chat_id: &str,
        query: &str,
        reply_to: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        let turn_id = Uuid::new_v4().to_string();
        let handle = self
            .channel
            .send(chat_id, &self.settings.placeholder, reply_to)
            .await?;
        if let Err(e) = self.channel.send_typing(chat_id).await {
            debug!(chat_id = %chat_id, error = %e, "Typing indicator failed");
        }

        let renderer = MessageRenderer::new(self.channel.clone(), handle);
        let mut aggregator = OutputAggregator::new(renderer, self.settings.aggregator.clone());
        let mut fragments_rx = self.reasoner.stream_answer(query);
        let mut fragments = 0usize;

        let mut status = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break TurnStatus::Cancelled,
                next = fragments_rx.recv() => match next {
                    Some(Ok(fragment)) => {
                        fragments += 1;
                        if let Err(e) = aggregator.feed(&fragment).await {
                            warn!(turn_id = %turn_id, error = %e, "Intermediate render failed");
                        }
                    }
                    Some(Err(e)) => {
                        error!(turn_id = %turn_id, error = %e, "Answer stream failed");
                        let notice = if aggregator.pending_text().is_empty() {
                            format!("❌ Error: {e}")
                        } else {
                            format!("\n\n❌ Error: {e}")
                        };
                        if let Err(render_err) = aggregator.feed(&notice).await {
                            warn!(turn_id = %turn_id, error = %render_err, "Error notice render failed");
                        }
                        break TurnStatus::Failed(e.to_string());
                    }
                    None => break TurnStatus::Completed,
                },
            }
        };
        drop(fragments_rx);

        if status == TurnStatus::Completed && fragments == 0 {
            warn!(turn_id = %turn_id, "Answer stream ended without any text");
        }

        let flushed = if status == TurnStatus::Cancelled {
            match tokio::time::timeout(self.settings.final_flush_timeout, aggregator.flush(true)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(turn_id = %turn_id, "Final flush of cancelled turn timed out, skipped");
                    Ok(())
                }
            }
        } else {
            aggregator.flush(true).await
        };
        if let Err(e) = flushed {
            error!(turn_id = %turn_id, error = %e, "Final render failed");
            if status == TurnStatus::Completed {
                status = TurnStatus::Failed(e.to_string());
            }
        }

        Ok(TurnOutcome {
            turn_id,
            text: aggregator.current_text().to_string(),
            fragments,
            renders: aggregator.renders(),
            status,
        })
    }

    /// Handle one inbound message; `None` when no turn ran.
    pub async fn dispatch(&self, msg: ChannelMessage, cancel: CancellationToken) -> Option<TurnOutcome> {
        let text = msg.content.trim();
        if text.is_empty() {
            debug!(chat_id = %msg.chat_id, "Ignoring empty message");
            return None;
        }
        if !self.channel.is_allowed(&msg.sender_id) {
            warn!(
                channel = %self.channel.name(),
                sender_id = %msg.sender_id,
                "Message from unauthorized sender ignored"
            );
            return None;
        }
        if is_start_command(text) {
            if let Err(e) = self
                .channel
                .send(&msg.chat_id, &self.settings.greeting, None)
                .await
            {
                warn!(chat_id = %msg.chat_id, error = %e, "Greeting failed");
            }
            return None;
        }

        info!(chat_id = %msg.chat_id, sender_id = %msg.sender_id, len = text.len(), "Query received");
        match self
            .run_turn(&msg.chat_id, text, msg.message_id.as_deref(), &cancel)
            .await
        {
            Ok(outcome) => {
                info!(
                    turn_id = %outcome.turn_id,
                    chat_id = %msg.chat_id,
                    fragments = outcome.fragments,
                    renders = outcome.renders,
                    status = ?outcome.status,
                    "Turn finished"
                );
                Some(outcome)
            }
            Err(e) => {
                error!(chat_id = %msg.chat_id, error = %e, "Turn could not start");
                None
            }
        }
    }

    /// Run the dispatch loop until the channel closes or `shutdown` fires.
    ///
    /// Each message is handled in its own task. On shutdown, in-flight turns
    /// are cancelled and awaited.
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), Error> {
        let mut inbound = self.channel.start().await?;
        let mut turns = JoinSet::new();
        info!(channel = %self.channel.name(), "Dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting messages");
                    break;
                }
                next = inbound.recv() => match next {
                    Some(Ok(msg)) => {
                        let this = self.clone();
                        let cancel = shutdown.child_token();
                        turns.spawn(async move { this.dispatch(msg, cancel).await });
                    }
                    Some(Err(e)) => warn!(channel = %self.channel.name(), error = %e, "Channel error"),
                    None => {
                        info!(channel = %self.channel.name(), "Channel closed");
                        break;
                    }
                },
            }
            while turns.try_join_next().is_some() {}
        }

        while let Some(joined) = turns.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Turn task panicked");
            }
        }
        if let Err(e) = self.channel.stop().await {
            warn!(error = %e, "Channel stop failed");
        }
        Ok(())
    }
}

/// `/start`, optionally addressed as `/start@botname` or with a payload.
fn is_start_command(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .and_then(|cmd| cmd.split('@').next())
        == Some("/start")
}
