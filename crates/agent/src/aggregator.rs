//! Coalesces a fast stream of text fragments into occasional message edits.
//!
//! Each render carries the full text accumulated so far, never a delta, so
//! repeating a render is harmless. A render happens when either the edit
//! interval has elapsed since the last one or enough characters are
//! buffered; `flush(true)` at the end of a turn renders whatever is left.

use async_trait::async_trait;
use ragbot_core::channel::{Channel, MessageHandle};
use ragbot_core::error::RenderError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Displays the full current text somewhere.
#[async_trait]
pub trait Renderer: Send {
    /// Replace the displayed text with `text`.
    ///
    /// [`RenderError::Unchanged`] means the target already shows `text`.
    async fn render(&mut self, text: &str) -> Result<(), RenderError>;
}

/// Renders by editing one previously sent chat message.
pub struct MessageRenderer {
    channel: Arc<dyn Channel>,
    handle: MessageHandle,
}

impl MessageRenderer {
    pub fn new(channel: Arc<dyn Channel>, handle: MessageHandle) -> Self {
        Self { channel, handle }
    }

    pub fn handle(&self) -> &MessageHandle {
        &self.handle
    }
}

#[async_trait]
impl Renderer for MessageRenderer {
    async fn render(&mut self, text: &str) -> Result<(), RenderError> {
        self.channel
            .edit(&self.handle, text)
            .await
            .map_err(RenderError::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Nothing buffered beyond the last render.
    Idle,
    /// Fragments buffered, not yet rendered.
    Buffering,
    /// Final flush done; further input is ignored.
    Flushed,
}

/// Thresholds that trigger a render.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub interval: Duration,
    pub min_chars_delta: usize,
    /// Text prepended to every render.
    pub prefix: String,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(400),
            min_chars_delta: 48,
            prefix: String::new(),
        }
    }
}

/// Per-turn fragment buffer in front of a [`Renderer`].
///
/// Driven by a single producer; `&mut self` on every operation enforces it.
pub struct OutputAggregator<R> {
    renderer: R,
    settings: AggregatorSettings,
    pending: Vec<String>,
    pending_chars: usize,
    /// Fragments already merged into the last render candidate.
    rendered: String,
    last_emitted: String,
    last_emit: Instant,
    dirty: bool,
    state: AggregatorState,
    renders: usize,
}

impl<R: Renderer> OutputAggregator<R> {
    pub fn new(renderer: R, settings: AggregatorSettings) -> Self {
        Self {
            renderer,
            settings,
            pending: Vec::new(),
            pending_chars: 0,
            rendered: String::new(),
            last_emitted: String::new(),
            last_emit: Instant::now(),
            dirty: false,
            state: AggregatorState::Idle,
            renders: 0,
        }
    }

    /// Buffer a fragment, rendering if a threshold is crossed.
    ///
    /// Empty fragments are ignored. A failed render leaves the text buffered
    /// for the next attempt.
    pub async fn feed(&mut self, fragment: &str) -> Result<(), RenderError> {
        if fragment.is_empty() {
            return Ok(());
        }
        if self.state == AggregatorState::Flushed {
            debug!(len = fragment.len(), "Fragment after final flush ignored");
            return Ok(());
        }

        self.pending_chars += fragment.chars().count();
        self.pending.push(fragment.to_string());
        self.dirty = true;
        self.state = AggregatorState::Buffering;

        if self.last_emit.elapsed() >= self.settings.interval
            || self.pending_chars >= self.settings.min_chars_delta
        {
            self.emit().await?;
        }
        Ok(())
    }

    /// Render buffered text regardless of thresholds.
    ///
    /// With `final_flush` the aggregator becomes [`AggregatorState::Flushed`]
    /// once the render succeeds. A no-op when nothing changed.
    pub async fn flush(&mut self, final_flush: bool) -> Result<(), RenderError> {
        if self.state == AggregatorState::Flushed {
            return Ok(());
        }
        self.emit().await?;
        if final_flush {
            self.state = AggregatorState::Flushed;
        }
        Ok(())
    }

    /// The text most recently shown by the renderer.
    pub fn current_text(&self) -> &str {
        &self.last_emitted
    }

    /// The text the next flush would render.
    pub fn pending_text(&self) -> String {
        let mut text = format!("{}{}", self.settings.prefix, self.rendered);
        for fragment in &self.pending {
            text.push_str(fragment);
        }
        text
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of successful render calls.
    pub fn renders(&self) -> usize {
        self.renders
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    async fn emit(&mut self) -> Result<(), RenderError> {
        if !self.dirty {
            return Ok(());
        }

        for fragment in self.pending.drain(..) {
            self.rendered.push_str(&fragment);
        }
        self.pending_chars = 0;

        let candidate = format!("{}{}", self.settings.prefix, self.rendered);
        if candidate == self.last_emitted {
            trace!("Render skipped, text unchanged");
            self.mark_clean();
            return Ok(());
        }

        match self.renderer.render(&candidate).await {
            Ok(()) => self.renders += 1,
            Err(RenderError::Unchanged) => debug!("Renderer reported unchanged content"),
            Err(e) => return Err(e),
        }

        self.last_emitted = candidate;
        self.last_emit = Instant::now();
        self.mark_clean();
        Ok(())
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
        if self.state == AggregatorState::Buffering {
            self.state = AggregatorState::Idle;
        }
    }
}
