/*!
 * Rate-limited progress reporting for relay transfers
 *
 * A [`ProgressReporter`] turns `(current, total)` byte counts into a rendered
 * status text and pushes it to a [`StatusSurface`] at most once per interval.
 * The completion update (`current == total`) always gets through.
 *
 * Both transfer stages drive a reporter through the [`ProgressSink`] trait.
 * Calls must be sequential per reporter; the upload stage relays worker-thread
 * progress over a channel so the reporter is only touched from one task.
 */

use crate::format::{format_bytes, format_duration, format_rate};
use async_trait::async_trait;
use console::Term;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Number of segments in the rendered progress bar
pub const BAR_WIDTH: usize = 20;

/// A status update the display refused or could not deliver.
///
/// Never a transfer failure; the reporter logs and drops it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("status update rejected: {0}")]
    Rejected(String),

    #[error("status surface unavailable: {0}")]
    Unavailable(String),
}

/// Where rendered progress text ends up (a chat message, a terminal line)
#[async_trait]
pub trait StatusSurface: Send + Sync {
    async fn update(&self, text: &str) -> Result<(), DisplayError>;
}

/// Receiver of raw progress counts from a transfer stage
#[async_trait]
pub trait ProgressSink: Send {
    async fn on_progress(&mut self, current: u64, total: u64);

    /// Called once when the transfer finished with `total` bytes moved
    async fn on_complete(&mut self, total: u64) {
        self.on_progress(total, total).await;
    }
}

/// Sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn on_progress(&mut self, _current: u64, _total: u64) {}
}

/// Surface that discards updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

#[async_trait]
impl StatusSurface for NullSurface {
    async fn update(&self, _text: &str) -> Result<(), DisplayError> {
        Ok(())
    }
}

/// Surface that emits each update as a tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSurface;

#[async_trait]
impl StatusSurface for LogSurface {
    async fn update(&self, text: &str) -> Result<(), DisplayError> {
        tracing::info!(status = %text.replace('\n', " | "), "relay progress");
        Ok(())
    }
}

/// Surface that redraws the status block in place on stderr
pub struct TerminalSurface {
    term: Term,
    drawn_lines: Mutex<usize>,
}

impl TerminalSurface {
    pub fn stderr() -> Self {
        Self {
            term: Term::stderr(),
            drawn_lines: Mutex::new(0),
        }
    }
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::stderr()
    }
}

#[async_trait]
impl StatusSurface for TerminalSurface {
    async fn update(&self, text: &str) -> Result<(), DisplayError> {
        let mut drawn = self
            .drawn_lines
            .lock()
            .map_err(|_| DisplayError::Unavailable("terminal lock poisoned".to_string()))?;

        let io_err = |e: std::io::Error| DisplayError::Unavailable(e.to_string());
        if self.term.is_term() && *drawn > 0 {
            self.term.clear_last_lines(*drawn).map_err(io_err)?;
        }
        for line in text.lines() {
            self.term.write_line(line).map_err(io_err)?;
        }
        *drawn = text.lines().count();
        Ok(())
    }
}

/// Emission gate state for one transfer direction
#[derive(Debug, Clone)]
pub struct ProgressState {
    start: Instant,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressState {
    pub fn new(interval: Duration) -> Self {
        Self {
            start: Instant::now(),
            last_emit: None,
            interval,
        }
    }

    /// Whether an update at `now` may be rendered
    pub fn should_emit(&self, now: Instant, current: u64, total: u64) -> bool {
        if current == total {
            return true;
        }
        match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark_emitted(&mut self, now: Instant) {
        self.last_emit = Some(now);
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }
}

/// Derived figures for one render
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    /// Bytes per second since the transfer started
    pub speed: f64,
    pub elapsed: Duration,
    pub eta: Duration,
}

impl ProgressSnapshot {
    pub fn compute(current: u64, total: u64, elapsed: Duration) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            current as f64 / total as f64 * 100.0
        };

        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 { current as f64 / secs } else { 0.0 };

        let eta = if speed > 0.0 {
            Duration::from_secs_f64(total.saturating_sub(current) as f64 / speed)
        } else {
            Duration::ZERO
        };

        Self {
            current,
            total,
            percentage,
            speed,
            elapsed,
            eta,
        }
    }

    /// Number of filled bar segments
    pub fn filled_segments(&self) -> usize {
        ((self.percentage / 5.0).floor() as usize).min(BAR_WIDTH)
    }

    /// Render the multi-line status text under `label`
    pub fn render(&self, label: &str) -> String {
        let filled = self.filled_segments();
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled));

        format!(
            "{label}\n[{bar}] {pct:.1}%\n{current} / {total} at {speed}\nElapsed: {elapsed} | ETA: {eta}",
            pct = self.percentage,
            current = format_bytes(self.current),
            total = format_bytes(self.total),
            speed = format_rate(self.speed),
            elapsed = format_duration(self.elapsed.as_secs()),
            eta = format_duration(self.eta.as_secs()),
        )
    }
}

/// Throttled progress renderer bound to a status surface
pub struct ProgressReporter {
    label: String,
    state: ProgressState,
    surface: Arc<dyn StatusSurface>,
    final_emitted: bool,
    last_counts: Option<(u64, u64)>,
    last_text: Option<String>,
    emitted: usize,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, interval: Duration, surface: Arc<dyn StatusSurface>) -> Self {
        Self {
            label: label.into(),
            state: ProgressState::new(interval),
            surface,
            final_emitted: false,
            last_counts: None,
            last_text: None,
            emitted: 0,
        }
    }

    /// Number of renders handed to the surface so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Whether [`finish`](Self::finish) has run
    pub fn is_finished(&self) -> bool {
        self.final_emitted
    }

    /// Gate, render and deliver one intermediate update.
    ///
    /// `current == total` skips the interval gate, but the same counts are
    /// never rendered twice in a row.
    pub async fn report(&mut self, current: u64, total: u64) {
        if self.final_emitted || (current == total && self.last_counts == Some((current, total))) {
            return;
        }

        let now = Instant::now();
        if !self.state.should_emit(now, current, total) {
            return;
        }
        self.emit(now, current, total).await;
    }

    /// Render the completed transfer with the bytes actually moved.
    ///
    /// Emits at most once, and not at all when the last render already
    /// showed `total / total`.
    pub async fn finish(&mut self, total: u64) {
        if self.final_emitted {
            return;
        }
        self.final_emitted = true;
        if self.last_counts == Some((total, total)) {
            return;
        }
        self.emit(Instant::now(), total, total).await;
    }

    async fn emit(&mut self, now: Instant, current: u64, total: u64) {
        let snapshot = ProgressSnapshot::compute(current, total, self.state.elapsed(now));
        let text = snapshot.render(&self.label);

        self.state.mark_emitted(now);
        self.last_counts = Some((current, total));

        if self.last_text.as_deref() == Some(text.as_str()) {
            return;
        }

        if let Err(e) = self.surface.update(&text).await {
            tracing::debug!(label = %self.label, error = %e, "status update dropped");
        }
        self.emitted += 1;
        self.last_text = Some(text);
    }
}

#[async_trait]
impl ProgressSink for ProgressReporter {
    async fn on_progress(&mut self, current: u64, total: u64) {
        self.report(current, total).await;
    }

    async fn on_complete(&mut self, total: u64) {
        self.finish(total).await;
    }
}
