// src/dispatch.rs

//! Event dispatch loop
//!
//! Feeds tag events to the orchestrator one at a time and drives the retry
//! pass: after every event, on every idle tick and once (forced) when the
//! feed ends.

use crate::error::{Error, Result};
use crate::events::{EventFilter, FeedItem, LineFeed};
use crate::signing::{RetrySummary, SigningOrchestrator, SigningTask};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters for one dispatcher run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Feed lines received
    pub lines: usize,
    /// Lines that produced a signing task
    pub tasks: usize,
    /// Lines for other topics or unwatched tags
    pub ignored: usize,
    /// Lines that could not be parsed
    pub malformed: usize,
    /// Builds that ended fully signed, first attempt or retry
    pub converged: usize,
    /// Retry passes that actually ran
    pub retry_passes: usize,
}

/// Single-threaded event loop around a [`SigningOrchestrator`]
pub struct Dispatcher {
    orchestrator: SigningOrchestrator,
    filter: EventFilter,
    idle_tick: Duration,
}

impl Dispatcher {
    pub fn new(orchestrator: SigningOrchestrator, filter: EventFilter, idle_tick: Duration) -> Self {
        Self {
            orchestrator,
            filter,
            idle_tick,
        }
    }

    pub fn orchestrator(&self) -> &SigningOrchestrator {
        &self.orchestrator
    }

    pub fn into_orchestrator(self) -> SigningOrchestrator {
        self.orchestrator
    }

    /// Consume `feed` until it closes
    ///
    /// Returns `Err` only for errors that make further signing pointless
    /// (see [`Error::is_fatal`]).
    pub fn run(&mut self, feed: &LineFeed) -> Result<DispatchStats> {
        let mut stats = DispatchStats::default();
        info!("Listening for {} events", self.filter.topic());

        loop {
            match feed.next(self.idle_tick) {
                FeedItem::Line(line) => {
                    stats.lines += 1;
                    self.handle_line(&line, &mut stats)?;
                    self.retry(false, &mut stats)?;
                }
                FeedItem::Idle => {
                    debug!("No events for {}s", self.idle_tick.as_secs());
                    self.retry(false, &mut stats)?;
                }
                FeedItem::Closed => {
                    info!("Event feed closed, final retry pass");
                    self.retry(true, &mut stats)?;
                    break;
                }
            }
        }

        let remaining = self.orchestrator.incomplete_len();
        if remaining > 0 {
            warn!("{} builds still incomplete at exit", remaining);
        }
        info!(
            "Processed {} messages: {} tasks, {} ignored, {} malformed, {} converged",
            stats.lines, stats.tasks, stats.ignored, stats.malformed, stats.converged
        );

        Ok(stats)
    }

    fn handle_line(&mut self, line: &str, stats: &mut DispatchStats) -> Result<()> {
        match self.filter.extract_line(line, self.orchestrator.now()) {
            Ok(Some(task)) => {
                stats.tasks += 1;
                self.sign(task, stats)
            }
            Ok(None) => {
                stats.ignored += 1;
                Ok(())
            }
            Err(e) => {
                stats.malformed += 1;
                warn!("Skipping message: {}", e);
                Ok(())
            }
        }
    }

    fn sign(&mut self, task: SigningTask, stats: &mut DispatchStats) -> Result<()> {
        let label = task.to_string();
        match self.orchestrator.sign(task) {
            Ok(true) => {
                stats.converged += 1;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => survive(e, &label),
        }
    }

    fn retry(&mut self, force: bool, stats: &mut DispatchStats) -> Result<()> {
        match self.orchestrator.retry(force) {
            Ok(RetrySummary { ran, converged, .. }) => {
                if ran {
                    stats.retry_passes += 1;
                }
                stats.converged += converged;
                Ok(())
            }
            Err(e) => survive(e, "retry pass"),
        }
    }
}

/// Propagate fatal errors, log the rest
fn survive(e: Error, context: &str) -> Result<()> {
    if e.is_fatal() {
        error!("{}: {}", context, e);
        return Err(e);
    }
    error!("{} failed: {}", context, e);
    Ok(())
}
