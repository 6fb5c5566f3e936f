// src/signing/orchestrator.rs

//! Signing orchestrator
//!
//! Routes tasks to one [`SingleKeySigner`] per (instance, key) pair, keeps
//! the builds that did not converge in a FIFO and re-attempts them on a
//! rate-limited, two-tier backoff schedule.
//!
//! The incomplete queue lives in memory only; a restart forgets it.

use super::clock::Clock;
use super::signer::SingleKeySigner;
use super::task::{SignerKey, SigningTask, TaskState};
use crate::credentials::{Passphrase, Passphrases};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builds the signer for an (instance, key) pair on first use
pub trait SignerFactory {
    fn create(&self, identity: &SignerKey, passphrase: &Passphrase) -> Result<SingleKeySigner>;
}

/// Retry cadence and backoff tiers
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Minimum time between two non-forced retry passes
    pub interval: Duration,
    /// Wait before re-attempting a task while the queue is short
    pub backoff_short: Duration,
    /// Wait before re-attempting a task once the queue is long
    pub backoff_long: Duration,
    /// Queue length at which the long wait applies
    pub backoff_threshold: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            backoff_short: Duration::from_secs(300),
            backoff_long: Duration::from_secs(1800),
            backoff_threshold: 10,
        }
    }
}

impl RetryPolicy {
    /// How long a task must wait given the current queue length
    pub fn window(&self, queue_len: usize) -> Duration {
        if queue_len < self.backoff_threshold {
            self.backoff_short
        } else {
            self.backoff_long
        }
    }
}

/// Counters from one retry pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySummary {
    /// False when the pass was skipped by the rate limit
    pub ran: bool,
    pub attempted: usize,
    pub converged: usize,
    /// Tasks not yet due, left untouched
    pub deferred: usize,
    /// Queue length after the pass
    pub remaining: usize,
}

/// Top-level signing state
pub struct SigningOrchestrator {
    factory: Box<dyn SignerFactory>,
    passphrases: Passphrases,
    signers: HashMap<SignerKey, SingleKeySigner>,
    incomplete: VecDeque<SigningTask>,
    last_retry_attempt: Option<DateTime<Utc>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl SigningOrchestrator {
    pub fn new(
        factory: Box<dyn SignerFactory>,
        passphrases: Passphrases,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory,
            passphrases,
            signers: HashMap::new(),
            incomplete: VecDeque::new(),
            last_retry_attempt: None,
            policy,
            clock,
        }
    }

    /// Current time according to the orchestrator's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Tasks waiting for a retry, oldest first
    pub fn incomplete(&self) -> impl Iterator<Item = &SigningTask> {
        self.incomplete.iter()
    }

    pub fn incomplete_len(&self) -> usize {
        self.incomplete.len()
    }

    pub fn has_signer(&self, identity: &SignerKey) -> bool {
        self.signers.contains_key(identity)
    }

    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    pub fn last_retry_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_retry_attempt
    }

    /// Sign one build; returns true once it is fully signed
    ///
    /// Builds left with unsigned RPMs are queued for [`retry`](Self::retry),
    /// as are builds whose attempt hit a non-fatal error. Builds that cannot
    /// be signed at all (unknown key passphrase, no usable signer, missing
    /// build, no RPMs) are dropped and return false. Only errors that
    /// [`Error::is_fatal`] are returned.
    pub fn sign(&mut self, mut task: SigningTask) -> Result<bool> {
        let Some(passphrase) = self.passphrases.get(task.key()) else {
            task.state = TaskState::MissingCredential;
            error!(
                "CRITICAL: no passphrase for key {}, dropping {}",
                task.key(),
                task
            );
            return Ok(false);
        };

        let signer = match self.signers.entry(task.signer_key()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                info!("Creating signer for {}", entry.key());
                match self.factory.create(entry.key(), passphrase) {
                    Ok(signer) => entry.insert(signer),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        task.state = TaskState::Failed;
                        error!("No signer for {}, dropping {}: {}", entry.key(), task, e);
                        return Ok(false);
                    }
                }
            }
        };

        let report = match signer.sign(&mut task) {
            Ok(report) => report,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Signing {} failed: {}", task, e);
                self.requeue(task);
                return Ok(false);
            }
        };

        if report.outcome.is_terminal_failure() {
            task.state = TaskState::Failed;
            error!("Giving up on {}: {}", task, report.outcome);
            return Ok(false);
        }

        if task.is_fully_signed() {
            task.state = TaskState::Converged;
            info!("{} is fully signed", task);
            return Ok(true);
        }

        warn!(
            "{} incomplete ({}): {} rpms unsigned, attempt {}",
            task,
            report.outcome,
            task.unsigned_remainder.len(),
            task.error_count + 1
        );
        self.requeue(task);
        Ok(false)
    }

    /// Count a failed attempt and put `task` at the back of the queue
    fn requeue(&mut self, mut task: SigningTask) {
        task.error_count += 1;
        task.last_attempt = Some(self.clock.now());
        task.state = TaskState::Incomplete;
        self.incomplete.push_back(task);
    }

    /// Re-attempt queued builds that have waited long enough
    ///
    /// Without `force` the pass is skipped if the previous one ran less than
    /// `policy.interval` ago, and each task must have waited the backoff
    /// window. With `force` every queued task is attempted. A fatal error
    /// ends the pass early with the remaining tasks still queued.
    pub fn retry(&mut self, force: bool) -> Result<RetrySummary> {
        let now = self.clock.now();

        if !force
            && let Some(last) = self.last_retry_attempt
            && elapsed(last, now) < self.policy.interval
        {
            return Ok(RetrySummary {
                remaining: self.incomplete.len(),
                ..Default::default()
            });
        }

        let window = self.policy.window(self.incomplete.len());
        let mut pending = std::mem::take(&mut self.incomplete);
        let mut summary = RetrySummary {
            ran: true,
            ..Default::default()
        };

        if !pending.is_empty() {
            info!(
                "Retrying {} incomplete builds (window {}s{})",
                pending.len(),
                window.as_secs(),
                if force { ", forced" } else { "" }
            );
        }

        while let Some(task) = pending.pop_front() {
            let waited = task.waited(now).to_std().unwrap_or(Duration::ZERO);
            if !force && waited < window {
                debug!("{} not due yet", task);
                summary.deferred += 1;
                self.incomplete.push_back(task);
                continue;
            }

            summary.attempted += 1;
            let in_flight = task.clone();
            match self.sign(task) {
                Ok(true) => summary.converged += 1,
                Ok(false) => {}
                Err(e) => {
                    // Put everything back, in order, for the next pass
                    self.incomplete.push_back(in_flight);
                    self.incomplete.extend(pending);
                    self.last_retry_attempt = Some(self.clock.now());
                    return Err(e);
                }
            }
        }

        self.last_retry_attempt = Some(self.clock.now());
        summary.remaining = self.incomplete.len();
        Ok(summary)
    }
}

/// Non-negative time between two instants
fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
