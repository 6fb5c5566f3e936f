// src/signing/signer.rs

//! Single-key convergence loop
//!
//! A [`SingleKeySigner`] signs builds with one key on one instance. For each
//! build it keeps asking the hub what is still unsigned and hands that to the
//! signer until either nothing is left or a round makes no progress. Signed
//! copies are written out afterwards for everything that ended up signed.

use super::task::{RpmId, SignerKey, SigningTask};
use crate::credentials::Passphrase;
use crate::error::{Error, Result};
use crate::keys::KeyInfo;
use crate::koji::{BuildRepository, WriteError};
use crate::sigul::{BatchOutcome, SigningBackend, batch_timeout};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default maximum RPMs per sigul invocation
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Tunables for the convergence loop
#[derive(Debug, Clone)]
pub struct SignerSettings {
    /// Maximum RPMs handed to the signer at once
    pub batch_size: usize,
    /// Fixed part of the batch deadline
    pub timeout_base: Duration,
    /// Added to the deadline for every RPM in the batch
    pub timeout_per_rpm: Duration,
    /// Upper bound for the batch deadline
    pub timeout_cap: Duration,
    /// Write signed copies once the loop ends
    pub write_signed_copies: bool,
}

impl Default for SignerSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_base: Duration::from_secs(60),
            timeout_per_rpm: Duration::from_secs(1),
            timeout_cap: Duration::from_secs(300),
            write_signed_copies: true,
        }
    }
}

impl SignerSettings {
    /// Deadline for a batch of `count` RPMs
    pub fn timeout_for(&self, count: usize) -> Duration {
        batch_timeout(count, self.timeout_base, self.timeout_per_rpm, self.timeout_cap)
    }
}

/// Why a signing attempt stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutcome {
    /// Nothing is left unsigned
    Converged,
    /// The unsigned set did not change between two rounds
    Stalled,
    /// The build exists but has no RPMs
    NoRpms,
    /// The hub does not know the build
    BuildNotFound,
}

impl SignOutcome {
    /// Outcomes that end the attempt before any signing
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::NoRpms | Self::BuildNotFound)
    }
}

impl fmt::Display for SignOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Converged => "converged",
            Self::Stalled => "stalled",
            Self::NoRpms => "no rpms",
            Self::BuildNotFound => "build not found",
        };
        f.write_str(s)
    }
}

/// What happened during one [`SingleKeySigner::sign`] call
#[derive(Debug, Clone)]
pub struct SignReport {
    pub outcome: SignOutcome,
    /// RPMs in the build
    pub total_rpms: usize,
    /// Rounds of "query unsigned" performed
    pub iterations: usize,
    /// sigul invocations
    pub batches: usize,
    /// Batches that hit their deadline
    pub timeouts: usize,
    /// Signed copies requested from the hub
    pub written: usize,
    /// Signed copies the hub failed to write
    pub write_errors: Vec<WriteError>,
}

impl SignReport {
    fn empty(outcome: SignOutcome) -> Self {
        Self {
            outcome,
            total_rpms: 0,
            iterations: 0,
            batches: 0,
            timeouts: 0,
            written: 0,
            write_errors: Vec::new(),
        }
    }
}

/// Signs builds with one key against one build-system instance
pub struct SingleKeySigner {
    identity: SignerKey,
    key: KeyInfo,
    passphrase: Passphrase,
    repository: Box<dyn BuildRepository>,
    backend: Box<dyn SigningBackend>,
    settings: SignerSettings,
}

impl SingleKeySigner {
    pub fn new(
        identity: SignerKey,
        key: KeyInfo,
        passphrase: Passphrase,
        repository: Box<dyn BuildRepository>,
        backend: Box<dyn SigningBackend>,
        settings: SignerSettings,
    ) -> Self {
        Self {
            identity,
            key,
            passphrase,
            repository,
            backend,
            settings,
        }
    }

    pub fn identity(&self) -> &SignerKey {
        &self.identity
    }

    pub fn key_info(&self) -> &KeyInfo {
        &self.key
    }

    pub fn settings(&self) -> &SignerSettings {
        &self.settings
    }

    pub fn repository(&self) -> &dyn BuildRepository {
        self.repository.as_ref()
    }

    /// Drive one build towards "fully signed"
    ///
    /// On return `task.unsigned_remainder` holds whatever is still unsigned.
    /// `Err` means the hub or the signer could not be used at all.
    pub fn sign(&mut self, task: &mut SigningTask) -> Result<SignReport> {
        if task.signer_key() != self.identity {
            return Err(Error::Config(format!(
                "{} routed to signer {}",
                task, self.identity
            )));
        }

        let all = match self.repository.list_rpms(task.build_id()) {
            Ok(rpms) if rpms.is_empty() => {
                error!("{}", Error::NoRpmsFound(task.build_id().to_string()));
                task.unsigned_remainder.clear();
                return Ok(SignReport::empty(SignOutcome::NoRpms));
            }
            Ok(rpms) => rpms,
            Err(e @ Error::BuildNotFound(_)) => {
                error!("Cannot sign {}: {}", task, e);
                task.unsigned_remainder.clear();
                return Ok(SignReport::empty(SignOutcome::BuildNotFound));
            }
            Err(e) => return Err(e),
        };

        info!("Signing {}: {} rpms", task, all.len());

        let mut report = SignReport::empty(SignOutcome::Converged);
        report.total_rpms = all.len();

        let mut previous: Option<BTreeSet<_>> = None;
        let remainder = loop {
            report.iterations += 1;
            let unsigned = self.repository.list_unsigned(&all, &self.key.id)?;

            if unsigned.is_empty() {
                report.outcome = SignOutcome::Converged;
                break unsigned;
            }

            if previous.as_ref() == Some(&unsigned) {
                error!(
                    "No progress signing {}: {} rpms still unsigned after round {}",
                    task,
                    unsigned.len(),
                    report.iterations - 1
                );
                report.outcome = SignOutcome::Stalled;
                break unsigned;
            }

            debug!(
                "Round {} for {}: {} of {} rpms unsigned",
                report.iterations,
                task,
                unsigned.len(),
                all.len()
            );
            self.submit(&unsigned, &mut report)?;
            previous = Some(unsigned);
        };

        if self.settings.write_signed_copies {
            let signed: BTreeSet<_> = all.difference(&remainder).cloned().collect();
            if !signed.is_empty() {
                report.written = signed.len();
                report.write_errors = self.repository.write_signed_copies(&signed, &self.key.id)?;
                for write_error in &report.write_errors {
                    error!("{}", write_error);
                }
            }
        }

        task.unsigned_remainder = remainder;

        info!(
            "Finished {}: {} after {} rounds, {} batches, {} unsigned, {} write errors",
            task,
            report.outcome,
            report.iterations,
            report.batches,
            task.unsigned_remainder.len(),
            report.write_errors.len()
        );

        Ok(report)
    }

    /// Hand the unsigned set to the signer in capped batches
    fn submit(&self, unsigned: &BTreeSet<RpmId>, report: &mut SignReport) -> Result<()> {
        let rpms: Vec<_> = unsigned.iter().cloned().collect();
        let batch_size = self.settings.batch_size.max(1);
        let batch_total = rpms.len().div_ceil(batch_size);

        for (index, batch) in rpms.chunks(batch_size).enumerate() {
            let timeout = self.settings.timeout_for(batch.len());
            info!(
                "Signing batch {}/{} with {} rpms using {} (timeout {}s)",
                index + 1,
                batch_total,
                batch.len(),
                self.identity,
                timeout.as_secs()
            );

            let start = Instant::now();
            let outcome = self.backend.sign_batch(batch, &self.passphrase, timeout)?;
            let elapsed = start.elapsed().as_secs_f64();
            let rate = elapsed / batch.len() as f64;
            report.batches += 1;

            match outcome {
                BatchOutcome::Success => {
                    info!("Signed {} rpms in {:.1}s ({:.2}s/rpm)", batch.len(), elapsed, rate);
                }
                BatchOutcome::TimedOut => {
                    report.timeouts += 1;
                    warn!(
                        "Signing {} rpms timed out after {:.1}s ({:.2}s/rpm), re-checking",
                        batch.len(),
                        elapsed,
                        rate
                    );
                }
                BatchOutcome::Failed(detail) => {
                    error!("Error signing {} rpms: {}", batch.len(), detail);
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SingleKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleKeySigner")
            .field("identity", &self.identity)
            .field("key", &self.key)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
