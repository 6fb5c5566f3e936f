// src/sigul/mod.rs

//! Signing daemon access
//!
//! The signing core drives the signer only through [`SigningBackend`].
//! [`SigulBackend`] runs the `sigul` client as a subprocess, feeding the
//! passphrase on stdin and killing it when the deadline passes.

mod command;

pub use command::{SigulBackend, SigulConfig};

use crate::credentials::Passphrase;
use crate::error::Result;
use crate::signing::RpmId;
use std::time::Duration;

/// How one signing batch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The signer exited successfully
    Success,
    /// The deadline passed and the signer was killed
    TimedOut,
    /// The signer exited with an error
    Failed(String),
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Runs signing batches for one (instance, key) pair
pub trait SigningBackend {
    /// Sign `rpms`, giving up after `timeout`
    ///
    /// `Err` is reserved for "the signer cannot be run at all"; timeouts and
    /// non-zero exits are reported through [`BatchOutcome`].
    fn sign_batch(&self, rpms: &[RpmId], passphrase: &Passphrase, timeout: Duration) -> Result<BatchOutcome>;

    /// Check that `passphrase` unlocks the key
    fn validate(&self, passphrase: &Passphrase) -> Result<bool>;
}

/// Deadline for a batch of `count` RPMs: base + per-RPM, capped
pub fn batch_timeout(count: usize, base: Duration, per_rpm: Duration, cap: Duration) -> Duration {
    let per_rpm_total = per_rpm.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX));
    base.saturating_add(per_rpm_total).min(cap)
}
