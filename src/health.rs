// src/health.rs

//! Key health monitoring
//!
//! Periodically asks the signer to unlock each key and reports when a key
//! stops or resumes working. The first observation of a key only sets the
//! baseline.

use crate::credentials::Passphrase;
use crate::sigul::SigningBackend;
use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one key check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    Working,
    Failing(String),
}

impl KeyStatus {
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Working)
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working => f.write_str("working"),
            Self::Failing(reason) => write!(f, "not working: {}", reason),
        }
    }
}

/// A change of status between two checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTransition {
    pub key: String,
    pub from: KeyStatus,
    pub to: KeyStatus,
}

struct MonitoredKey {
    backend: Box<dyn SigningBackend>,
    passphrase: Passphrase,
    last: Option<KeyStatus>,
}

/// Tracks the health of a set of keys
#[derive(Default)]
pub struct KeyMonitor {
    keys: BTreeMap<String, MonitoredKey>,
}

impl KeyMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `key`, checking it through `backend`
    pub fn add(&mut self, key: impl Into<String>, backend: Box<dyn SigningBackend>, passphrase: Passphrase) {
        let key = key.into();
        debug!("Monitoring key {}", key);
        self.keys.insert(
            key,
            MonitoredKey {
                backend,
                passphrase,
                last: None,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Last known status of `key`
    pub fn status(&self, key: &str) -> Option<&KeyStatus> {
        self.keys.get(key).and_then(|k| k.last.as_ref())
    }

    /// Check every key once; returns the transitions observed
    pub fn check_once(&mut self) -> Vec<KeyTransition> {
        let mut transitions = Vec::new();

        for (name, key) in &mut self.keys {
            let status = match key.backend.validate(&key.passphrase) {
                Ok(true) => KeyStatus::Working,
                Ok(false) => KeyStatus::Failing("passphrase rejected".to_string()),
                Err(e) => KeyStatus::Failing(e.to_string()),
            };
            debug!("Key '{}' {}", name, status);

            if let Some(previous) = key.last.replace(status.clone())
                && previous != status
            {
                match status {
                    KeyStatus::Failing(ref reason) => {
                        error!("Sigul for key '{}' stopped working: {}", name, reason)
                    }
                    KeyStatus::Working => warn!("Sigul for key '{}' resumed working", name),
                }
                transitions.push(KeyTransition {
                    key: name.clone(),
                    from: previous,
                    to: status,
                });
            }
        }

        transitions
    }

    /// Check every `interval`; `rounds` of `None` runs forever
    pub fn run(&mut self, interval: Duration, rounds: Option<usize>) {
        info!(
            "Checking {} keys every {}s",
            self.keys.len(),
            interval.as_secs()
        );

        let mut done = 0;
        loop {
            self.check_once();
            done += 1;
            if rounds.is_some_and(|n| done >= n) {
                break;
            }
            thread::sleep(interval);
        }
    }
}
