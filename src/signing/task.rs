// src/signing/task.rs

//! Signing task model
//!
//! A [`SigningTask`] names one build, the instance it lives on and the key to
//! sign it with. Identity fields are fixed at construction; the remainder and
//! attempt bookkeeping are updated by the signer and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Name of the primary build-system instance
pub const PRIMARY_INSTANCE: &str = "primary";

/// Key name suffix used for secondary-architecture instances
pub const SECONDARY_KEY_SUFFIX: &str = "-secondary";

/// Identifier of a build on the hub
///
/// Bus messages carry integer IDs, operators usually type NVRs. A string made
/// of digits only is treated as an ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum BuildId {
    Id(u64),
    Nvr(String),
}

impl<'de> Deserialize<'de> for BuildId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Id(id) => BuildId::Id(id),
            Raw::Text(text) => BuildId::from(text.as_str()),
        })
    }
}

impl FromStr for BuildId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
            && let Ok(id) = s.parse::<u64>()
        {
            return Ok(BuildId::Id(id));
        }
        Ok(BuildId::Nvr(s.to_string()))
    }
}

impl From<u64> for BuildId {
    fn from(id: u64) -> Self {
        BuildId::Id(id)
    }
}

impl From<&str> for BuildId {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(id) => id,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildId::Id(id) => write!(f, "{}", id),
            BuildId::Nvr(nvr) => f.write_str(nvr),
        }
    }
}

/// An RPM as the hub knows it
///
/// Ordered by file name so sets print in a stable, human-friendly order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RpmId {
    /// `name-version-release.arch.rpm`
    pub filename: String,
    /// Numeric RPM ID on the hub
    pub id: u64,
}

impl RpmId {
    pub fn new(id: u64, filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            id,
        }
    }

    /// Build the file name the way the hub and sigul refer to an RPM
    pub fn from_nvr_arch(id: u64, nvr: &str, arch: &str) -> Self {
        Self::new(id, format!("{}.{}.rpm", nvr, arch))
    }
}

impl fmt::Display for RpmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename)
    }
}

/// Lifecycle state of a signing task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Created from an event, never attempted
    New,
    /// Last attempt left unsigned RPMs; waiting in the retry queue
    Incomplete,
    /// Every RPM is signed; the task is dropped
    Converged,
    /// No passphrase for the key; dropped without retry
    MissingCredential,
    /// Build missing or empty on the hub; dropped without retry
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Incomplete => "incomplete",
            Self::Converged => "converged",
            Self::MissingCredential => "missing-credential",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of signing work: one build, one instance, one key
#[derive(Debug, Clone)]
pub struct SigningTask {
    build_id: BuildId,
    instance: String,
    key: String,
    created: DateTime<Utc>,

    /// RPMs still unsigned after the last attempt
    pub unsigned_remainder: BTreeSet<RpmId>,
    /// Attempts that ended with a non-empty remainder
    pub error_count: u32,
    /// When the last attempt finished
    pub last_attempt: Option<DateTime<Utc>>,
    /// Bus message that triggered this task, if any
    pub source_event_id: Option<String>,
    /// Current lifecycle state
    pub state: TaskState,
}

impl SigningTask {
    /// Create a new task stamped with `created`
    pub fn new(
        build_id: impl Into<BuildId>,
        instance: impl Into<String>,
        key: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            instance: instance.into(),
            key: key.into(),
            created,
            unsigned_remainder: BTreeSet::new(),
            error_count: 0,
            last_attempt: None,
            source_event_id: None,
            state: TaskState::New,
        }
    }

    /// Attach the triggering event ID
    pub fn with_source_event(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }

    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Composite key of the signer responsible for this task
    pub fn signer_key(&self) -> SignerKey {
        SignerKey::new(&self.instance, &self.key)
    }

    /// Whether the last attempt left nothing unsigned
    pub fn is_fully_signed(&self) -> bool {
        self.unsigned_remainder.is_empty()
    }

    /// Time the task has waited since its last attempt (or creation)
    pub fn waited(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_attempt.unwrap_or(self.created)
    }
}

impl fmt::Display for SigningTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build {} ({}/{})", self.build_id, self.instance, self.key)
    }
}

/// Identity of a single-key signer: (instance, key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignerKey {
    pub instance: String,
    pub key: String,
}

impl SignerKey {
    pub fn new(instance: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            key: key.into(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.instance == PRIMARY_INSTANCE
    }
}

impl fmt::Display for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.key)
    }
}

/// Key name to use for a given instance
///
/// Secondary instances sign with the `-secondary` variant of the release key.
pub fn key_for_instance(base_key: &str, instance: &str) -> String {
    if instance == PRIMARY_INSTANCE || base_key.ends_with(SECONDARY_KEY_SUFFIX) {
        base_key.to_string()
    } else {
        format!("{}{}", base_key, SECONDARY_KEY_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_id_parse() {
        assert_eq!("12345".parse::<BuildId>().unwrap(), BuildId::Id(12345));
        assert_eq!(
            "foo-1.0-1.fc22".parse::<BuildId>().unwrap(),
            BuildId::Nvr("foo-1.0-1.fc22".to_string())
        );
        assert_eq!(BuildId::from(" 42 "), BuildId::Id(42));
    }

    #[test]
    fn test_build_id_deserialize_both_forms() {
        let id: BuildId = serde_json::from_str("631459").unwrap();
        assert_eq!(id, BuildId::Id(631459));

        let nvr: BuildId = serde_json::from_str("\"bash-4.3-1.fc22\"").unwrap();
        assert_eq!(nvr, BuildId::Nvr("bash-4.3-1.fc22".to_string()));

        let quoted: BuildId = serde_json::from_str("\"631459\"").unwrap();
        assert_eq!(quoted, BuildId::Id(631459));
    }

    #[test]
    fn test_rpm_id_filename() {
        let rpm = RpmId::from_nvr_arch(7, "foo-1.0-1.fc22", "x86_64");
        assert_eq!(rpm.filename, "foo-1.0-1.fc22.x86_64.rpm");
        assert_eq!(rpm.to_string(), "foo-1.0-1.fc22.x86_64.rpm");
    }

    #[test]
    fn test_key_for_instance() {
        assert_eq!(key_for_instance("fedora-22", "primary"), "fedora-22");
        assert_eq!(key_for_instance("fedora-22", "ppc"), "fedora-22-secondary");
        assert_eq!(
            key_for_instance("fedora-22-secondary", "arm"),
            "fedora-22-secondary"
        );
    }

    #[test]
    fn test_new_task_state() {
        let now = Utc::now();
        let task = SigningTask::new(10u64, "primary", "fedora-22", now).with_source_event("msg-1");

        assert_eq!(task.state, TaskState::New);
        assert_eq!(task.error_count, 0);
        assert_eq!(task.created(), now);
        assert_eq!(task.source_event_id.as_deref(), Some("msg-1"));
        assert_eq!(task.signer_key(), SignerKey::new("primary", "fedora-22"));
        assert!(task.signer_key().is_primary());
    }

    #[test]
    fn test_waited_uses_last_attempt() {
        let created = Utc::now();
        let mut task = SigningTask::new(1u64, "primary", "fedora-22", created);
        let later = created + chrono::Duration::seconds(500);
        assert_eq!(task.waited(later).num_seconds(), 500);

        task.last_attempt = Some(created + chrono::Duration::seconds(400));
        assert_eq!(task.waited(later).num_seconds(), 100);
    }
}
