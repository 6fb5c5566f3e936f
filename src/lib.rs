// src/lib.rs

//! Autosigner
//!
//! Automatic RPM signing for Koji builds. Builds tagged into a watched tag
//! are signed through Sigul until every RPM carries the release key, with
//! stall detection and a backoff-driven retry queue for builds that do not
//! converge.
//!
//! # Architecture
//!
//! - `signing`: tasks, the single-key convergence loop and the orchestrator
//! - `koji`: the build hub behind the `BuildRepository` trait
//! - `sigul`: the signing daemon behind the `SigningBackend` trait
//! - `events` and `dispatch`: tag events in, signing tasks out
//! - `health`: periodic key checks

pub mod config;
pub mod credentials;
pub mod dispatch;
mod error;
pub mod events;
pub mod health;
pub mod keys;
pub mod koji;
pub mod signing;
pub mod sigul;

pub use config::Config;
pub use credentials::{Passphrase, Passphrases};
pub use dispatch::{DispatchStats, Dispatcher};
pub use error::{Error, Result};
pub use events::{BusMessage, EventFilter, FeedItem, LineFeed, TagEvent};
pub use health::{KeyMonitor, KeyStatus};
pub use keys::{KeyCatalog, KeyInfo};
pub use koji::{BuildRepository, HubConfig, KojiHub, WriteError};
pub use signing::{
    BuildId, Clock, InstanceSignerFactory, ManualClock, RetryPolicy, RetrySummary, RpmId,
    SignOutcome, SignReport, SignerFactory, SignerKey, SignerSettings, SigningOrchestrator,
    SigningTask, SingleKeySigner, SystemClock, TaskState,
};
pub use sigul::{BatchOutcome, SigningBackend, SigulBackend, SigulConfig};
