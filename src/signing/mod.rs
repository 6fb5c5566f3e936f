// src/signing/mod.rs

//! Signing core
//!
//! - [`SigningTask`]: one build to sign with one key on one instance
//! - [`SingleKeySigner`]: the convergence loop for one (instance, key) pair
//! - [`SigningOrchestrator`]: owns the signers and the retry queue
//! - [`InstanceSignerFactory`]: builds production signers from [`Config`](crate::Config)

mod clock;
mod factory;
mod orchestrator;
mod signer;
mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use factory::InstanceSignerFactory;
pub use orchestrator::{RetryPolicy, RetrySummary, SignerFactory, SigningOrchestrator};
pub use signer::{DEFAULT_BATCH_SIZE, SignOutcome, SignReport, SignerSettings, SingleKeySigner};
pub use task::{
    BuildId, PRIMARY_INSTANCE, RpmId, SECONDARY_KEY_SUFFIX, SignerKey, SigningTask, TaskState,
    key_for_instance,
};
