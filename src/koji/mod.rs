// src/koji/mod.rs

//! Build system access
//!
//! The signing core talks to the build system only through
//! [`BuildRepository`]. [`KojiHub`] implements it over Koji's XML-RPC API.

mod hub;
pub mod xmlrpc;

pub use hub::{HubConfig, KojiHub, PRIMARY_HUB_URL, WRITE_CHUNK_SIZE};

use crate::error::Result;
use crate::signing::{BuildId, RpmId};
use std::collections::BTreeSet;
use std::fmt;

/// Failure to write out the signed copy of one RPM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    pub rpm: RpmId,
    pub detail: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error writing out {}: {}", self.rpm, self.detail)
    }
}

/// Queries and commands against one build-system instance
pub trait BuildRepository {
    /// All RPMs belonging to a build
    ///
    /// Returns [`Error::BuildNotFound`](crate::Error::BuildNotFound) when the
    /// build does not exist.
    fn list_rpms(&self, build: &BuildId) -> Result<BTreeSet<RpmId>>;

    /// Subset of `rpms` that carries no signature with `key_id`
    fn list_unsigned(&self, rpms: &BTreeSet<RpmId>, key_id: &str) -> Result<BTreeSet<RpmId>>;

    /// Write the signed copy of every RPM in `rpms`
    ///
    /// Per-RPM failures are returned, not raised; an empty vector means every
    /// copy was written.
    fn write_signed_copies(&self, rpms: &BTreeSet<RpmId>, key_id: &str) -> Result<Vec<WriteError>>;

    /// NVRs of the latest builds in a tag
    fn list_tagged(&self, tag: &str, inherit: bool) -> Result<Vec<String>>;
}
