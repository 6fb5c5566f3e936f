// src/error.rs

//! Error types for the autosigner library

use thiserror::Error;

/// Errors surfaced by the signing core and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// The build does not exist on the hub
    #[error("Build not found: {0}")]
    BuildNotFound(String),

    /// The build exists but has no RPMs to sign
    #[error("No RPMs found for build {0}")]
    NoRpmsFound(String),

    /// No passphrase was supplied for a key
    #[error("No passphrase available for key {0}")]
    MissingCredential(String),

    /// Key name is not in the key catalog
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    /// The build hub could not be reached or answered with garbage
    #[error("Build hub error: {0}")]
    Hub(String),

    /// XML-RPC encoding or decoding failed
    #[error("XML-RPC error: {0}")]
    XmlRpc(String),

    /// The hub answered with an XML-RPC fault
    #[error("Hub fault {code}: {message}")]
    Fault { code: i64, message: String },

    /// External command could not be run
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// External tool is not installed
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input data
    #[error("Parse error: {0}")]
    ParseError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl Error {
    /// Whether this error means no productive work is possible at all
    ///
    /// A hub fault answers one call; the hub itself is still reachable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Hub(_) | Error::XmlRpc(_) | Error::CommandFailed(_) | Error::ToolNotFound(_)
        )
    }
}

/// Result type alias for autosigner operations
pub type Result<T> = std::result::Result<T, Error>;
