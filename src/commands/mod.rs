// src/commands/mod.rs
//! Command handlers for the autosigner CLI

mod check_keys;
mod run;
mod sign;

pub use check_keys::cmd_check_keys;
pub use run::cmd_run;
pub use sign::{SignMode, SignOptions, cmd_sign};

use crate::cli::CredentialArgs;
use anyhow::{Context, Result};
use autosigner::signing::SignerKey;
use autosigner::{Config, InstanceSignerFactory, Passphrases, SigningBackend};
use std::collections::BTreeSet;
use std::io;
use tracing::info;

/// Obtain, check and validate the passphrases for `keys`
///
/// Every key must end up with a non-empty passphrase. Unless validation is
/// skipped, each passphrase is tried against sigul before any work starts.
pub(crate) fn load_passphrases(
    config: &Config,
    factory: &InstanceSignerFactory,
    keys: &BTreeSet<String>,
    credentials: &CredentialArgs,
) -> Result<Passphrases> {
    let passphrases = if credentials.batch {
        Passphrases::from_json_reader(io::stdin().lock())
            .context("Failed to read passphrases from stdin")?
    } else {
        Passphrases::prompt(keys.iter().map(String::as_str))?
    };

    passphrases.require(keys.iter().map(String::as_str))?;

    if credentials.skip_validation {
        return Ok(passphrases);
    }

    for key in keys {
        let identity = SignerKey::new(config.instance_for_key(key), key);
        let backend = factory.backend(&identity)?;
        let passphrase = passphrases
            .get(key)
            .with_context(|| format!("No passphrase for key {}", key))?;

        if !backend.validate(passphrase)? {
            anyhow::bail!("sigul rejected the passphrase for key {}", key);
        }
        info!("Passphrase for {} verified", key);
    }

    Ok(passphrases)
}
