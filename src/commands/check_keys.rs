// src/commands/check_keys.rs

//! `autosigner check-keys`: key health monitor

use super::load_passphrases;
use crate::cli::CredentialArgs;
use anyhow::{Context, Result};
use autosigner::config::parse_duration;
use autosigner::signing::SignerKey;
use autosigner::{Config, InstanceSignerFactory, KeyMonitor};
use std::collections::BTreeSet;

/// Validate key passphrases against sigul, once or forever
pub fn cmd_check_keys(
    config: Config,
    credentials: &CredentialArgs,
    keys: Vec<String>,
    once: bool,
    interval: Option<&str>,
) -> Result<()> {
    let keys: BTreeSet<String> = if keys.is_empty() {
        config.required_keys()
    } else {
        keys.into_iter().collect()
    };

    let interval = match interval {
        Some(s) => parse_duration(s).with_context(|| format!("Invalid --interval {}", s))?,
        None => config.check_interval()?,
    };

    let factory = InstanceSignerFactory::new(config.clone())?;

    // The monitor itself does the validation
    let credentials = CredentialArgs {
        skip_validation: true,
        ..credentials.clone()
    };
    let passphrases = load_passphrases(&config, &factory, &keys, &credentials)?;

    let mut monitor = KeyMonitor::new();
    for key in &keys {
        let identity = SignerKey::new(config.instance_for_key(key), key);
        let backend = factory.backend(&identity)?;
        let passphrase = passphrases
            .get(key)
            .cloned()
            .with_context(|| format!("No passphrase for key {}", key))?;
        monitor.add(key.clone(), Box::new(backend), passphrase);
    }

    if once {
        monitor.check_once();
        let mut failing = 0;
        for key in &keys {
            if let Some(status) = monitor.status(key) {
                println!("{}: {}", key, status);
                if !status.is_working() {
                    failing += 1;
                }
            }
        }
        if failing > 0 {
            anyhow::bail!("{} of {} keys are not working", failing, keys.len());
        }
        return Ok(());
    }

    monitor.run(interval, None);
    Ok(())
}
