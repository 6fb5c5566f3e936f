// src/commands/run.rs

//! `autosigner run`: the signing daemon

use super::load_passphrases;
use crate::cli::CredentialArgs;
use anyhow::{Context, Result};
use autosigner::{
    Config, Dispatcher, EventFilter, InstanceSignerFactory, LineFeed, SigningOrchestrator,
    SystemClock,
};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Sign builds from the event feed until it ends
pub fn cmd_run(config: Config, credentials: &CredentialArgs, events: Option<&Path>) -> Result<()> {
    let feed_path = events.filter(|p| *p != Path::new("-"));
    if credentials.batch && feed_path.is_none() {
        anyhow::bail!("--batch reads passphrases from stdin; give the event feed with --events PATH");
    }

    let keys = config.required_keys();
    info!(
        "Signing keys: {}",
        keys.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    let factory = InstanceSignerFactory::new(config.clone())?;
    let passphrases = load_passphrases(&config, &factory, &keys, credentials)?;

    let orchestrator = SigningOrchestrator::new(
        Box::new(factory),
        passphrases,
        config.retry_policy()?,
        Arc::new(SystemClock),
    );

    let feed = match feed_path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open event feed {}", path.display()))?;
            info!("Reading events from {}", path.display());
            LineFeed::spawn(BufReader::new(file))
        }
        None => {
            info!("Reading events from stdin");
            LineFeed::spawn(BufReader::new(io::stdin()))
        }
    };

    let mut dispatcher = Dispatcher::new(
        orchestrator,
        EventFilter::from_config(&config),
        config.idle_tick()?,
    );
    let stats = dispatcher.run(&feed)?;

    println!(
        "{} messages, {} builds signed, {} still incomplete",
        stats.lines,
        stats.converged,
        dispatcher.orchestrator().incomplete_len()
    );
    Ok(())
}
