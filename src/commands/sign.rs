// src/commands/sign.rs

//! `autosigner sign`: one-shot signing of explicit builds or a tag

use super::load_passphrases;
use crate::cli::CredentialArgs;
use anyhow::Result;
use autosigner::signing::SignerKey;
use autosigner::{
    BuildId, BuildRepository, Config, Error, InstanceSignerFactory, KojiHub, SignerFactory,
    SigningTask,
};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{error, info, warn};

/// What `sign` does with each build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    /// Sign, then write out signed copies
    SignAndWrite,
    /// Print the unsigned RPMs
    ListOnly,
    /// Sign without writing
    SignOnly,
    /// Write out copies of RPMs that are already signed
    WriteOnly,
}

impl SignMode {
    pub fn from_flags(just_list: bool, just_sign: bool, just_write: bool) -> Self {
        match (just_list, just_sign, just_write) {
            (true, _, _) => Self::ListOnly,
            (_, true, _) => Self::SignOnly,
            (_, _, true) => Self::WriteOnly,
            _ => Self::SignAndWrite,
        }
    }

    fn signs(&self) -> bool {
        matches!(self, Self::SignAndWrite | Self::SignOnly)
    }
}

/// Arguments of `autosigner sign`
#[derive(Debug, Clone)]
pub struct SignOptions {
    pub key: String,
    pub builds: Vec<String>,
    pub instance: String,
    pub tag: Option<String>,
    pub inherit: bool,
    pub mode: SignMode,
    pub write_all: bool,
    pub batch_size: Option<usize>,
}

/// Per-run totals
#[derive(Debug, Default)]
struct Totals {
    builds: usize,
    incomplete: Vec<String>,
    failed: Vec<String>,
    write_errors: usize,
}

/// Sign (or list, or write) the RPMs of the selected builds
pub fn cmd_sign(config: Config, credentials: &CredentialArgs, opts: SignOptions) -> Result<()> {
    let factory = InstanceSignerFactory::new(config.clone())?;
    let key_info = factory.catalog().get(&opts.key)?.clone();
    let hub = KojiHub::connect(&config.hub_config(&opts.instance))?;

    let builds: Vec<BuildId> = match opts.tag {
        Some(ref tag) => {
            let nvrs = hub.list_tagged(tag, opts.inherit)?;
            info!("{} latest builds in {}", nvrs.len(), tag);
            nvrs.iter().map(|nvr| BuildId::from(nvr.as_str())).collect()
        }
        None => opts.builds.iter().map(|b| BuildId::from(b.as_str())).collect(),
    };
    if builds.is_empty() {
        anyhow::bail!("No builds to sign");
    }

    let mut totals = Totals {
        builds: builds.len(),
        ..Default::default()
    };

    if !opts.mode.signs() {
        for build in &builds {
            match list_or_write(&hub, build, &key_info.id, opts.mode, opts.write_all) {
                Ok(write_errors) => totals.write_errors += write_errors,
                Err(e @ Error::BuildNotFound(_)) => {
                    error!("{}", e);
                    totals.failed.push(build.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }
        return report(&totals);
    }

    let mut settings = config.signer_settings()?;
    if let Some(batch_size) = opts.batch_size {
        settings.batch_size = batch_size.max(1);
    }
    settings.write_signed_copies = opts.mode == SignMode::SignAndWrite && !opts.write_all;
    let factory = factory.with_settings(settings);

    let keys = BTreeSet::from([opts.key.clone()]);
    let passphrases = load_passphrases(&config, &factory, &keys, credentials)?;
    let identity = SignerKey::new(&opts.instance, &opts.key);
    let passphrase = passphrases
        .get(&opts.key)
        .ok_or_else(|| Error::MissingCredential(opts.key.clone()))?;
    let mut signer = factory.create(&identity, passphrase)?;

    for build in builds {
        let mut task = SigningTask::new(build, &opts.instance, &opts.key, Utc::now());
        let report = signer.sign(&mut task)?;
        totals.write_errors += report.write_errors.len();

        if report.outcome.is_terminal_failure() {
            totals.failed.push(task.build_id().to_string());
            continue;
        }
        if !task.is_fully_signed() {
            for rpm in &task.unsigned_remainder {
                warn!("Still unsigned: {}", rpm);
            }
            totals.incomplete.push(task.build_id().to_string());
        }

        if opts.mode == SignMode::SignAndWrite && opts.write_all {
            let all = signer.repository().list_rpms(task.build_id())?;
            let errors = signer.repository().write_signed_copies(&all, &key_info.id)?;
            for e in &errors {
                error!("{}", e);
            }
            totals.write_errors += errors.len();
        }
    }

    report(&totals)
}

/// `--just-list` and `--just-write` for one build; returns the write error count
fn list_or_write(
    hub: &KojiHub,
    build: &BuildId,
    key_id: &str,
    mode: SignMode,
    write_all: bool,
) -> autosigner::Result<usize> {
    let rpms = hub.list_rpms(build)?;
    if rpms.is_empty() {
        warn!("{}", Error::NoRpmsFound(build.to_string()));
        return Ok(0);
    }
    let unsigned = hub.list_unsigned(&rpms, key_id)?;

    if mode == SignMode::ListOnly {
        for rpm in &unsigned {
            println!("{}", rpm);
        }
        return Ok(0);
    }

    let targets: BTreeSet<_> = if write_all {
        rpms
    } else {
        rpms.difference(&unsigned).cloned().collect()
    };
    if targets.is_empty() {
        info!("Nothing signed to write for {}", build);
        return Ok(0);
    }

    info!("Writing {} signed copies for {}", targets.len(), build);
    let errors = hub.write_signed_copies(&targets, key_id)?;
    for e in &errors {
        error!("{}", e);
    }
    Ok(errors.len())
}

fn report(totals: &Totals) -> Result<()> {
    info!(
        "{} builds: {} incomplete, {} failed, {} write errors",
        totals.builds,
        totals.incomplete.len(),
        totals.failed.len(),
        totals.write_errors
    );

    if !totals.incomplete.is_empty() {
        anyhow::bail!("Builds left incomplete: {}", totals.incomplete.join(", "));
    }
    if !totals.failed.is_empty() {
        anyhow::bail!("Builds that could not be signed: {}", totals.failed.join(", "));
    }
    if totals.write_errors > 0 {
        anyhow::bail!("{} signed copies could not be written", totals.write_errors);
    }
    Ok(())
}
