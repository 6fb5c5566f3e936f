// src/signing/factory.rs

//! Production signer construction

use super::orchestrator::SignerFactory;
use super::signer::{SignerSettings, SingleKeySigner};
use super::task::SignerKey;
use crate::config::Config;
use crate::credentials::Passphrase;
use crate::error::Result;
use crate::keys::KeyCatalog;
use crate::koji::KojiHub;
use crate::sigul::SigulBackend;
use tracing::debug;

/// Builds [`SingleKeySigner`]s talking to a real hub and a real sigul
#[derive(Debug, Clone)]
pub struct InstanceSignerFactory {
    config: Config,
    catalog: KeyCatalog,
    settings: SignerSettings,
}

impl InstanceSignerFactory {
    pub fn new(config: Config) -> Result<Self> {
        let catalog = config.key_catalog();
        let settings = config.signer_settings()?;
        Ok(Self {
            config,
            catalog,
            settings,
        })
    }

    /// Override the loop settings, e.g. to disable writes for one-shot runs
    pub fn with_settings(mut self, settings: SignerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn catalog(&self) -> &KeyCatalog {
        &self.catalog
    }

    /// sigul runner for `identity`, without touching the hub
    pub fn backend(&self, identity: &SignerKey) -> Result<SigulBackend> {
        let key = self.catalog.get(&identity.key)?;
        Ok(SigulBackend::new(self.config.sigul_config(
            &identity.instance,
            &identity.key,
            key.v3,
        )))
    }
}

impl SignerFactory for InstanceSignerFactory {
    fn create(&self, identity: &SignerKey, passphrase: &Passphrase) -> Result<SingleKeySigner> {
        let key = self.catalog.get(&identity.key)?.clone();
        let hub_config = self.config.hub_config(&identity.instance);
        debug!("Connecting to {} for {}", hub_config.url, identity);

        let hub = KojiHub::connect(&hub_config)?;
        let backend = self.backend(identity)?;

        Ok(SingleKeySigner::new(
            identity.clone(),
            key,
            passphrase.clone(),
            Box::new(hub),
            Box::new(backend),
            self.settings.clone(),
        ))
    }
}
