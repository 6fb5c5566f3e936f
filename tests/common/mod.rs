// tests/common/mod.rs

//! Shared test utilities: an in-memory build hub and signer.

#![allow(dead_code)]

use autosigner::signing::SignerKey;
use autosigner::{
    BatchOutcome, BuildId, BuildRepository, Error, KeyInfo, Passphrase, Passphrases, Result,
    RpmId, SignerFactory, SignerSettings, SigningBackend, SingleKeySigner, WriteError,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Key ID the fake hub records signatures under
pub const KEY_ID: &str = "8e1431d5";

/// What the fake signer does with one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Behavior {
    /// Sign every RPM in the batch
    #[default]
    SignAll,
    /// Sign the first N RPMs of the batch, then succeed
    SignFirst(usize),
    /// Exit successfully without signing anything
    Nothing,
    /// Sign the first N RPMs, then hit the deadline
    TimeOut(usize),
    /// Exit with an error without signing
    Fail,
}

/// Everything the fake hub and signer know and record
#[derive(Debug, Default)]
pub struct State {
    pub builds: BTreeMap<BuildId, BTreeSet<RpmId>>,
    pub signed: BTreeSet<RpmId>,
    /// Per-batch behaviours, consumed in order
    pub script: VecDeque<Behavior>,
    /// Behaviour once the script is exhausted
    pub fallback: Behavior,
    /// Hub answers every call with a connection error
    pub hub_down: bool,
    /// Builds the hub answers with an XML-RPC fault
    pub faulting: BTreeSet<BuildId>,
    /// File names whose signed copy cannot be written
    pub failing_writes: BTreeSet<String>,
    pub tagged: BTreeMap<String, Vec<String>>,

    pub batches: Vec<Vec<RpmId>>,
    pub deadlines: Vec<Duration>,
    pub unsigned_queries: usize,
    pub writes: Vec<BTreeSet<RpmId>>,
    pub written: BTreeSet<RpmId>,
}

/// Shared handle on the fake hub and signer
#[derive(Debug, Clone, Default)]
pub struct World {
    state: Arc<Mutex<State>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Register a build with `count` RPMs named after the NVR
    pub fn add_build(&self, id: u64, nvr: &str, count: usize) -> BTreeSet<RpmId> {
        let rpms: BTreeSet<RpmId> = (0..count)
            .map(|i| RpmId::new(id * 1000 + i as u64, format!("{}-sub{}.x86_64.rpm", nvr, i)))
            .collect();
        let mut state = self.state();
        state.builds.insert(BuildId::Id(id), rpms.clone());
        state.builds.insert(BuildId::Nvr(nvr.to_string()), rpms.clone());
        rpms
    }

    /// Register a build with explicitly named RPMs
    pub fn add_build_rpms(&self, id: u64, rpms: &[RpmId]) -> BTreeSet<RpmId> {
        let rpms: BTreeSet<RpmId> = rpms.iter().cloned().collect();
        self.state().builds.insert(BuildId::Id(id), rpms.clone());
        rpms
    }

    pub fn script(&self, behaviors: impl IntoIterator<Item = Behavior>) {
        self.state().script.extend(behaviors);
    }

    pub fn set_fallback(&self, behavior: Behavior) {
        self.state().fallback = behavior;
    }

    pub fn repository(&self) -> Box<dyn BuildRepository> {
        Box::new(FakeRepository(self.clone()))
    }

    pub fn backend(&self) -> Box<dyn SigningBackend> {
        Box::new(FakeBackend(self.clone()))
    }

    /// Signer for ("primary", "fedora-22") backed by this world
    pub fn signer(&self, settings: SignerSettings) -> SingleKeySigner {
        self.signer_for(SignerKey::new("primary", "fedora-22"), settings)
    }

    pub fn signer_for(&self, identity: SignerKey, settings: SignerSettings) -> SingleKeySigner {
        SingleKeySigner::new(
            identity,
            KeyInfo::new(KEY_ID, true),
            Passphrase::new("secret"),
            self.repository(),
            self.backend(),
            settings,
        )
    }
}

struct FakeRepository(World);

impl BuildRepository for FakeRepository {
    fn list_rpms(&self, build: &BuildId) -> Result<BTreeSet<RpmId>> {
        let state = self.0.state();
        if state.hub_down {
            return Err(Error::Hub("connection refused".to_string()));
        }
        if state.faulting.contains(build) {
            return Err(Error::Fault {
                code: 1000,
                message: format!("No such build: {}", build),
            });
        }
        state
            .builds
            .get(build)
            .cloned()
            .ok_or_else(|| Error::BuildNotFound(build.to_string()))
    }

    fn list_unsigned(&self, rpms: &BTreeSet<RpmId>, _key_id: &str) -> Result<BTreeSet<RpmId>> {
        let mut state = self.0.state();
        if state.hub_down {
            return Err(Error::Hub("connection refused".to_string()));
        }
        state.unsigned_queries += 1;
        Ok(rpms.difference(&state.signed).cloned().collect())
    }

    fn write_signed_copies(&self, rpms: &BTreeSet<RpmId>, _key_id: &str) -> Result<Vec<WriteError>> {
        let mut state = self.0.state();
        state.writes.push(rpms.clone());

        let mut errors = Vec::new();
        for rpm in rpms {
            if state.failing_writes.contains(&rpm.filename) {
                errors.push(WriteError {
                    rpm: rpm.clone(),
                    detail: "disk full".to_string(),
                });
            } else if state.signed.contains(rpm) {
                state.written.insert(rpm.clone());
            } else {
                errors.push(WriteError {
                    rpm: rpm.clone(),
                    detail: "not signed".to_string(),
                });
            }
        }
        Ok(errors)
    }

    fn list_tagged(&self, tag: &str, _inherit: bool) -> Result<Vec<String>> {
        Ok(self.0.state().tagged.get(tag).cloned().unwrap_or_default())
    }
}

struct FakeBackend(World);

impl SigningBackend for FakeBackend {
    fn sign_batch(&self, rpms: &[RpmId], _passphrase: &Passphrase, timeout: Duration) -> Result<BatchOutcome> {
        let mut state = self.0.state();
        state.batches.push(rpms.to_vec());
        state.deadlines.push(timeout);

        let behavior = match state.script.pop_front() {
            Some(b) => b,
            None => state.fallback.clone(),
        };
        let (count, outcome) = match behavior {
            Behavior::SignAll => (rpms.len(), BatchOutcome::Success),
            Behavior::SignFirst(n) => (n, BatchOutcome::Success),
            Behavior::Nothing => (0, BatchOutcome::Success),
            Behavior::TimeOut(n) => (n, BatchOutcome::TimedOut),
            Behavior::Fail => (0, BatchOutcome::Failed("sigul exited with code 1".to_string())),
        };
        for rpm in rpms.iter().take(count) {
            state.signed.insert(rpm.clone());
        }
        Ok(outcome)
    }

    fn validate(&self, passphrase: &Passphrase) -> Result<bool> {
        Ok(passphrase.expose() == "secret")
    }
}

/// [`SignerFactory`] building signers on a [`World`], counting creations
#[derive(Clone)]
pub struct FakeFactory {
    pub world: World,
    pub settings: SignerSettings,
    pub created: Arc<Mutex<Vec<SignerKey>>>,
}

impl FakeFactory {
    pub fn new(world: &World) -> Self {
        Self {
            world: world.clone(),
            settings: SignerSettings::default(),
            created: Arc::default(),
        }
    }

    pub fn created(&self) -> Vec<SignerKey> {
        self.created.lock().unwrap().clone()
    }
}

impl SignerFactory for FakeFactory {
    fn create(&self, identity: &SignerKey, _passphrase: &Passphrase) -> Result<SingleKeySigner> {
        self.created.lock().unwrap().push(identity.clone());
        Ok(self.world.signer_for(identity.clone(), self.settings.clone()))
    }
}

/// Passphrases for the given keys
pub fn passphrases(keys: &[&str]) -> Passphrases {
    let mut p = Passphrases::new();
    for key in keys {
        p.insert(*key, Passphrase::new("secret"));
    }
    p
}
