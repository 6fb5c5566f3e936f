// src/koji/hub.rs

//! Koji hub client
//!
//! Speaks XML-RPC over HTTP(S). Authenticated calls (writing signed copies)
//! need an SSL login with a client certificate; read-only queries work
//! anonymously.

use super::xmlrpc::{self, Value};
use super::{BuildRepository, WriteError};
use crate::error::{Error, Result};
use crate::signing::{BuildId, RpmId};
use reqwest::blocking::Client;
use reqwest::{Certificate, Identity};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Hub of the primary Koji instance
pub const PRIMARY_HUB_URL: &str = "https://koji.fedoraproject.org/kojihub";

/// Calls per `system.multicall` request
pub const WRITE_CHUNK_SIZE: usize = 100;

/// Default timeout for a single hub request
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for one hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// XML-RPC endpoint
    pub url: String,
    /// PEM file holding the client certificate and private key
    pub client_cert: Option<PathBuf>,
    /// PEM file with the CA that signed the hub's certificate
    pub server_ca: Option<PathBuf>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HubConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_cert: None,
            server_ca: None,
            timeout: HTTP_TIMEOUT,
        }
    }

    /// Default hub for a secondary architecture
    pub fn secondary(arch: &str) -> Self {
        Self::new(format!("http://{}.koji.fedoraproject.org/kojihub", arch))
    }
}

#[derive(Debug)]
struct Session {
    id: String,
    key: String,
}

/// XML-RPC client for a Koji hub
pub struct KojiHub {
    client: Client,
    url: Url,
    session: Option<Session>,
    callnum: Cell<u64>,
}

impl KojiHub {
    /// Create a client; logs in when a client certificate is configured
    pub fn connect(config: &HubConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("Invalid hub URL {}: {}", config.url, e)))?;

        let mut builder = Client::builder().timeout(config.timeout);

        if let Some(ref cert_path) = config.client_cert {
            let pem = fs::read(cert_path).map_err(|e| {
                Error::Config(format!("Failed to read client certificate {}: {}", cert_path.display(), e))
            })?;
            let identity = Identity::from_pem(&pem)
                .map_err(|e| Error::Config(format!("Invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        if let Some(ref ca_path) = config.server_ca {
            let pem = fs::read(ca_path).map_err(|e| {
                Error::Config(format!("Failed to read server CA {}: {}", ca_path.display(), e))
            })?;
            let ca = Certificate::from_pem(&pem)
                .map_err(|e| Error::Config(format!("Invalid server CA: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Hub(format!("Failed to create HTTP client: {}", e)))?;

        let mut hub = Self {
            client,
            url,
            session: None,
            callnum: Cell::new(0),
        };

        if config.client_cert.is_some() {
            hub.ssl_login()?;
        }

        Ok(hub)
    }

    /// Hub endpoint this client talks to
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    fn ssl_login(&mut self) -> Result<()> {
        let mut login_url = self.url.clone();
        login_url
            .path_segments_mut()
            .map_err(|_| Error::Config(format!("Hub URL cannot be a base: {}", self.url)))?
            .pop_if_empty()
            .push("ssllogin");

        let result = self.post(login_url, "sslLogin", &[])?;
        let id = session_field(&result, "session-id")?;
        let key = session_field(&result, "session-key")?;

        info!("Logged in to {}", self.url);
        self.session = Some(Session { id, key });
        Ok(())
    }

    fn call_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(ref session) = self.session {
            let callnum = self.callnum.get();
            self.callnum.set(callnum + 1);
            url.query_pairs_mut()
                .append_pair("session-id", &session.id)
                .append_pair("session-key", &session.key)
                .append_pair("callnum", &callnum.to_string());
        }
        url
    }

    fn post(&self, url: Url, method: &str, params: &[Value]) -> Result<Value> {
        let body = xmlrpc::encode_call(method, params);
        let response = self
            .client
            .post(url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .map_err(|e| Error::Hub(format!("{} request failed: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(Error::Hub(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let text = response
            .text()
            .map_err(|e| Error::Hub(format!("Failed to read {} response: {}", method, e)))?;
        xmlrpc::decode_response(&text)
    }

    /// Call a single hub method
    pub fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
        debug!("Calling {} with {} params", method, params.len());
        self.post(self.call_url(), method, params)
    }

    /// Run several calls in one round trip
    pub fn multicall(
        &self,
        calls: Vec<(&str, Vec<Value>)>,
    ) -> Result<Vec<std::result::Result<Value, xmlrpc::Fault>>> {
        let count = calls.len();
        let batch: Vec<Value> = calls
            .into_iter()
            .map(|(method, params)| {
                Value::structure([
                    ("methodName", Value::from(method)),
                    ("params", Value::Array(params)),
                ])
            })
            .collect();

        let results = xmlrpc::unpack_multicall(self.call("system.multicall", &[Value::Array(batch)])?)?;
        if results.len() != count {
            return Err(Error::Hub(format!(
                "multicall returned {} results for {} calls",
                results.len(),
                count
            )));
        }
        Ok(results)
    }

    /// Resolve a build to its numeric ID, or `BuildNotFound`
    pub fn build_id(&self, build: &BuildId) -> Result<u64> {
        let param = match build {
            BuildId::Id(id) => Value::from(*id),
            BuildId::Nvr(nvr) => Value::from(nvr.as_str()),
        };

        let info = self.call("getBuild", &[param])?;
        if info.is_nil() {
            return Err(Error::BuildNotFound(build.to_string()));
        }

        info.get("id")
            .and_then(Value::as_i64)
            .and_then(|id| u64::try_from(id).ok())
            .ok_or_else(|| Error::Hub(format!("getBuild({}) returned no id", build)))
    }
}

fn session_field(result: &Value, name: &str) -> Result<String> {
    match result.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Int(i)) => Ok(i.to_string()),
        _ => Err(Error::Hub(format!("sslLogin response lacks {}", name))),
    }
}

fn rpm_from_value(value: &Value) -> Result<RpmId> {
    let id = value
        .get("id")
        .and_then(Value::as_i64)
        .and_then(|id| u64::try_from(id).ok());
    let nvr = value.get("nvr").and_then(Value::as_str);
    let arch = value.get("arch").and_then(Value::as_str);

    match (id, nvr, arch) {
        (Some(id), Some(nvr), Some(arch)) => Ok(RpmId::from_nvr_arch(id, nvr, arch)),
        _ => Err(Error::Hub(format!("Malformed RPM entry: {:?}", value))),
    }
}

impl BuildRepository for KojiHub {
    fn list_rpms(&self, build: &BuildId) -> Result<BTreeSet<RpmId>> {
        let build_id = self.build_id(build)?;
        let result = self.call("listRPMs", &[Value::from(build_id)])?;
        let entries = result
            .as_array()
            .ok_or_else(|| Error::Hub("listRPMs did not return a list".to_string()))?;

        let rpms = entries.iter().map(rpm_from_value).collect::<Result<BTreeSet<_>>>()?;
        debug!("Build {} has {} rpms", build, rpms.len());
        Ok(rpms)
    }

    fn list_unsigned(&self, rpms: &BTreeSet<RpmId>, key_id: &str) -> Result<BTreeSet<RpmId>> {
        let all: Vec<&RpmId> = rpms.iter().collect();
        let mut unsigned = BTreeSet::new();

        for chunk in all.chunks(WRITE_CHUNK_SIZE) {
            let calls = chunk
                .iter()
                .map(|rpm| ("queryRPMSigs", vec![Value::from(rpm.id), Value::from(key_id)]))
                .collect();

            for (rpm, result) in chunk.iter().zip(self.multicall(calls)?) {
                let sigs = result?;
                // No signature row for this key means unsigned
                if sigs.as_array().is_none_or(|s| s.is_empty()) {
                    debug!("{} is not signed with {}", rpm, key_id);
                    unsigned.insert((*rpm).clone());
                }
            }
        }

        Ok(unsigned)
    }

    fn write_signed_copies(&self, rpms: &BTreeSet<RpmId>, key_id: &str) -> Result<Vec<WriteError>> {
        info!("Calling koji to write {} rpms", rpms.len());
        if !self.is_logged_in() {
            warn!("Not logged in to {}; writeSignedRPM will likely be refused", self.url);
        }

        let all: Vec<&RpmId> = rpms.iter().collect();
        let total = all.len();
        let mut written = 0;
        let mut errors = Vec::new();

        for chunk in all.chunks(WRITE_CHUNK_SIZE) {
            let calls = chunk
                .iter()
                .map(|rpm| {
                    written += 1;
                    debug!("Writing out {} with {}, {} of {}", rpm, key_id, written, total);
                    ("writeSignedRPM", vec![Value::from(rpm.id), Value::from(key_id)])
                })
                .collect();

            for (rpm, result) in chunk.iter().zip(self.multicall(calls)?) {
                if let Err(fault) = result {
                    errors.push(WriteError {
                        rpm: (*rpm).clone(),
                        detail: fault.message,
                    });
                }
            }
        }

        Ok(errors)
    }

    fn list_tagged(&self, tag: &str, inherit: bool) -> Result<Vec<String>> {
        // listTagged(tag, event, inherit, prefix, latest)
        let result = self.call(
            "listTagged",
            &[
                Value::from(tag),
                Value::Nil,
                Value::from(inherit),
                Value::Nil,
                Value::from(true),
            ],
        )?;

        let builds = result
            .as_array()
            .ok_or_else(|| Error::Hub("listTagged did not return a list".to_string()))?;

        builds
            .iter()
            .map(|b| {
                b.get("nvr")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| Error::Hub(format!("Malformed build entry: {:?}", b)))
            })
            .collect()
    }
}
