// src/config.rs

//! Daemon configuration
//!
//! Loaded from a TOML file (default `/etc/autosigner/autosigner.toml`). Every
//! section is optional; a missing file yields the built-in defaults, which
//! match the production Fedora setup.
//!
//! ```toml
//! [feed]
//! topic_prefix = "org.fedoraproject.prod."
//! idle_tick = "1m"
//!
//! [retry]
//! interval = "5m"
//! backoff_short = "5m"
//! backoff_long = "30m"
//! backoff_threshold = 10
//!
//! [signing]
//! batch_size = 50
//!
//! [[tags]]
//! tags = ["f22", "f22-rebuild"]
//! key = "fedora-22"
//!
//! [instances.ppc]
//! sigul_config = "~/.sigul/client-secondary.conf"
//!
//! [keys.fedora-23]
//! id = "34ec9cba"
//! ```

use crate::error::{Error, Result};
use crate::keys::{KeyCatalog, KeyInfo};
use crate::koji::{HubConfig, PRIMARY_HUB_URL};
use crate::signing::{
    PRIMARY_INSTANCE, RetryPolicy, SECONDARY_KEY_SUFFIX, SignerSettings, key_for_instance,
};
use crate::sigul::SigulConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/autosigner/autosigner.toml";

/// Message bus topic prefix of the production environment
pub const DEFAULT_TOPIC_PREFIX: &str = "org.fedoraproject.prod.";

/// sigul client config used for secondary instances unless overridden
pub const SECONDARY_SIGUL_CONFIG: &str = "~/.sigul/client-secondary.conf";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub signing: SigningConfig,

    /// Tag to key mapping; only tags listed here trigger signing
    #[serde(default = "default_tag_rules")]
    pub tags: Vec<TagRule>,

    /// Build-system instances by name
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceConfig>,

    /// Extra or overriding signing keys
    #[serde(default)]
    pub keys: BTreeMap<String, KeyInfo>,
}

/// Event feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Prefix prepended to `buildsys.tag` to form the watched topic
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// How long to wait for an event before running an idle retry pass
    #[serde(default = "default_idle_tick")]
    pub idle_tick: String,
}

/// Retry cadence of the incomplete queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_interval")]
    pub interval: String,

    #[serde(default = "default_backoff_short")]
    pub backoff_short: String,

    #[serde(default = "default_backoff_long")]
    pub backoff_long: String,

    #[serde(default = "default_backoff_threshold")]
    pub backoff_threshold: usize,
}

/// Signer tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Maximum RPMs per sigul invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_timeout_base")]
    pub timeout_base: String,

    #[serde(default = "default_timeout_per_rpm")]
    pub timeout_per_rpm: String,

    #[serde(default = "default_timeout_cap")]
    pub timeout_cap: String,

    /// sigul client executable
    #[serde(default = "default_sigul")]
    pub sigul: PathBuf,

    /// Interval of `check-keys`
    #[serde(default = "default_check_interval")]
    pub check_interval: String,
}

/// Tags that are signed with one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub tags: Vec<String>,
    pub key: String,
}

/// One build-system instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Hub endpoint; defaults depend on the instance
    #[serde(default)]
    pub hub_url: Option<String>,

    /// Architecture passed to sigul with `-k`; defaults to the instance name
    /// for secondary instances
    #[serde(default)]
    pub arch: Option<String>,

    /// sigul client config (`-c`)
    #[serde(default)]
    pub sigul_config: Option<PathBuf>,

    /// Client certificate for hub login
    #[serde(default)]
    pub client_cert: Option<PathBuf>,

    /// CA of the hub certificate
    #[serde(default)]
    pub server_ca: Option<PathBuf>,
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_idle_tick() -> String {
    "1m".to_string()
}

fn default_retry_interval() -> String {
    "5m".to_string()
}

fn default_backoff_short() -> String {
    "5m".to_string()
}

fn default_backoff_long() -> String {
    "30m".to_string()
}

fn default_backoff_threshold() -> usize {
    10
}

fn default_batch_size() -> usize {
    crate::signing::DEFAULT_BATCH_SIZE
}

fn default_timeout_base() -> String {
    "60s".to_string()
}

fn default_timeout_per_rpm() -> String {
    "1s".to_string()
}

fn default_timeout_cap() -> String {
    "5m".to_string()
}

fn default_sigul() -> PathBuf {
    PathBuf::from("sigul")
}

fn default_check_interval() -> String {
    "10m".to_string()
}

fn default_tag_rules() -> Vec<TagRule> {
    vec![
        TagRule {
            tags: vec!["f21".to_string(), "f21-rebuild".to_string()],
            key: "fedora-21".to_string(),
        },
        TagRule {
            tags: vec!["f22".to_string(), "f22-rebuild".to_string()],
            key: "fedora-22".to_string(),
        },
    ]
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            idle_tick: default_idle_tick(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: default_retry_interval(),
            backoff_short: default_backoff_short(),
            backoff_long: default_backoff_long(),
            backoff_threshold: default_backoff_threshold(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            timeout_base: default_timeout_base(),
            timeout_per_rpm: default_timeout_per_rpm(),
            timeout_cap: default_timeout_cap(),
            sigul: default_sigul(),
            check_interval: default_check_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            retry: RetryConfig::default(),
            signing: SigningConfig::default(),
            tags: default_tag_rules(),
            instances: BTreeMap::new(),
            keys: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file gives the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check
    pub fn validate(&self) -> Result<()> {
        self.idle_tick()?;
        self.retry_policy()?;
        self.signer_settings()?;
        self.check_interval()?;

        if self.signing.batch_size == 0 {
            return Err(Error::Config("signing.batch_size must be at least 1".to_string()));
        }

        let catalog = self.key_catalog();
        let mut seen = BTreeSet::new();
        for rule in &self.tags {
            if !catalog.contains(&rule.key) {
                return Err(Error::Config(format!(
                    "Tag rule for {:?} uses unknown key {}",
                    rule.tags, rule.key
                )));
            }
            for tag in &rule.tags {
                if !seen.insert(tag.as_str()) {
                    return Err(Error::Config(format!("Tag {} is listed twice", tag)));
                }
            }
        }

        for (name, instance) in &self.instances {
            if let Some(ref url) = instance.hub_url {
                url::Url::parse(url).map_err(|e| {
                    Error::Config(format!("Instance {}: invalid hub_url {}: {}", name, url, e))
                })?;
            }
        }

        Ok(())
    }

    pub fn idle_tick(&self) -> Result<Duration> {
        parse_duration(&self.feed.idle_tick)
    }

    pub fn check_interval(&self) -> Result<Duration> {
        parse_duration(&self.signing.check_interval)
    }

    /// Topic carrying tag events
    pub fn tag_topic(&self) -> String {
        format!("{}buildsys.tag", self.feed.topic_prefix)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            interval: parse_duration(&self.retry.interval)?,
            backoff_short: parse_duration(&self.retry.backoff_short)?,
            backoff_long: parse_duration(&self.retry.backoff_long)?,
            backoff_threshold: self.retry.backoff_threshold,
        })
    }

    pub fn signer_settings(&self) -> Result<SignerSettings> {
        Ok(SignerSettings {
            batch_size: self.signing.batch_size,
            timeout_base: parse_duration(&self.signing.timeout_base)?,
            timeout_per_rpm: parse_duration(&self.signing.timeout_per_rpm)?,
            timeout_cap: parse_duration(&self.signing.timeout_cap)?,
            write_signed_copies: true,
        })
    }

    /// Built-in keys overlaid with the `[keys]` section
    pub fn key_catalog(&self) -> KeyCatalog {
        let mut catalog = KeyCatalog::builtin();
        for (name, info) in &self.keys {
            catalog.insert(name.clone(), KeyInfo::new(info.id.clone(), info.v3));
        }
        catalog
    }

    /// Whether any instance besides the primary one is configured
    pub fn has_secondary_instances(&self) -> bool {
        self.instances.keys().any(|name| name != PRIMARY_INSTANCE)
    }

    /// Keys the daemon needs passphrases for
    ///
    /// Every key named by a tag rule, plus its `-secondary` variant when
    /// secondary instances are configured.
    pub fn required_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for rule in &self.tags {
            keys.insert(rule.key.clone());
            if self.has_secondary_instances() {
                for name in self.instances.keys().filter(|n| *n != PRIMARY_INSTANCE) {
                    keys.insert(key_for_instance(&rule.key, name));
                }
            }
        }
        keys
    }

    /// Instance whose sigul setup serves `key`
    ///
    /// `-secondary` keys live on the first configured secondary instance, or
    /// on a generic "secondary" one when none is configured.
    pub fn instance_for_key(&self, key: &str) -> String {
        if !key.ends_with(SECONDARY_KEY_SUFFIX) {
            return PRIMARY_INSTANCE.to_string();
        }
        self.instances
            .keys()
            .find(|name| *name != PRIMARY_INSTANCE)
            .cloned()
            .unwrap_or_else(|| "secondary".to_string())
    }

    /// Settings for `instance`, falling back to an empty section
    pub fn instance(&self, name: &str) -> InstanceConfig {
        self.instances.get(name).cloned().unwrap_or_default()
    }

    /// Hub connection settings for `instance`
    pub fn hub_config(&self, instance: &str) -> HubConfig {
        let section = self.instance(instance);
        let mut hub = match (section.hub_url, instance == PRIMARY_INSTANCE) {
            (Some(url), _) => HubConfig::new(url),
            (None, true) => HubConfig::new(PRIMARY_HUB_URL),
            (None, false) => HubConfig::secondary(section.arch.as_deref().unwrap_or(instance)),
        };
        hub.client_cert = section.client_cert.map(|p| expand_home(&p));
        hub.server_ca = section.server_ca.map(|p| expand_home(&p));
        hub
    }

    /// sigul invocation for `key` on `instance`
    pub fn sigul_config(&self, instance: &str, key: &str, v3: bool) -> SigulConfig {
        let section = self.instance(instance);
        let primary = instance == PRIMARY_INSTANCE;

        let mut sigul = SigulConfig::new(key);
        sigul.binary = self.signing.sigul.clone();
        sigul.v3 = v3;
        sigul.arch = match section.arch {
            Some(arch) => Some(arch),
            None if primary => None,
            None => Some(instance.to_string()),
        };
        sigul.config_file = match section.sigul_config {
            Some(path) => Some(expand_home(&path)),
            None if primary => None,
            None => Some(expand_home(Path::new(SECONDARY_SIGUL_CONFIG))),
        };
        sigul
    }
}

/// Replace a leading `~/` with the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Key the first rule listing `tag` signs with
pub fn key_for_tag<'a>(rules: &'a [TagRule], tag: &str) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| rule.tags.iter().any(|t| t == tag))
        .map(|rule| rule.key.as_str())
}

/// Parse a duration string like "30s", "5m", "2h", "1d", "1w"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("Empty duration".to_string()));
    }

    // Bare numbers are seconds
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| Error::Config(format!("Invalid duration: {}", s)));
    }

    // Unit is the last character, which need not be ASCII
    let split = s.char_indices().last().map_or(0, |(i, _)| i);
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid duration number: {}", num_str)))?;

    let multiplier: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 604800,
        _ => return Err(Error::Config(format!("Invalid duration unit: {}", unit))),
    };
    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("Duration too large: {}", s)))?;

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5µ").is_err());
        assert!(parse_duration("µ").is_err());
        assert!(matches!(
            parse_duration("99999999999999999w"),
            Err(Error::Config(ref msg)) if msg.contains("too large")
        ));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        config.validate().unwrap();

        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.interval, Duration::from_secs(300));
        assert_eq!(policy.backoff_short, Duration::from_secs(300));
        assert_eq!(policy.backoff_long, Duration::from_secs(1800));
        assert_eq!(policy.backoff_threshold, 10);

        let settings = config.signer_settings().unwrap();
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.timeout_for(10), Duration::from_secs(70));

        assert_eq!(config.idle_tick().unwrap(), Duration::from_secs(60));
        assert_eq!(config.check_interval().unwrap(), Duration::from_secs(600));
        assert_eq!(config.tag_topic(), "org.fedoraproject.prod.buildsys.tag");
        assert_eq!(key_for_tag(&config.tags, "f22-rebuild"), Some("fedora-22"));
        assert_eq!(key_for_tag(&config.tags, "f21"), Some("fedora-21"));
        assert_eq!(key_for_tag(&config.tags, "f23"), None);
    }

    #[test]
    fn test_empty_file_matches_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.tags, default_tag_rules());
        assert!(config.instances.is_empty());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/autosigner.toml")).unwrap();
        assert_eq!(config.signing.batch_size, 50);
    }

    #[test]
    fn test_load_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[feed]
topic_prefix = "org.fedoraproject.stg."
idle_tick = "30s"

[retry]
interval = "1m"
backoff_threshold = 3

[signing]
batch_size = 1
sigul = "/usr/bin/sigul"

[[tags]]
tags = ["f23", "f23-candidate"]
key = "fedora-23"

[instances.primary]
hub_url = "https://koji.stg.fedoraproject.org/kojihub"

[instances.ppc]
sigul_config = "/etc/sigul/ppc.conf"

[keys.fedora-23]
id = "34EC9CBA"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.tag_topic(), "org.fedoraproject.stg.buildsys.tag");
        assert_eq!(config.idle_tick().unwrap(), Duration::from_secs(30));
        assert_eq!(config.retry_policy().unwrap().interval, Duration::from_secs(60));
        assert_eq!(config.retry_policy().unwrap().backoff_threshold, 3);
        assert_eq!(key_for_tag(&config.tags, "f23-candidate"), Some("fedora-23"));
        assert_eq!(key_for_tag(&config.tags, "f22"), None);

        let catalog = config.key_catalog();
        assert_eq!(catalog.get("fedora-23").unwrap().id, "34ec9cba");
        assert!(catalog.get("fedora-23").unwrap().v3);

        let required: Vec<_> = config.required_keys().into_iter().collect();
        assert_eq!(required, vec!["fedora-23", "fedora-23-secondary"]);

        let primary_hub = config.hub_config("primary");
        assert_eq!(primary_hub.url, "https://koji.stg.fedoraproject.org/kojihub");

        let ppc = config.sigul_config("ppc", "fedora-23-secondary", true);
        assert_eq!(ppc.arch.as_deref(), Some("ppc"));
        assert_eq!(ppc.config_file, Some(PathBuf::from("/etc/sigul/ppc.conf")));
        assert_eq!(ppc.binary, PathBuf::from("/usr/bin/sigul"));
    }

    #[test]
    fn test_instance_defaults() {
        let config = Config::default();

        assert_eq!(config.hub_config("primary").url, PRIMARY_HUB_URL);
        assert_eq!(
            config.hub_config("arm").url,
            "http://arm.koji.fedoraproject.org/kojihub"
        );

        let primary = config.sigul_config("primary", "fedora-22", true);
        assert!(primary.arch.is_none());
        assert!(primary.config_file.is_none());

        let arm = config.sigul_config("arm", "fedora-22-secondary", true);
        assert_eq!(arm.arch.as_deref(), Some("arm"));
        let conf = arm.config_file.unwrap();
        assert!(conf.ends_with(".sigul/client-secondary.conf"));
    }

    #[test]
    fn test_instance_for_key() {
        let mut config = Config::default();
        assert_eq!(config.instance_for_key("fedora-22"), "primary");
        assert_eq!(config.instance_for_key("fedora-22-secondary"), "secondary");

        config.instances.insert("primary".to_string(), InstanceConfig::default());
        config.instances.insert("s390".to_string(), InstanceConfig::default());
        assert_eq!(config.instance_for_key("fedora-22-secondary"), "s390");
    }

    #[test]
    fn test_required_keys_primary_only() {
        let config = Config::default();
        let required: Vec<_> = config.required_keys().into_iter().collect();
        assert_eq!(required, vec!["fedora-21", "fedora-22"]);
    }

    #[test]
    fn test_rejects_unknown_key() {
        let err = Config::parse(
            r#"
[[tags]]
tags = ["f99"]
key = "fedora-99"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("fedora-99"));
    }

    #[test]
    fn test_rejects_duplicate_tag_and_bad_duration() {
        let dup = r#"
[[tags]]
tags = ["f22"]
key = "fedora-22"

[[tags]]
tags = ["f22"]
key = "fedora-21"
"#;
        assert!(Config::parse(dup).is_err());
        assert!(Config::parse("[retry]\ninterval = \"soon\"\n").is_err());
        assert!(Config::parse("[signing]\nbatch_size = 0\n").is_err());
    }
}
