// src/cli/mod.rs
//! CLI definitions for autosigner
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `run` - Sign builds as tag events arrive
//! - `sign` - Sign explicit builds or a whole tag once
//! - `check-keys` - Monitor that sigul can unlock the signing keys

use autosigner::config::DEFAULT_CONFIG_PATH;
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "autosigner")]
#[command(author = "Autosigner Contributors")]
#[command(version)]
#[command(about = "Automatic RPM signing for Koji builds via Sigul", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parse the process arguments, exiting on usage errors
    pub fn parse_checked() -> Self {
        let cli = Self::parse();
        if let Err(e) = cli.check() {
            e.exit();
        }
        cli
    }

    /// Rules between arguments that clap does not enforce on plain flags
    pub fn check(&self) -> Result<(), clap::Error> {
        if let Commands::Sign {
            inherit: true,
            tag: None,
            ..
        } = &self.command
        {
            return Err(Self::command().error(
                ErrorKind::MissingRequiredArgument,
                "--inherit can only be used with --tag <TAG>",
            ));
        }
        Ok(())
    }
}

/// How passphrases are obtained
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Read passphrases as a JSON object {"key": "passphrase"} from stdin
    #[arg(long)]
    pub batch: bool,

    /// Do not check the passphrases with sigul before starting
    #[arg(long)]
    pub skip_validation: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sign builds as they are tagged
    ///
    /// Reads newline-delimited JSON bus messages from the event feed and
    /// signs every build tagged into a watched tag. Builds that do not end
    /// fully signed are retried later with backoff.
    Run {
        #[command(flatten)]
        credentials: CredentialArgs,

        /// Event feed to read ("-" or omitted for stdin)
        #[arg(long, value_name = "PATH")]
        events: Option<PathBuf>,
    },

    /// Sign the unsigned RPMs of some builds
    Sign {
        #[command(flatten)]
        credentials: CredentialArgs,

        /// Signing key name (e.g. fedora-22)
        key: String,

        /// Builds to sign, as NVRs or build IDs
        builds: Vec<String>,

        /// Build-system instance the builds live on
        #[arg(long, default_value = "primary")]
        instance: String,

        /// Sign the latest builds of this tag instead of explicit builds
        #[arg(long, conflicts_with = "builds")]
        tag: Option<String>,

        /// Include builds inherited by the tag (needs --tag)
        #[arg(long)]
        inherit: bool,

        /// Only print the unsigned RPMs
        #[arg(long, conflicts_with_all = ["just_sign", "just_write"])]
        just_list: bool,

        /// Sign but do not write out signed copies
        #[arg(long, conflicts_with = "just_write")]
        just_sign: bool,

        /// Only write out signed copies of already signed RPMs
        #[arg(long)]
        just_write: bool,

        /// Write out every RPM of the build, not just the signed ones
        #[arg(long, conflicts_with_all = ["just_list", "just_sign"])]
        write_all: bool,

        /// Maximum RPMs per sigul invocation (overrides the config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Check periodically that sigul accepts the key passphrases
    CheckKeys {
        #[command(flatten)]
        credentials: CredentialArgs,

        /// Keys to check (default: every key the daemon needs)
        keys: Vec<String>,

        /// Check once and exit
        #[arg(long)]
        once: bool,

        /// Time between checks, e.g. "10m" (overrides the config)
        #[arg(long)]
        interval: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        let cli = Cli::try_parse_from(args)?;
        cli.check()?;
        Ok(cli)
    }

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sign() {
        let cli = Cli::try_parse_from([
            "autosigner", "-vv", "sign", "--just-sign", "fedora-22", "foo-1.0-1.fc22", "12345",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Sign { key, builds, just_sign, instance, .. } => {
                assert_eq!(key, "fedora-22");
                assert_eq!(builds, vec!["foo-1.0-1.fc22", "12345"]);
                assert!(just_sign);
                assert_eq!(instance, "primary");
            }
            _ => panic!("expected sign"),
        }
    }

    #[test]
    fn test_sign_mode_conflicts() {
        assert!(parse(&["autosigner", "sign", "--just-list", "--just-sign", "k", "b"]).is_err());
        assert!(parse(&["autosigner", "sign", "--tag", "f22", "--inherit", "k"]).is_ok());

        let err = parse(&["autosigner", "sign", "--inherit", "k", "b"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_parse_run_batch() {
        let cli = Cli::try_parse_from([
            "autosigner", "--config", "/tmp/a.toml", "run", "--batch", "--events", "/run/feed",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/a.toml"));
        match cli.command {
            Commands::Run { credentials, events } => {
                assert!(credentials.batch);
                assert!(!credentials.skip_validation);
                assert_eq!(events, Some(PathBuf::from("/run/feed")));
            }
            _ => panic!("expected run"),
        }
    }
}
