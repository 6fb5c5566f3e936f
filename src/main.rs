// src/main.rs

mod cli;
mod commands;

use anyhow::{Context, Result};
use autosigner::Config;
use cli::{Cli, Commands};
use commands::{SignMode, SignOptions};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_checked();

    // RUST_LOG wins over -v
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Commands::Run { credentials, events } => {
            commands::cmd_run(config, &credentials, events.as_deref())
        }
        Commands::Sign {
            credentials,
            key,
            builds,
            instance,
            tag,
            inherit,
            just_list,
            just_sign,
            just_write,
            write_all,
            batch_size,
        } => {
            let opts = SignOptions {
                key,
                builds,
                instance,
                tag,
                inherit,
                mode: SignMode::from_flags(just_list, just_sign, just_write),
                write_all,
                batch_size,
            };
            commands::cmd_sign(config, &credentials, opts)
        }
        Commands::CheckKeys {
            credentials,
            keys,
            once,
            interval,
        } => commands::cmd_check_keys(config, &credentials, keys, once, interval.as_deref()),
    }
}
