// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: read passphrases from stdin
fn batch_arg() -> Arg {
    Arg::new("batch")
        .long("batch")
        .action(ArgAction::SetTrue)
        .help("Read passphrases as a JSON object {\"key\": \"passphrase\"} from stdin")
}

/// Common argument: skip the startup passphrase check
fn skip_validation_arg() -> Arg {
    Arg::new("skip_validation")
        .long("skip-validation")
        .action(ArgAction::SetTrue)
        .help("Do not check the passphrases with sigul before starting")
}

fn flag(name: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(long).action(ArgAction::SetTrue).help(help)
}

fn build_cli() -> Command {
    Command::new("autosigner")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Autosigner Contributors")
        .about("Automatic RPM signing for Koji builds via Sigul")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase log verbosity (-v debug, -vv trace)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("/etc/autosigner/autosigner.toml")
                .help("Path to the configuration file"),
        )
        .subcommand(
            Command::new("run")
                .about("Sign builds as they are tagged")
                .arg(batch_arg())
                .arg(skip_validation_arg())
                .arg(
                    Arg::new("events")
                        .long("events")
                        .value_name("PATH")
                        .help("Event feed to read (\"-\" or omitted for stdin)"),
                ),
        )
        .subcommand(
            Command::new("sign")
                .about("Sign the unsigned RPMs of some builds")
                .arg(batch_arg())
                .arg(skip_validation_arg())
                .arg(Arg::new("key").required(true).help("Signing key name (e.g. fedora-22)"))
                .arg(Arg::new("builds").num_args(0..).help("Builds to sign, as NVRs or build IDs"))
                .arg(
                    Arg::new("instance")
                        .long("instance")
                        .default_value("primary")
                        .help("Build-system instance the builds live on"),
                )
                .arg(Arg::new("tag").long("tag").help("Sign the latest builds of this tag"))
                .arg(flag("inherit", "inherit", "Include builds inherited by the tag (needs --tag)"))
                .arg(flag("just_list", "just-list", "Only print the unsigned RPMs"))
                .arg(flag("just_sign", "just-sign", "Sign but do not write out signed copies"))
                .arg(flag("just_write", "just-write", "Only write out signed copies"))
                .arg(flag("write_all", "write-all", "Write out every RPM of the build"))
                .arg(
                    Arg::new("batch_size")
                        .long("batch-size")
                        .help("Maximum RPMs per sigul invocation"),
                ),
        )
        .subcommand(
            Command::new("check-keys")
                .about("Check periodically that sigul accepts the key passphrases")
                .arg(batch_arg())
                .arg(skip_validation_arg())
                .arg(Arg::new("keys").num_args(0..).help("Keys to check"))
                .arg(flag("once", "once", "Check once and exit"))
                .arg(Arg::new("interval").long("interval").help("Time between checks, e.g. \"10m\"")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("autosigner.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
