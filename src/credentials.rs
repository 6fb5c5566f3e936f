// src/credentials.rs

//! Signing key passphrases
//!
//! Passphrases come either from a JSON object on standard input (`--batch`)
//! or from an interactive prompt with terminal echo disabled. They are held
//! in [`Zeroizing`] buffers and never printed.

use crate::error::{Error, Result};
use nix::sys::termios::{self, LocalFlags, SetArg};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::os::fd::AsFd;
use tracing::warn;
use zeroize::Zeroizing;

/// A signing key passphrase
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Raw secret, for writing to the signer's stdin
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

/// Passphrases keyed by signing key name
#[derive(Debug, Clone, Default)]
pub struct Passphrases {
    by_key: HashMap<String, Passphrase>,
}

impl Passphrases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, passphrase: Passphrase) {
        self.by_key.insert(key.into(), passphrase);
    }

    pub fn get(&self, key: &str) -> Option<&Passphrase> {
        self.by_key.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    /// Parse a `{"key-name": "passphrase", ...}` JSON object
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_reader(reader)
            .map_err(|e| Error::ParseError(format!("Invalid passphrase JSON: {}", e)))?;

        let mut passphrases = Self::new();
        for (key, secret) in raw {
            passphrases.insert(key, Passphrase::new(secret));
        }
        Ok(passphrases)
    }

    /// Prompt on the terminal for each key, echo disabled
    pub fn prompt<'a>(keys: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut passphrases = Self::new();
        for key in keys {
            let secret = prompt_hidden(&format!("Sigul {} passphrase: ", key))?;
            passphrases.insert(key, Passphrase::new(secret));
        }
        Ok(passphrases)
    }

    /// Fail unless every required key has a non-empty passphrase
    pub fn require<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for key in keys {
            match self.get(key) {
                Some(p) if !p.is_empty() => {}
                _ => return Err(Error::MissingCredential(key.to_string())),
            }
        }
        Ok(())
    }
}

/// Read one line from stdin with terminal echo turned off
fn prompt_hidden(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    let stdin = io::stdin();
    let saved = match termios::tcgetattr(stdin.as_fd()) {
        Ok(attrs) => Some(attrs),
        Err(e) => {
            warn!("stdin is not a terminal ({}), passphrase will be echoed", e);
            None
        }
    };

    if let Some(ref attrs) = saved {
        let mut hidden = attrs.clone();
        hidden.local_flags.remove(LocalFlags::ECHO);
        hidden.local_flags.insert(LocalFlags::ECHONL);
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &hidden)
            .map_err(|e| Error::IoError(format!("Failed to disable echo: {}", e)))?;
    }

    let mut line = Zeroizing::new(String::new());
    let read = stdin.lock().read_line(&mut line);

    if let Some(ref attrs) = saved {
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, attrs)
            .map_err(|e| Error::IoError(format!("Failed to restore echo: {}", e)))?;
    }

    if read? == 0 {
        return Err(Error::IoError("Incomplete passphrase: end of input".to_string()));
    }

    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
