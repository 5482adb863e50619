//! OCI configuration file parsing.
//!
//! The file is the standard `~/.oci/config` INI format; only the `[DEFAULT]`
//! profile is read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// API-key credentials loaded from an OCI configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciProfile {
    pub user: String,
    pub fingerprint: String,
    pub tenancy: String,
    pub region: String,
    pub key_file: PathBuf,
}

impl OciProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read OCI config file {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("invalid OCI config file {}", path.display()))
    }

    fn parse(text: &str) -> Result<Self> {
        let mut section = String::new();
        let mut values: HashMap<&str, String> = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            if section != "DEFAULT" {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("malformed line in [DEFAULT] profile: {line}");
            };
            match key.trim() {
                key @ ("user" | "fingerprint" | "tenancy" | "region" | "key_file") => {
                    values.insert(key, value.trim().to_string());
                }
                _ => {}
            }
        }

        let mut require = |key: &str| {
            values
                .remove(key)
                .with_context(|| format!("missing '{key}' in [DEFAULT] profile"))
        };
        Ok(Self {
            user: require("user")?,
            fingerprint: require("fingerprint")?,
            tenancy: require("tenancy")?,
            region: require("region")?,
            key_file: expand_home(&require("key_file")?),
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
