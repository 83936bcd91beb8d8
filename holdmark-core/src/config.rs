//! Configuration and process-wide tunables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Environment variable that allows a CreateTXG range bound of 0.
pub const ALLOW_CREATETXG_ZERO_ENV: &str = "HOLDMARK_ALLOW_CREATETXG_ZERO";

static ALLOW_CREATETXG_ZERO: LazyLock<AtomicBool> = LazyLock::new(|| {
    let allowed = std::env::var(ALLOW_CREATETXG_ZERO_ENV)
        .ok()
        .and_then(|v| parse_env_bool(&v))
        .unwrap_or(false);
    AtomicBool::new(allowed)
});

/// Whether range bounds may use CreateTXG 0.
pub fn allow_createtxg_zero() -> bool {
    ALLOW_CREATETXG_ZERO.load(Ordering::Relaxed)
}

pub fn set_allow_createtxg_zero(allow: bool) {
    ALLOW_CREATETXG_ZERO.store(allow, Ordering::Relaxed);
}

fn parse_env_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Tool configuration, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Path or name of the `zfs` binary.
    #[serde(default = "default_zfs_binary")]
    pub zfs_binary: PathBuf,
    /// Number of filesystems scanned concurrently when a query doesn't say.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    /// Accept CreateTXG 0 as a range bound.
    #[serde(default)]
    pub allow_createtxg_zero: bool,
}

fn default_zfs_binary() -> PathBuf {
    PathBuf::from("zfs")
}

fn default_concurrency() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zfs_binary: default_zfs_binary(),
            default_concurrency: default_concurrency(),
            allow_createtxg_zero: false,
        }
    }
}

impl Config {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config JSON {:?}", path))?;
        if config.default_concurrency == 0 {
            anyhow::bail!("default_concurrency must be >= 1");
        }
        Ok(config)
    }

    /// Save config to `path` (write to a temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Apply process-wide settings. The environment can enable
    /// `allow_createtxg_zero` but the config can't disable it again.
    pub fn apply(&self) {
        if self.allow_createtxg_zero {
            set_allow_createtxg_zero(true);
        }
    }
}
