//! TOML configuration for the fabricbench server and launcher.
//!
//! Every field has a default so the binary runs with no config file at
//! all; a file given explicitly must parse, while the fallback locations
//! are best-effort.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Environment variable naming an alternate config file path.
pub const CONFIG_ENV: &str = "FABRICBENCH_CONFIG";

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "fabricbench.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP API.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Root directory for stored host lists.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Path to the mpirun launcher on the head node.
    #[serde(default = "default_mpirun")]
    pub mpirun: String,
    /// Path to the collective benchmark binary distributed to all nodes.
    #[serde(default = "default_bench_binary")]
    pub bench_binary: String,
    /// Timeout applied to blocking runs that request none.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            mpirun: default_mpirun(),
            bench_binary: default_bench_binary(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_mpirun() -> String {
    "/opt/hpc/bin/mpirun".to_string()
}

fn default_bench_binary() -> String {
    "/opt/hpc/libexec/nccl-tests/all_reduce_perf".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration: an explicit path must load; otherwise try the
    /// `FABRICBENCH_CONFIG` env var, then `./fabricbench.toml`, then
    /// built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using defaults");
        Ok(Self::default())
    }
}
