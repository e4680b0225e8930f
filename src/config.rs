use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::fortuna::OnUnseeded;

const DEFAULT_CONFIG: &str = "/etc/fortunad.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnseededPolicy {
    /// Fail reads until the first reseed
    Fail,
    /// Hold reads until the first reseed or the seed timeout
    Block,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub unseeded: UnseededPolicy,
    pub seed_timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            unseeded: UnseededPolicy::Fail,
            seed_timeout_ms: 5000,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&mut self) {
        self.seed_timeout_ms = self.seed_timeout_ms.clamp(1, 600_000);
    }

    pub fn on_unseeded(&self) -> OnUnseeded {
        match self.unseeded {
            UnseededPolicy::Fail => OnUnseeded::Fail,
            UnseededPolicy::Block => {
                OnUnseeded::Block(Duration::from_millis(self.seed_timeout_ms))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub enable_hwrng: bool,
    pub enable_ctxt: bool,
    pub enable_timestamp: bool,
    pub hwrng_interval_ms: u64,
    pub ctxt_interval_ms: u64,
    pub timestamp_interval_ms: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enable_hwrng: true,
            enable_ctxt: true,
            enable_timestamp: true,
            hwrng_interval_ms: 1000,
            ctxt_interval_ms: 30_000,
            timestamp_interval_ms: 500,
        }
    }
}

impl SourcesConfig {
    pub fn validate(&mut self) {
        self.hwrng_interval_ms = self.hwrng_interval_ms.clamp(10, 3_600_000);
        self.ctxt_interval_ms = self.ctxt_interval_ms.clamp(10, 3_600_000);
        self.timestamp_interval_ms = self.timestamp_interval_ms.clamp(10, 3_600_000);
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket: PathBuf,
    /// Capacity of the write-entropy queue; 0 rejects writes.
    pub write_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/fortunad/random.sock"),
            write_queue: 10,
        }
    }
}

impl ServerConfig {
    pub fn validate(&mut self) {
        self.write_queue = self.write_queue.min(1024);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub generator: GeneratorConfig,
    pub sources: SourcesConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Clamp every section to valid ranges.
    pub fn validate(&mut self) {
        self.generator.validate();
        self.sources.validate();
        self.server.validate();
    }
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/fortunad.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    Ok(config)
}
