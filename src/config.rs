use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub soffice: Soffice,
    #[serde(default)]
    pub unoconverter: Unoconverter,
    #[serde(default)]
    pub extensions: Extensions,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

/// Supervision policy for the single engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub auto_start: bool,
    pub start_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub conversion_timeout_ms: u64,
    pub restart_after: u64,
    pub max_queue_size: usize,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            auto_start: true,
            start_timeout_ms: 20_000,
            stop_grace_ms: 5_000,
            conversion_timeout_ms: 120_000,
            restart_after: 10,
            max_queue_size: 0,
        }
    }
}

impl Engine {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// `None` when conversions may run unbounded.
    pub fn conversion_timeout(&self) -> Option<Duration> {
        (self.conversion_timeout_ms > 0).then(|| Duration::from_millis(self.conversion_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Soffice {
    pub binary: String,
    pub host: String,
    pub port: u16,
    pub profile_root: String,
    pub health_probe_ms: u64,
}
impl Default for Soffice {
    fn default() -> Self {
        Self {
            binary: "soffice".into(),
            host: "127.0.0.1".into(),
            port: 2002,
            profile_root: "".into(),
            health_probe_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unoconverter {
    pub binary: String,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Unoconverter {
    fn default() -> Self {
        Self {
            binary: "unoconverter".into(),
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extensions {
    /// Replaces the built-in input extension list when non-empty.
    pub override_list: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_converter_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_converter_stderr: true,
            dump_effective_config: false,
        }
    }
}
