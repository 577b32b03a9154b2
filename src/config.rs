use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::sampler::options::{self, PluginOptions, SchemaCheck};
use crate::source::DEFAULT_SOURCE_PATH;

/// Top-level configuration for the vmsampler daemon.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Counter file to discover and sample. Default: "/proc/vmstat".
    #[serde(default = "default_source_path")]
    pub source_path: PathBuf,

    /// Name the metric set is published under.
    #[serde(default)]
    pub set_name: String,

    /// Identifies the monitored entity in every sample. Default: 0.
    #[serde(default)]
    pub component_id: u64,

    /// How sampled lines are matched to metrics. Default: positional.
    #[serde(default)]
    pub schema_check: SchemaCheck,

    /// Time between sampling passes. Default: 1s.
    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Prometheus exposition server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Prometheus exposition server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_source_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOURCE_PATH)
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            source_path: default_source_path(),
            set_name: String::new(),
            component_id: 0,
            schema_check: SchemaCheck::default(),
            sample_interval: default_sample_interval(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.source_path.as_os_str().is_empty() {
            bail!("source_path is required");
        }

        if self.set_name.is_empty() {
            bail!("set_name is required");
        }

        if self.set_name.chars().any(char::is_whitespace) {
            bail!("set_name must not contain whitespace: {:?}", self.set_name);
        }

        if self.sample_interval.is_zero() {
            bail!("sample_interval must be positive");
        }

        if self.health.addr.is_empty() {
            bail!("health.addr is required");
        }

        Ok(())
    }

    /// Log filter to install: an explicit command-line level wins over the
    /// file's `log_level`.
    pub fn log_filter<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        flag.unwrap_or(&self.log_level)
    }

    /// Render the plugin options the sampler is configured with.
    pub fn plugin_options(&self) -> PluginOptions {
        let mut opts = PluginOptions::new();
        opts.insert(options::KEY_COMPONENT_ID, self.component_id.to_string())
            .insert(options::KEY_SCHEMA_CHECK, self.schema_check.as_str())
            .insert(options::KEY_SET, self.set_name.as_str());
        opts
    }
}
