//! Service configuration.
//!
//! Values come from built-in defaults, then an optional `stamp.toml`, then
//! environment overrides. Loading happens once at startup in the server
//! binary, so errors are reported through `anyhow`.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::api::JobOptions;
use crate::io::DEFAULT_MIN_VALID_POINTS;
use crate::services::cache::ResultCache;
use crate::services::gap_fill::DEFAULT_MAX_GAP_COLUMNS;
use crate::services::job_runner::RunnerConfig;
use crate::services::pipeline::Assembly;
use crate::services::progress::DEFAULT_ETA_WINDOW;
use crate::services::visits::{self, DEFAULT_GAP_THRESHOLD_HOURS};

pub const CONFIG_FILE_NAME: &str = "stamp.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StampConfig {
    pub server: ServerSettings,
    pub jobs: JobSettings,
    pub cache: CacheSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_upload_mb: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub retention_secs: u64,
    /// `None` disables the stall watchdog.
    pub stall_timeout_secs: Option<u64>,
    pub watchdog_interval_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            stall_timeout_secs: Some(600),
            watchdog_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 86_400,
            max_entries: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub gap_threshold_hours: f64,
    pub min_valid_points: usize,
    pub max_gap_columns: usize,
    pub eta_window: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            gap_threshold_hours: DEFAULT_GAP_THRESHOLD_HOURS,
            min_valid_points: DEFAULT_MIN_VALID_POINTS,
            max_gap_columns: DEFAULT_MAX_GAP_COLUMNS,
            eta_window: DEFAULT_ETA_WINDOW,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value {:?} for {}: {}", value, key, e))
}

impl StampConfig {
    /// Parse a TOML document. Missing sections and keys take defaults.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StampConfig = toml::from_str(content).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// First `stamp.toml` found in the current directory, `backend/`, or the
    /// parent directory.
    pub fn find_default_file() -> Option<PathBuf> {
        [
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from("backend").join(CONFIG_FILE_NAME),
            PathBuf::from("..").join(CONFIG_FILE_NAME),
        ]
        .into_iter()
        .find(|p| p.exists())
    }

    /// Defaults, then `$STAMP_CONFIG` or the first default file, then
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match env::var("STAMP_CONFIG").ok().map(PathBuf::from) {
            Some(path) => Self::from_file(&path)?,
            None => match Self::find_default_file() {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `HOST`, `PORT` and the `STAMP_*` overrides using `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = lookup("STAMP_CACHE_ENABLED") {
            self.cache.enabled = parse_env("STAMP_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("STAMP_JOB_RETENTION_SECS") {
            self.jobs.retention_secs = parse_env("STAMP_JOB_RETENTION_SECS", &v)?;
        }
        if let Some(v) = lookup("STAMP_STALL_TIMEOUT_SECS") {
            let secs: u64 = parse_env("STAMP_STALL_TIMEOUT_SECS", &v)?;
            self.jobs.stall_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = lookup("STAMP_GAP_THRESHOLD_HOURS") {
            self.pipeline.gap_threshold_hours = parse_env("STAMP_GAP_THRESHOLD_HOURS", &v)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if visits::validate_threshold(self.pipeline.gap_threshold_hours).is_err() {
            bail!(
                "pipeline.gap_threshold_hours must be a positive number (got {})",
                self.pipeline.gap_threshold_hours
            );
        }
        if self.pipeline.min_valid_points == 0 {
            bail!("pipeline.min_valid_points must be at least 1");
        }
        if self.pipeline.eta_window == 0 {
            bail!("pipeline.eta_window must be at least 1");
        }
        if self.server.max_upload_mb == 0 {
            bail!("server.max_upload_mb must be at least 1");
        }
        if self.jobs.watchdog_interval_secs == 0 {
            bail!("jobs.watchdog_interval_secs must be at least 1");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            bail!("cache.max_entries must be at least 1 when the cache is enabled");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            stall_timeout: self.jobs.stall_timeout_secs.map(Duration::from_secs),
            retention: Duration::from_secs(self.jobs.retention_secs),
            watchdog_interval: Duration::from_secs(self.jobs.watchdog_interval_secs),
            eta_window: self.pipeline.eta_window,
        }
    }

    pub fn build_cache(&self) -> Option<ResultCache<Assembly>> {
        self.cache.enabled.then(|| {
            ResultCache::new(Duration::from_secs(self.cache.ttl_secs), self.cache.max_entries)
        })
    }

    /// Job options a submission starts from before its own overrides.
    pub fn job_defaults(&self) -> JobOptions {
        JobOptions {
            gap_threshold_hours: self.pipeline.gap_threshold_hours,
            min_valid_points: self.pipeline.min_valid_points,
            max_gap_columns: self.pipeline.max_gap_columns,
            ..JobOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = StampConfig::from_toml_str("").unwrap();
        assert_eq!(config, StampConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.pipeline.gap_threshold_hours, 0.5);
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
[server]
port = 9000

[cache]
enabled = false

[jobs]
stall_timeout_secs = 30
"#;
        let config = StampConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.build_cache().is_none());
        assert_eq!(config.runner_config().stall_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.runner_config().retention, Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_value_names_key() {
        let err = StampConfig::from_toml_str("[pipeline]\ngap_threshold_hours = -1.0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("gap_threshold_hours"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "7000"),
            ("STAMP_CACHE_ENABLED", "false"),
            ("STAMP_STALL_TIMEOUT_SECS", "0"),
            ("STAMP_GAP_THRESHOLD_HOURS", "1.5"),
        ]
        .into_iter()
        .collect();
        let mut config = StampConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 7000);
        assert!(!config.cache.enabled);
        assert_eq!(config.jobs.stall_timeout_secs, None);
        assert_eq!(config.job_defaults().gap_threshold_hours, 1.5);

        let err = StampConfig::default()
            .apply_overrides(|k| (k == "PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
