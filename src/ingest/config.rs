// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::IngestError;

const ENV_PATH: &str = "INGEST_CONFIG_PATH";
const ENV_INTERVAL: &str = "INGEST_PULL_INTERVAL_SECS";
const ENV_CONCURRENCY: &str = "INGEST_MAX_CONCURRENT_PULLS";
const DEFAULT_PATH: &str = "config/ingest.toml";

fn default_interval_secs() -> u64 {
    8 * 3600
}
fn default_max_concurrent() -> usize {
    16
}
fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiscourseCfg {
    pub base_url: String,
    /// Cap on posts fetched per pull; reaching it truncates the result.
    pub max_posts: usize,
    pub max_pages: u32,
}

impl Default for DiscourseCfg {
    fn default() -> Self {
        Self {
            base_url: "https://meta.discourse.org".into(),
            max_posts: 50,
            max_pages: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IntercomCfg {
    pub base_url: String,
    pub max_pages: u32,
    pub per_page: u32,
}

impl Default for IntercomCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.intercom.io".into(),
            max_pages: 10,
            per_page: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaystoreCfg {
    pub base_url: String,
    pub max_pages: u32,
}

impl Default for PlaystoreCfg {
    fn default() -> Self {
        Self {
            base_url: "https://androidpublisher.googleapis.com/androidpublisher/v3".into(),
            max_pages: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub pull_interval_secs: u64,
    pub max_concurrent_pulls: usize,
    /// Per-subscription deadline; defaults to (and is clamped to) the interval.
    pub pull_timeout_secs: Option<u64>,
    pub http_timeout_secs: u64,
    pub discourse: DiscourseCfg,
    pub intercom: IntercomCfg,
    pub playstore: PlaystoreCfg,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pull_interval_secs: default_interval_secs(),
            max_concurrent_pulls: default_max_concurrent(),
            pull_timeout_secs: None,
            http_timeout_secs: default_http_timeout_secs(),
            discourse: DiscourseCfg::default(),
            intercom: IntercomCfg::default(),
            playstore: PlaystoreCfg::default(),
        }
    }
}

impl IngestConfig {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        let secs = self
            .pull_timeout_secs
            .unwrap_or(self.pull_interval_secs)
            .min(self.pull_interval_secs);
        Duration::from_secs(secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.pull_interval_secs == 0 {
            return Err(IngestError::Config("pull_interval_secs must be > 0".into()));
        }
        if self.max_concurrent_pulls == 0 {
            return Err(IngestError::Config("max_concurrent_pulls must be > 0".into()));
        }
        if self.pull_timeout_secs == Some(0) {
            return Err(IngestError::Config("pull_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_INTERVAL) {
            self.pull_interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_INTERVAL}={v} is not a number"))?;
        }
        if let Ok(v) = std::env::var(ENV_CONCURRENCY) {
            self.max_concurrent_pulls = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CONCURRENCY}={v} is not a number"))?;
        }
        Ok(())
    }
}

pub fn parse_config(s: &str) -> Result<IngestConfig> {
    let cfg: IngestConfig = toml::from_str(s).context("parsing ingest config toml")?;
    Ok(cfg)
}

/// Load from an explicit path, then apply env overrides and validate.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    finish(parse_config(&content)?)
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let default_p = PathBuf::from(DEFAULT_PATH);
    if default_p.exists() {
        return load_config_from(&default_p);
    }
    finish(IngestConfig::default())
}

fn finish(mut cfg: IngestConfig) -> Result<IngestConfig> {
    cfg.apply_env_overrides()?;
    cfg.validate()?;
    Ok(cfg)
}
