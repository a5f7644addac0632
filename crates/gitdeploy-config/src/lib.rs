//! Configuration loading for `gitdeploy`.
//!
//! Configuration is a single TOML file (default `gitdeploy.toml`),
//! merged with `GITDEPLOY_<KEY>` environment variable overrides. Every
//! field has a default so a bare `gitdeploy.toml` with only the keys an
//! operator cares about is valid.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gitdeploy_types::{deserialize_duration, serialize_duration};

/// Default config file name, searched for by [`find_config`].
pub const CONFIG_FILE_NAME: &str = "gitdeploy.toml";

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_scripts_path() -> PathBuf {
    PathBuf::from("./scripts")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_debounce_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_stale_job_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_stale_log_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_expired_log_age() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_max_job_time() -> Duration {
    Duration::from_secs(30 * 60)
}

/// The keys the core engine consumes, per the on-disk configuration contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_scripts_path")]
    pub scripts_path: PathBuf,
    /// Whitespace/comma tokenized trust list; tokenization happens at match time.
    #[serde(default)]
    pub repo_list: String,
    /// Ordered, lowest-ranked first; promoting from entry N goes to entry N-1.
    #[serde(default)]
    pub promotions: Vec<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    #[serde(
        default = "default_debounce_delay",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub debounce_delay: Duration,
    #[serde(
        default = "default_stale_job_age",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub stale_job_age: Duration,
    #[serde(
        default = "default_stale_log_age",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub stale_log_age: Duration,
    #[serde(
        default = "default_expired_log_age",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub expired_log_age: Duration,
    #[serde(
        default = "default_max_job_time",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub default_max_job_time: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            scripts_path: default_scripts_path(),
            repo_list: String::new(),
            promotions: Vec::new(),
            log_dir: default_log_dir(),
            tmp_dir: default_tmp_dir(),
            debounce_delay: default_debounce_delay(),
            stale_job_age: default_stale_job_age(),
            stale_log_age: default_stale_log_age(),
            expired_log_age: default_expired_log_age(),
            default_max_job_time: default_max_job_time(),
        }
    }
}

impl Config {
    /// Combine two configs, with `other`'s non-default-equal fields winning.
    ///
    /// Used to layer environment overrides on top of a file-loaded config.
    pub fn merge(self, other: PartialConfig) -> Self {
        Self {
            addr: other.addr.unwrap_or(self.addr),
            scripts_path: other.scripts_path.unwrap_or(self.scripts_path),
            repo_list: other.repo_list.unwrap_or(self.repo_list),
            promotions: other.promotions.unwrap_or(self.promotions),
            log_dir: other.log_dir.unwrap_or(self.log_dir),
            tmp_dir: other.tmp_dir.unwrap_or(self.tmp_dir),
            debounce_delay: other.debounce_delay.unwrap_or(self.debounce_delay),
            stale_job_age: other.stale_job_age.unwrap_or(self.stale_job_age),
            stale_log_age: other.stale_log_age.unwrap_or(self.stale_log_age),
            expired_log_age: other.expired_log_age.unwrap_or(self.expired_log_age),
            default_max_job_time: other
                .default_max_job_time
                .unwrap_or(self.default_max_job_time),
        }
    }
}

/// A sparse overlay of [`Config`], used for the environment-variable override layer.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub addr: Option<String>,
    pub scripts_path: Option<PathBuf>,
    pub repo_list: Option<String>,
    pub promotions: Option<Vec<String>>,
    pub log_dir: Option<PathBuf>,
    pub tmp_dir: Option<PathBuf>,
    pub debounce_delay: Option<Duration>,
    pub stale_job_age: Option<Duration>,
    pub stale_log_age: Option<Duration>,
    pub expired_log_age: Option<Duration>,
    pub default_max_job_time: Option<Duration>,
}

impl PartialConfig {
    /// Read `GITDEPLOY_<KEY>` overrides from the process environment.
    pub fn from_env() -> Self {
        Self {
            addr: env::var("GITDEPLOY_ADDR").ok(),
            scripts_path: env::var("GITDEPLOY_SCRIPTS_PATH").ok().map(PathBuf::from),
            repo_list: env::var("GITDEPLOY_REPO_LIST").ok(),
            promotions: env::var("GITDEPLOY_PROMOTIONS").ok().map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            log_dir: env::var("GITDEPLOY_LOG_DIR").ok().map(PathBuf::from),
            tmp_dir: env::var("GITDEPLOY_TMP_DIR").ok().map(PathBuf::from),
            debounce_delay: env_duration("GITDEPLOY_DEBOUNCE_DELAY"),
            stale_job_age: env_duration("GITDEPLOY_STALE_JOB_AGE"),
            stale_log_age: env_duration("GITDEPLOY_STALE_LOG_AGE"),
            expired_log_age: env_duration("GITDEPLOY_EXPIRED_LOG_AGE"),
            default_max_job_time: env_duration("GITDEPLOY_DEFAULT_MAX_JOB_TIME"),
        }
    }
}

fn env_duration(key: &str) -> Option<Duration> {
    env::var(key).ok().and_then(|v| humantime::parse_duration(&v).ok())
}

/// Load config from `path`, falling back to defaults for any file that doesn't exist.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Load config from `path` (or defaults if absent), then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let file_config = load_config_from_file(path)?;
    Ok(file_config.merge(PartialConfig::from_env()))
}

/// Write `config` as TOML to `path`.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config dir {}", parent.display()))?;
    }

    let toml_string = toml::to_string_pretty(config).context("failed to serialize config")?;
    fs::write(path, toml_string)
        .with_context(|| format!("failed to write config file {}", path.display()))
}

/// Walk up from `start` looking for [`CONFIG_FILE_NAME`].
pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

/// Default config path: `./gitdeploy.toml` in the current working directory.
pub fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE_NAME)
}
