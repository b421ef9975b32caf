use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::{DEFAULT_HIGHLIGHT_COUNT, DEFAULT_MIN_GROUP_SIZE};
use crate::policy::{ConfigurationError, PolicyLists, PolicyTables};
use crate::pool::DEFAULT_MAX_CONCURRENCY;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "dwell.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub jira: JiraConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub report: ReportConfig,
    /// Replaces the built-in policy tables; all six lists are required.
    #[serde(default)]
    pub policy: Option<PolicyLists>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraConfig {
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    #[serde(default = "default_highlight_count")]
    pub highlight_count: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            min_group_size: default_min_group_size(),
            highlight_count: default_highlight_count(),
        }
    }
}

impl Config {
    /// Reject values the run cannot honor.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "fetch.max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }

        let bad_url = self
            .jira
            .base_url
            .as_deref()
            .filter(|url| !(url.starts_with("https://") || url.starts_with("http://")));
        if let Some(url) = bad_url {
            return Err(ConfigError::Invalid {
                key: "jira.base_url",
                reason: format!("'{url}' is not an http(s) URL"),
            });
        }

        Ok(())
    }

    /// The configured policy tables, or the built-in ones.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError`] when the tables overlap or are incomplete.
    pub fn policy_tables(&self) -> Result<PolicyTables, ConfigurationError> {
        self.policy
            .as_ref()
            .map_or_else(PolicyTables::builtin, PolicyTables::from_lists)
    }
}

/// Load and validate the config at `path`. A missing file yields defaults.
///
/// # Errors
///
/// [`ConfigError`] when the file cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    config.validate()?;
    Ok(config)
}

const fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

const fn default_min_group_size() -> usize {
    DEFAULT_MIN_GROUP_SIZE
}

const fn default_highlight_count() -> usize {
    DEFAULT_HIGHLIGHT_COUNT
}
