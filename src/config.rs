//! `sqlhoist.toml` handling.
//!
//! Lookup order: an explicit `--config` path, `./sqlhoist.toml`, then
//! `<config dir>/sqlhoist/config.toml`. Without any of them the defaults
//! apply.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, CliResult};

pub const LOCAL_CONFIG: &str = "sqlhoist.toml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub optimizer: OptimizerConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Matcher ids removed from the default registry.
    pub disabled_patterns: Vec<String>,
    /// Print the input unchanged when the statement cannot be optimized.
    pub fallback_on_error: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            disabled_patterns: Vec::new(),
            fallback_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Sql,
    Json,
}

impl Config {
    pub fn from_toml(content: &str, path: &Path) -> CliResult<Self> {
        toml::from_str(content).map_err(|source| CliError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Resolve and load the configuration. An explicit path must exist; the
    /// implicit locations are only used when present.
    pub fn load(explicit: Option<&Path>) -> CliResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::implicit_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn implicit_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("sqlhoist").join("config.toml"));
        }
        paths
    }
}
