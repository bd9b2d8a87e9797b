use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::OutputFormat;

/// Settings read from the CLI configuration file. Every key is optional and
/// command-line flags take precedence.
///
/// ```toml
/// page_size = 4096
/// cache_pages = 512
/// output = "json"
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Page size used by `create`.
    pub page_size: Option<usize>,
    /// Buffer pool size in pages.
    pub cache_pages: Option<usize>,
    /// Default output format.
    pub output: Option<OutputFormat>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl CliConfig {
    /// Loads `explicit` when given, otherwise the per-user default file.
    /// A missing file yields the empty configuration.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let Some(path) = explicit.or_else(default_config_path) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut config = read_file(&path)?;
        config.path = Some(path);
        Ok(config)
    }

    /// File the settings came from, if one was read.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_file(path: &Path) -> Result<CliConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Errors raised while reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read CLI config {}: {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`CliConfig`].
    #[error("failed to parse CLI config {}: {source}", path.display())]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// `<config dir>/arbor/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("arbor").join("config.toml"))
}
