//! Configuration.
//!
//! Read from `config.toml` under the user config directory. A missing file
//! means defaults; every field is optional in the file.

use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal::prelude::RoundingStrategy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`KyoyuConfig::database`].
pub const DB_ENV: &str = "KYOYU_DB";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KyoyuConfig {
    /// SQLite database file.
    pub database: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Currency code shown next to amounts.
    pub currency: String,
    /// Decimal places shown for amounts.
    pub currency_decimals: u32,
}

impl Default for KyoyuConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            log_filter: "info".to_string(),
            currency: "COP".to_string(),
            currency_decimals: 0,
        }
    }
}

/// `<config dir>/kyoyu/config.toml`.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kyoyu")
        .join("config.toml")
}

fn default_database() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kyoyu")
        .join("kyoyu.db")
}

impl KyoyuConfig {
    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> ConfigResult<Self> {
        let mut config = Self::load(path)?;
        if let Some(db) = std::env::var_os(DB_ENV).filter(|v| !v.is_empty()) {
            config.database = PathBuf::from(db);
        }
        Ok(config)
    }

    pub fn write(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Render an amount with the configured precision and currency code.
    pub fn format_amount(&self, amount: Decimal) -> String {
        let rounded =
            amount.round_dp_with_strategy(self.currency_decimals, RoundingStrategy::MidpointAwayFromZero);
        format!("{rounded:.prec$} {}", self.currency, prec = self.currency_decimals as usize)
    }
}
