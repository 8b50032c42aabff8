//! Persisted user settings
//!
//! A small JSON file next to the downloaded data remembers defaults between
//! runs and caches the detected first archive year of each symbol. Command
//! line flags always take precedence over values read from this file.

use crate::downloader::config::{DEFAULT_WORKERS, MAX_WORKERS};
use crate::MarketType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Default settings file name inside the output directory
pub const SETTINGS_FILE_NAME: &str = "kline_archiver.json";

/// Settings persistence errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not valid settings JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings stored between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Remove archives once converted to Parquet
    pub delete_archives_after_conversion: bool,
    /// Default worker count
    pub max_download_workers: usize,
    /// Reuse archives already on disk
    pub skip_existing_files: bool,
    /// Ask the archive host for the first year of a symbol
    pub smart_year_detection: bool,
    /// First archive year per `{market}:{SYMBOL}`
    pub symbol_start_years: BTreeMap<String, i32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delete_archives_after_conversion: false,
            max_download_workers: DEFAULT_WORKERS,
            skip_existing_files: true,
            smart_year_detection: true,
            symbol_start_years: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`
    ///
    /// A missing file yields defaults. A file that cannot be parsed is
    /// reported with a warning and also yields defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable settings file {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Load settings from `path`, reporting every failure
    pub fn try_load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&content)?;
        settings.max_download_workers = settings.max_download_workers.clamp(1, MAX_WORKERS);
        Ok(settings)
    }

    /// Save settings to `path`, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Cached first archive year of `symbol` on `market`
    pub fn start_year(&self, market: MarketType, symbol: &str) -> Option<i32> {
        self.symbol_start_years
            .get(&start_year_key(market, symbol))
            .copied()
    }

    /// Remember the first archive year of `symbol` on `market`
    pub fn set_start_year(&mut self, market: MarketType, symbol: &str, year: i32) {
        self.symbol_start_years
            .insert(start_year_key(market, symbol), year);
    }
}

fn start_year_key(market: MarketType, symbol: &str) -> String {
    format!("{}:{}", market.slug(), symbol.to_ascii_uppercase())
}
