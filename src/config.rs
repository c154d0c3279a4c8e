//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$PSTINGEST_CONFIG` (environment variable)
//! 2. `~/.config/pstingest/config.toml` (Linux/macOS)
//!    `%APPDATA%\pstingest\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convert::DEFAULT_CONVERTER;
use crate::extract::attachment::DEFAULT_MAX_FILENAME_LEN;
use crate::extract::ExtractOptions;
use crate::ingest::{IngestOptions, PartitionMode, DEFAULT_BATCH_SIZE};
use crate::parser::mbox::MAX_MESSAGE_SIZE;
use crate::store::{BatchGranularity, StoreOptions, DEFAULT_BUSY_TIMEOUT_MS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Directories and conversion settings for a run.
    pub pipeline: PipelineConfig,
    /// Record store tuning.
    pub store: StoreConfig,
    /// Message extraction settings.
    pub extract: ExtractConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Also write logs to `<cache_dir>/pstingest.log`.
    pub log_to_file: bool,
}

/// Directories and conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory searched for PST/OST containers.
    pub source_dir: PathBuf,
    /// Intermediate directory for converted MBOX trees.
    pub mbox_dir: PathBuf,
    /// Output directory (or store file in shared mode).
    pub output: PathBuf,
    /// Conversion workers (0 = one per CPU).
    pub workers: usize,
    /// Keep the intermediate directory after ingestion.
    pub keep_mbox: bool,
    /// Write every container into one store.
    pub shared_store: bool,
    /// Converter executable.
    pub converter: PathBuf,
}

/// Record store tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Records buffered before each write.
    pub batch_size: usize,
    /// Batch failure scope: "chunk" or "record".
    pub granularity: BatchGranularity,
    /// Lock wait in milliseconds before a write reports busy.
    pub busy_timeout_ms: u64,
}

/// Message extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Refuse executable attachments.
    pub screen_attachments: bool,
    /// Maximum sanitized filename length in characters.
    pub max_filename_len: usize,
    /// Maximum message size in bytes (default: 268435456 = 256 MB).
    pub max_message_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("target_files"),
            mbox_dir: PathBuf::from("mbox_dir"),
            output: PathBuf::from("output"),
            workers: 0,
            keep_mbox: false,
            shared_store: false,
            converter: PathBuf::from(DEFAULT_CONVERTER),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            granularity: BatchGranularity::Chunk,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            screen_attachments: false,
            max_filename_len: DEFAULT_MAX_FILENAME_LEN,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

// ── Conversions into library options ────────────────────────────

impl Config {
    pub fn partition_mode(&self) -> PartitionMode {
        if self.pipeline.shared_store {
            PartitionMode::Shared
        } else {
            PartitionMode::PerContainer
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
            granularity: self.store.granularity,
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            screen_attachments: self.extract.screen_attachments,
            max_filename_len: self.extract.max_filename_len,
            max_message_size: self.extract.max_message_size,
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            batch_size: self.store.batch_size,
            store: self.store_options(),
            extract: self.extract_options(),
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("PSTINGEST_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("pstingest").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pstingest")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("pstingest.log")
}
