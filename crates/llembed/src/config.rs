//! Configuration handling for the llembed CLI.
//!
//! The file lives at `$LLEMBED_CONFIG_DIR/config.toml`, falling back to the
//! platform config directory. Every field has a default, so a missing file or
//! a partial one is fine. Command-line flags override file values.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Model configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// Model path, `hf:<repo>` for candle, or unset
    #[serde(default)]
    pub source: Option<String>,

    /// Evaluation threads; 0 means one per CPU
    #[serde(default)]
    pub threads: i32,

    /// Backend name: auto, llama, candle
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Embed a short text after loading to check the model pools
    #[serde(default = "default_verify")]
    pub verify: bool,
}

fn default_backend() -> String {
    "auto".to_string()
}

fn default_verify() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: None,
            threads: 0,
            backend: default_backend(),
            verify: default_verify(),
        }
    }
}

impl ModelConfig {
    /// Thread count with 0 resolved to the available parallelism.
    pub fn effective_threads(&self) -> i32 {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map_or(1, |n| i32::try_from(n.get()).unwrap_or(i32::MAX))
    }
}

/// Output-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Default output format (text, json)
    #[serde(default = "default_format")]
    pub format: String,

    /// Decimal places for text output
    #[serde(default = "default_precision")]
    pub precision: usize,
}

fn default_format() -> String {
    "text".to_string()
}

fn default_precision() -> usize {
    6
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            precision: default_precision(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from the default location, or defaults if no file exists.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    /// Load from `path`, or defaults if it is `None` or does not exist.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::read(&path),
            _ => Ok(Self::default()),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Path of the config file, if a config directory can be determined.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// A commented sample configuration file.
    pub fn sample_toml() -> &'static str {
        r#"# llembed configuration

[model]
# GGUF file (llama backend), model directory or hf:<repo> (candle backend)
# source = "models/bge-small-en-v1.5-q8_0.gguf"
# Evaluation threads; 0 means one per CPU
threads = 0
# auto, llama or candle
backend = "auto"
# Embed a short text after loading to check the model pools
verify = true

[output]
# text or json
format = "text"
precision = 6

[logging]
# error, warn, info, debug, trace
level = "warn"
"#
    }
}

/// Get the config directory for llembed.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("LLEMBED_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "llembed").map(|dirs| dirs.config_dir().to_path_buf())
}
