//! Processor configuration
//!
//! Loaded from a TOML file; every field falls back to its default.
//!
//! # Usage
//!
//! ```rust
//! use tickcore::util::config::ProcessorConfig;
//!
//! let config: ProcessorConfig = toml::from_str("speed = 500").unwrap();
//! assert_eq!(config.speed, 500);
//! assert!(config.gc_after_yield);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vm::VMConfig;

/// Processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Instructions between budget interrupts
    #[serde(default = "default_speed")]
    pub speed: u32,
    /// Maximum guest call depth
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Full collection after every tick that ends suspended
    #[serde(default = "default_gc_after_yield")]
    pub gc_after_yield: bool,
    /// Crash once the heap estimate exceeds this many bytes
    #[serde(default)]
    pub memory_limit: Option<usize>,
}

fn default_speed() -> u32 {
    15000
}

fn default_max_call_depth() -> usize {
    200
}

fn default_gc_after_yield() -> bool {
    true
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            max_call_depth: default_max_call_depth(),
            gc_after_yield: default_gc_after_yield(),
            memory_limit: None,
        }
    }
}

impl From<&ProcessorConfig> for VMConfig {
    fn from(config: &ProcessorConfig) -> Self {
        VMConfig {
            speed: config.speed,
            max_call_depth: config.max_call_depth,
        }
    }
}

/// Load a configuration file
pub fn load_config(path: &Path) -> Result<ProcessorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Load `path` if given, defaults otherwise
pub fn load_or_default(path: Option<&Path>) -> Result<ProcessorConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Ok(ProcessorConfig::default()),
    }
}

/// Save a configuration file
pub fn save_config(
    path: &Path,
    config: &ProcessorConfig,
) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}
