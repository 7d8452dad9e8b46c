//! Persisted processor record

use serde::{Deserialize, Serialize};

/// Everything a processor adds to the owning system's save record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorStateStorage {
    /// 0 none, 1 timed, 2 unbounded
    pub pull_state: u8,
    /// Seconds, -1 when unbounded
    pub timeout: f64,
    /// Milliseconds since the UNIX epoch
    pub pull_start: u64,
    /// Encoded globals section
    pub globals: String,
    /// Encoded main-thread section
    pub thread: String,
}

impl Default for ProcessorStateStorage {
    fn default() -> Self {
        Self {
            pull_state: 0,
            timeout: -1.0,
            pull_start: 0,
            globals: String::new(),
            thread: String::new(),
        }
    }
}

impl ProcessorStateStorage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
