//! Logging for the processor and the CLI
//!
//! 输出格式：`[LEVEL] message`，写到 stderr，串口输出仍走 stdout。
//!
//! # Usage
//!
//! ```rust
//! use tickcore::util::logger::{self, LogLevel};
//!
//! logger::init_with_level(LogLevel::Info);
//! tracing::info!(ticks = 3, "processor stopped");
//! ```

use tracing_subscriber::filter::Targets;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Verbosity of the processor's own events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Install the stderr subscriber at WARN
pub fn init() {
    init_with_level(LogLevel::default());
}

/// Install the stderr subscriber; events from other crates stay at WARN.
///
/// Only the first call installs anything.
pub fn init_with_level(level: LogLevel) {
    let targets = Targets::new()
        .with_default(tracing::Level::WARN)
        .with_target(crate::NAME, tracing::Level::from(level));

    let layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_ansi(false)
        .with_writer(::std::io::stderr)
        .compact()
        .with_filter(targets);

    let _ = Registry::default().with(layer).try_init();
}

/// `-v` shows per-tick scheduler events
pub fn init_cli(verbose: bool) {
    init_with_level(if verbose { LogLevel::Debug } else { LogLevel::Info });
}
