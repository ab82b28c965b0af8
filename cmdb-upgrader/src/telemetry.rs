//! Structured Logging
//!
//! JSON output for production runs, pretty output for operators at a
//! terminal, compact output for CI logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter};

use crate::error::{UpgradeError, UpgradeResult};

/// Log level
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string (for environment variables)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed for terminals
    #[default]
    Pretty,
    /// JSON for log shipping
    Json,
    /// Compact single-line
    Compact,
}

impl LogFormat {
    /// Parse from string (for environment variables)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level for the upgrader crates
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Include source file/line
    pub include_source: bool,
    /// Emit span open/close events
    pub include_span_events: bool,
    /// Explicit filter directive, overrides `level`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            include_source: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// JSON output with span events, for unattended runs
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            include_span_events: true,
            ..Self::default()
        }
    }

    /// Filter directive derived from the config
    pub fn directive(&self) -> String {
        match &self.filter {
            Some(f) => f.clone(),
            None => format!("cmdb_upgrader={level},cmdb_store={level}", level = self.level),
        }
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> UpgradeResult<()> {
    let filter = EnvFilter::try_new(config.directive())
        .map_err(|e| UpgradeError::config(format!("invalid log filter: {}", e)))?;

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.include_source)
        .with_line_number(config.include_source);

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init(),
    };

    installed.map_err(|e| UpgradeError::config(format!("logging already initialized: {}", e)))
}
