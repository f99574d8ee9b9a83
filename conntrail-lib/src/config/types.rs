use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::output::OutputFormat;

/// Which interface to capture on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceSelection {
    /// Use the default route's interface and its address
    Auto,
    /// Capture on the named interface
    Named(String),
}

impl From<&str> for InterfaceSelection {
    fn from(s: &str) -> Self {
        match s.trim() {
            "" | "auto" => InterfaceSelection::Auto,
            name => InterfaceSelection::Named(name.to_string()),
        }
    }
}

impl fmt::Display for InterfaceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceSelection::Auto => f.write_str("auto"),
            InterfaceSelection::Named(name) => f.write_str(name),
        }
    }
}

/// Output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    /// Event format written to stdout: "text" or "json"
    /// Default: "text"
    #[serde(default)]
    pub format: OutputFormat,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default = "default_false")]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Interface to capture on: "auto" or an interface name
    /// Default: "auto"
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Report every connection attempt instead of the first per
    /// source/destination/port
    /// Default: false
    #[serde(default = "default_false")]
    pub track_all: bool,
    /// How long a SYN waits for its reply before it is reported as TIMEOUT
    /// Default: 800
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Capacity of the queue between the capture thread and the engine
    /// Default: 4096
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            track_all: false,
            idle_timeout_ms: default_idle_timeout(),
            channel_capacity: default_channel_capacity(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn interface_selection(&self) -> InterfaceSelection {
        InterfaceSelection::from(self.interface.as_str())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

fn default_interface() -> String {
    "auto".to_string()
}

fn default_false() -> bool {
    false
}

fn default_idle_timeout() -> u64 {
    800
}

fn default_channel_capacity() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}
