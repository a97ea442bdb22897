//! Configuration - `cellcall.toml`
//!
//! Every section is optional; missing keys fall back to their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::logging::{LogConfig, LogFormat, LogOutput};

/// File name searched by [`Config::discover`]
pub const CONFIG_FILE_NAME: &str = "cellcall.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub heap: HeapConfig,

    #[serde(default)]
    pub invoker: InvokerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Heap-stack size in cells
    #[serde(default = "default_heap_cells")]
    pub cells: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Log errors of calls made without a message buffer
    #[serde(default = "default_true")]
    pub log_uncaught_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: FormatSetting,

    #[serde(default)]
    pub output: OutputSetting,

    /// Directory for `output = "file"`
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub span_events: bool,

    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatSetting {
    Pretty,
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSetting {
    Stdout,
    #[default]
    Stderr,
    File,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            cells: default_heap_cells(),
        }
    }
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            log_uncaught_errors: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: FormatSetting::default(),
            output: OutputSetting::default(),
            directory: None,
            prefix: default_prefix(),
            span_events: false,
            filter: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_heap_cells() -> usize { 16 * 1024 }
fn default_level() -> String { "info".to_string() }
fn default_prefix() -> String { "cellcall".to_string() }

impl LoggingConfig {
    /// Translate into a subscriber configuration
    ///
    /// Unknown levels fall back to `info`; a file output without a directory
    /// writes into the current directory.
    pub fn to_log_config(&self) -> LogConfig {
        let format = match self.format {
            FormatSetting::Pretty => LogFormat::Pretty,
            FormatSetting::Compact => LogFormat::Compact,
            FormatSetting::Json => LogFormat::Json,
        };
        let output = match self.output {
            OutputSetting::Stdout => LogOutput::Stdout,
            OutputSetting::Stderr => LogOutput::Stderr,
            OutputSetting::File => LogOutput::File {
                directory: self.directory.clone().unwrap_or_else(|| ".".to_string()),
                prefix: self.prefix.clone(),
            },
        };

        let mut config = LogConfig::new()
            .with_level(self.level.parse().unwrap_or(Level::INFO))
            .with_format(format)
            .with_output(output)
            .with_span_events(self.span_events);
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Find `cellcall.toml` in the current directory or its parents
    pub fn discover() -> Self {
        std::env::current_dir()
            .ok()
            .and_then(|dir| Self::discover_from(&dir))
            .unwrap_or_default()
    }

    /// Find and load the nearest `cellcall.toml` at or above `start`
    ///
    /// Unreadable or malformed files are skipped.
    pub fn discover_from(start: &Path) -> Option<Self> {
        let mut current: Option<PathBuf> = Some(start.to_path_buf());

        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                match Self::load(&candidate) {
                    Ok(config) => return Some(config),
                    Err(err) => {
                        tracing::warn!(path = %candidate.display(), error = %err, "skipping config file");
                    }
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        None
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
