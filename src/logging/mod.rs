//! Logging infrastructure - structured tracing for the call path
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable level, format and destination
//! - Zero-cost when disabled
//! - One span per native invocation, nested for re-entrant calls
//! - Heap-stack and copy-back events at trace level

use std::path::Path;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::cell::LocalAddr;
use crate::error::ErrorCode;

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Writer guard for non-blocking output, flushed by [`shutdown`]
static WRITER_GUARD: Mutex<Option<WorkerGuard>> = parking_lot::const_mutex(None);

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format
    Pretty,
    /// Single-line format
    Compact,
    /// JSON lines
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily rotated file
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra filter directives (e.g. "cellcall::invoker=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // CELLCALL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("CELLCALL_LOG_LEVEL") {
            config.level = level.parse().unwrap_or(Level::INFO);
        }

        // CELLCALL_LOG_FILE: directory for rotated log files
        if let Ok(directory) = std::env::var("CELLCALL_LOG_FILE") {
            config.output = LogOutput::File {
                directory,
                prefix: "cellcall".to_string(),
            };
        }

        if std::env::var("CELLCALL_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }

        config.span_events = std::env::var("CELLCALL_LOG_SPANS").is_ok();

        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Log everything from the call path, including heap traffic
    pub fn debug() -> Self {
        Self::default()
            .with_level(Level::TRACE)
            .with_format(LogFormat::Pretty)
            .with_span_events(true)
    }

    /// Rotated JSON files under `log_dir`
    pub fn production(log_dir: impl AsRef<Path>) -> Self {
        Self::default()
            .with_format(LogFormat::Json)
            .with_output(LogOutput::File {
                directory: log_dir.as_ref().to_string_lossy().into_owned(),
                prefix: "cellcall".to_string(),
            })
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging once; later calls are ignored
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = build_filter(&config);
        let span_events = span_events_config(config.span_events);

        let (writer, guard) = match &config.output {
            LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File { directory, prefix } => {
                tracing_appender::non_blocking(rolling::daily(directory, prefix))
            }
        };

        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(writer)
                .pretty()
                .with_span_events(span_events)
                .with_filter(filter)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .with_writer(writer)
                .compact()
                .with_span_events(span_events)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(span_events)
                .with_filter(filter)
                .boxed(),
        };

        // Another subscriber may already own the global slot (e.g. in tests).
        if tracing_subscriber::registry().with(layer).try_init().is_ok() {
            *WRITER_GUARD.lock() = Some(guard);
        }
    });
}

/// Flush buffered output
pub fn shutdown() {
    WRITER_GUARD.lock().take();
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!("cellcall={}", config.level.as_str().to_lowercase()))
        });

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .fold(base, |filter, directive| match directive.trim().parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => {
                    tracing::warn!(directive, "ignoring invalid filter directive");
                    filter
                }
            }),
        None => base,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

// ============================================================================
// Call-path events
// ============================================================================

#[inline]
pub fn log_heap_alloc(addr: LocalAddr, cells: usize) {
    tracing::trace!(event = "heap_alloc", %addr, cells, "heap block pushed");
}

#[inline]
pub fn log_heap_free(addr: LocalAddr, cells: usize) {
    tracing::trace!(event = "heap_free", %addr, cells, "heap block popped");
}

pub fn log_lifo_violation(expected: LocalAddr, got: LocalAddr) {
    tracing::error!(
        event = "heap_lifo_violation",
        %expected,
        %got,
        "heap block popped out of order"
    );
}

#[inline]
pub fn log_copy_back(index: usize, addr: LocalAddr, bytes: usize) {
    tracing::trace!(event = "copy_back", param = index, %addr, bytes, "copied back to caller");
}

pub fn log_queue_overflow(native: &str, limit: usize) {
    tracing::warn!(event = "queue_overflow", native, limit, "parameter queue full");
}

pub fn log_marshal_failure(native: &str, index: usize, code: ErrorCode) {
    tracing::warn!(
        event = "marshal_failure",
        native,
        param = index,
        code = code.code(),
        error = %code,
        "could not marshal parameter"
    );
}

pub fn log_heap_pop_failure(native: &str, addr: LocalAddr, code: ErrorCode) {
    tracing::error!(
        event = "heap_pop_failure",
        native,
        %addr,
        code = code.code(),
        error = %code,
        "could not release parameter block"
    );
}

pub fn log_native_return(native: &str, result: i32) {
    tracing::trace!(event = "native_return", native, result, "native returned");
}

pub fn log_uncaught_error(native: &str, code: ErrorCode, message: &str) {
    tracing::error!(
        event = "native_error",
        native,
        code = code.code(),
        message,
        "native call failed"
    );
}

pub fn log_dropped_error(pending: ErrorCode, dropped: ErrorCode) {
    tracing::debug!(
        event = "error_dropped",
        pending = pending.code(),
        dropped = dropped.code(),
        "error reported while another is pending"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                operation = self.operation,
                duration_us = self.start.elapsed().as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_filter("cellcall::invoker=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter.as_deref(), Some("cellcall::invoker=trace"));
    }

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::debug().level, Level::TRACE);

        let prod = LogConfig::production("/var/log/cellcall");
        assert_eq!(prod.format, LogFormat::Json);
        assert_eq!(
            prod.output,
            LogOutput::File {
                directory: "/var/log/cellcall".to_string(),
                prefix: "cellcall".to_string(),
            }
        );
    }

    #[test]
    fn test_init_idempotent() {
        init_with_config(LogConfig::default().with_level(Level::WARN));
        init_with_config(LogConfig::debug());
        assert!(is_initialized());
        shutdown();
    }
}
