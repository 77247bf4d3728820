//! Console and JSONL file logging for ViewSwap
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Pretty Console**: Human-readable lines for development
//! - **File Rotation**: Daily/hourly JSONL files via tracing-appender
//! - **RUST_LOG**: `EnvFilter` directives override the configured level
//!
//! # Quick Start
//!
//! ```ignore
//! use viewswap_logging::{LogConfig, SubscriberBuilder};
//!
//! // JSONL to console
//! let _guard = SubscriberBuilder::new().init()?;
//!
//! // Development mode with pretty human-readable output
//! let _guard = SubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```
//!
//! Keep the returned guard alive while logging to files; dropping it
//! flushes and stops the background writer.

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, LogFormat, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log file appender error: {0}")]
    Appender(#[from] InitError),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
pub struct SubscriberBuilder {
    config: LogConfig,
    test_writer: bool,
}

impl SubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
            test_writer: false,
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Set the console line format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.config.console.format = format;
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Route console output through the test harness capture
    fn with_test_writer(mut self) -> Self {
        self.test_writer = true;
        self
    }

    /// Initialize the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured; it must
    /// be kept alive for the duration of the program.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if self.config.console.enabled {
            layers.push(self.console_layer());
        }

        let mut guard = None;
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(json_layer(&self.config.jsonl, writer));
            guard = Some(file_guard);
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()?;
        Ok(guard)
    }

    fn console_layer(&self) -> BoxedLayer {
        let console = &self.config.console;
        match (console.format, self.test_writer) {
            (LogFormat::Pretty, true) => fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_test_writer()
                .boxed(),
            (LogFormat::Pretty, false) => fmt::layer()
                .with_ansi(console.ansi)
                .with_target(true)
                .boxed(),
            (LogFormat::Json, true) => fmt::layer()
                .json()
                .flatten_event(self.config.jsonl.flatten_events)
                .with_test_writer()
                .boxed(),
            (LogFormat::Json, false) => json_layer(&self.config.jsonl, std::io::stdout),
        }
    }
}

impl Default for SubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn json_layer<W>(jsonl: &JsonlConfig, writer: W) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_writer(writer)
        .boxed()
}

/// Open the non-blocking writer for file output
///
/// `Never` truncates a single `<prefix>.log`; rotating strategies append to
/// `<prefix>.<date>.jsonl` files and prune the oldest beyond `max_files`.
pub fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;

    let rotation = match config.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => {
            let file = File::create(config.directory.join(format!("{}.log", config.prefix)))?;
            return Ok(tracing_appender::non_blocking(file));
        }
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.as_str())
        .filename_suffix("jsonl");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Result<Option<WorkerGuard>, LoggingError> {
    SubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for tests (minimal output, captured by the harness)
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = SubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .with_test_writer()
        .init();
}
