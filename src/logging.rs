//! Logging configuration for graph-injector
//!
//! The container emits `tracing` events under the `graph_injector` target:
//! registrations and overrides at DEBUG, every resolve, cache hit and factory
//! invocation at TRACE/DEBUG, and detected cycles at DEBUG. This module wires
//! those events to a `tracing-subscriber` formatter.
//!
//! # Features
//!
//! - `logging` - Emit events (default)
//! - `logging-json` - JSON structured output
//! - `logging-pretty` - Multi-line human-readable output
//!
//! Without either subscriber feature the init functions are no-ops and the
//! events go to whatever subscriber the application installs.
//!
//! # Example
//!
//! ```rust,ignore
//! use graph_injector::logging;
//!
//! // Only the container's own events, including per-resolve traces
//! logging::builder()
//!     .graph_only()
//!     .trace()
//!     .pretty()
//!     .with_thread_ids()
//!     .init();
//! ```

use tracing::Level;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
    /// Compact single-line output
    Compact,
}

/// The target every container event is emitted under.
pub const TARGET: &str = "graph_injector";

/// Builder for logging configuration
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    from_env: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            from_env: false,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

impl LoggingBuilder {
    /// Create a new logging builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum log level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// TRACE: includes cache hits and every nested resolve
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// DEBUG: registrations, factory invocations, cycles
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    /// INFO: nothing from the container itself
    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    /// Set log level to WARN
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    /// Set log level to ERROR (least verbose)
    pub fn error(self) -> Self {
        self.with_level(Level::ERROR)
    }

    /// Only show events from `target`
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show the container's own events
    pub fn graph_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    /// Prefer `RUST_LOG` when it is set; fall back to the configured filter.
    pub fn from_env(mut self) -> Self {
        self.from_env = true;
        self
    }

    /// Include file names in log output
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers in log output
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Include thread IDs in log output; async factories may resume on
    /// another worker
    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    /// Include thread names in log output
    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    /// Use JSON structured logging format (needs `logging-json`)
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Use multi-line human-readable format
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    /// Use compact single-line format
    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// The filter directive this builder would install.
    pub fn directive(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        match self.target {
            Some(target) => format!("{target}={level}"),
            None => level,
        }
    }

    /// Install the subscriber globally.
    ///
    /// Does nothing if a global subscriber is already set.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Install the subscriber globally, reporting whether it was installed.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> bool {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let filter = if self.from_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
        } else {
            EnvFilter::new(self.directive())
        };

        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_thread_names(self.with_thread_names)
            .with_target(true);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => base.json().boxed(),
            // JSON output needs `logging-json`; fall back to the default formatter
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
            .is_ok()
    }

    /// No subscriber feature enabled: nothing to install.
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn try_init(self) -> bool {
        false
    }
}

/// Create a new logging builder
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize logging with default settings
///
/// JSON output if `logging-json` is enabled, otherwise pretty output.
pub fn init() {
    #[cfg(feature = "logging-json")]
    init_json();
    #[cfg(not(feature = "logging-json"))]
    init_pretty();
}

/// Initialize JSON structured logging at DEBUG
///
/// # Example output
/// ```json
/// {"timestamp":"2026-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Registered service","service":"app::Database","replaced":false},"target":"graph_injector"}
/// ```
pub fn init_json() {
    builder().json().debug().init();
}

/// Initialize pretty logging at DEBUG
///
/// # Example output
/// ```text
///   2026-01-01T00:00:00.000Z DEBUG graph_injector: Invoking factory, service: app::Database, depth: 1
/// ```
pub fn init_pretty() {
    builder().pretty().debug().init();
}

/// Initialize logging for the container only, at TRACE, honouring `RUST_LOG`
pub fn init_graph_only() {
    builder().graph_only().trace().from_env().init();
}
