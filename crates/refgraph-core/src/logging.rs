//! Structured logging setup.
//!
//! The interpreter reports compilation, per-call and per-operator events
//! through `tracing`. Nothing is printed until a subscriber is installed,
//! which is what [`init_logging`] does for binaries, benches and tests.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Per-operator events are emitted under this target.
pub const EXECUTABLE_TARGET: &str = "refgraph_interpreter::executable";

/// Severity threshold for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Per-operator execution events
    Trace,
    /// Compilation and node state creation
    Debug,
    /// Compile summaries
    Info,
    /// Recoverable anomalies
    Warn,
    /// Failed calls
    Error,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => Level::TRACE.as_str(),
            LogLevel::Debug => Level::DEBUG.as_str(),
            LogLevel::Info => Level::INFO.as_str(),
            LogLevel::Warn => Level::WARN.as_str(),
            LogLevel::Error => Level::ERROR.as_str(),
        }
    }
}

/// What [`init_logging`] installs.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for targets without an override
    pub level: LogLevel,
    /// Per-target overrides
    pub directives: Vec<(String, LogLevel)>,
    /// Emit one JSON object per event
    pub json_format: bool,
    /// Route output through the test harness so it is captured per test
    pub test_writer: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            directives: Vec::new(),
            json_format: false,
            test_writer: false,
        }
    }
}

impl LoggingConfig {
    /// Info level, human-readable output on stdout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Override the level for one target.
    pub fn with_directive(mut self, target: impl Into<String>, level: LogLevel) -> Self {
        self.directives.push((target.into(), level));
        self
    }

    /// Enable or disable JSON output.
    pub fn with_json_format(mut self, enable: bool) -> Self {
        self.json_format = enable;
        self
    }

    /// Enable or disable the test-harness writer.
    pub fn with_test_writer(mut self, enable: bool) -> Self {
        self.test_writer = enable;
        self
    }

    /// Warnings everywhere plus one event per executed operator.
    pub fn operator_trace() -> Self {
        Self::new()
            .with_level(LogLevel::Warn)
            .with_directive(EXECUTABLE_TARGET, LogLevel::Trace)
    }

    fn filter_string(&self) -> String {
        let mut filter = self.level.as_directive().to_lowercase();
        for (target, level) in &self.directives {
            filter.push_str(&format!(",{}={}", target, level.as_directive().to_lowercase()));
        }
        filter
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured levels. Returns `false` when a subscriber was already set.
///
/// ```no_run
/// use refgraph_core::logging::{init_logging, LoggingConfig};
///
/// init_logging(LoggingConfig::operator_trace());
/// ```
pub fn init_logging(config: LoggingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match (config.json_format, config.test_writer) {
        (true, true) => fmt::layer().json().with_test_writer().boxed(),
        (true, false) => fmt::layer().json().boxed(),
        (false, true) => fmt::layer().with_test_writer().boxed(),
        (false, false) => fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let config = LoggingConfig::default();
        assert!(config.directives.is_empty());
        assert_eq!(config.filter_string(), "info");
    }

    #[test]
    fn test_operator_trace_filter() {
        assert_eq!(
            LoggingConfig::operator_trace().filter_string(),
            "warn,refgraph_interpreter::executable=trace"
        );
    }

    #[test]
    fn test_second_init_is_reported() {
        init_logging(LoggingConfig::new().with_test_writer(true));
        assert!(!init_logging(LoggingConfig::new().with_json_format(true)));
    }
}
