//! Tracing subscriber setup for the command-line front end
//!
//! Library code only emits events and spans. Installing a subscriber is the
//! application's job, and this module is how the `bgkey` binary does it.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Colored, human-readable console output (default)
    Console,
    /// Plain compact output for CI logs
    Compact,
    /// JSON lines with span context
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Subscriber configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Number of `-v` flags
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Explicit filter directive; overrides `verbosity`
    pub env_filter: Option<String>,
    /// Identifier attached to the session start event
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directive for the configured verbosity
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    pub fn init(self) -> anyhow::Result<()> {
        let filter = match &self.env_filter {
            Some(directive) => EnvFilter::try_new(directive)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(layer).try_init()?;
            },
            TracingFormat::Compact => {
                let layer = fmt::layer().with_ansi(false).with_target(false).compact();
                registry.with(layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "🚀 bgkey session started");
        }
        Ok(())
    }
}

/// Install a console subscriber for `verbosity` `-v` flags
pub fn init_cli_tracing(verbosity: u8, json: bool) -> anyhow::Result<()> {
    let format = if json {
        json_format()?
    } else {
        TracingFormat::Console
    };

    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

#[cfg(feature = "tracing-json")]
fn json_format() -> anyhow::Result<TracingFormat> {
    Ok(TracingFormat::Json)
}

#[cfg(not(feature = "tracing-json"))]
fn json_format() -> anyhow::Result<TracingFormat> {
    anyhow::bail!("JSON logging requires the `tracing-json` feature")
}

/// Span helpers for CLI operations
pub mod spans {
    use tracing::{Level, Span};

    /// Whole-invocation span
    pub fn session(session_id: &str, mode: &str, edge_mode: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            mode = %mode,
            edge_mode = %edge_mode
        )
    }

    /// Decoding or encoding an image file
    pub fn file_io(operation: &str, path: &std::path::Path) -> Span {
        tracing::span!(
            Level::DEBUG,
            "file_io",
            operation = %operation,
            path = %path.display()
        )
    }

    /// Interactive-equivalent magic selections requested on the command line
    pub fn magic_selection(count: usize) -> Span {
        tracing::span!(Level::DEBUG, "magic_selection", count = count)
    }
}

/// Event helpers for CLI logging
pub mod events {
    use tracing::{debug, error, warn};

    /// Failure with the operation it interrupted
    pub fn error_with_context(error: &dyn std::error::Error, context: &str) {
        error!(error = %error, context = %context, "❌ Operation failed");
    }

    /// Something the user may want to change
    pub fn warning_with_recommendation(message: &str, recommendation: &str) {
        warn!(
            message = %message,
            recommendation = %recommendation,
            "⚠️  Warning"
        );
    }

    pub fn performance_metric(operation: &str, duration_ms: u64) {
        debug!(operation = %operation, duration_ms, "⏱️  Performance metric");
    }
}
