//! Logging initialization and span helpers.
//!
//! Structured logging goes through `tracing`. Binaries embedding the orchestrator
//! call [`init_logging`] once at startup; the library itself only emits events.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name (`json` or `pretty`), falling back to pretty output.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `cohort_flow=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        // Another subscriber may already be installed by the embedding process.
        let _ = result;
    });
}

/// Creates a span for one orchestration request.
///
/// # Example
///
/// ```rust
/// use cohort_core::observability::request_span;
///
/// let span = request_span("register_tasks", "org-1");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn request_span(operation: &str, requester: &str) -> Span {
    tracing::info_span!("orchestration", op = operation, requester = requester)
}
