//! Logging setup and request tracing helpers.
//!
//! # Noise Filtering
//!
//! Noisy library modules (hyper, reqwest, h2, rustls, ...) are set to `warn`
//! so relay logs stay readable at `info`/`debug`. `RUST_LOG` overrides
//! everything.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Header carrying the caller's trace id.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tower_http",
];

/// Build the filter directive string for the given level.
fn filter_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

/// Initialize logging.
///
/// * `log_level` - base level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured output, anything else for pretty
/// * `excluded_targets` - extra modules clamped to `warn`
pub fn init_logging(log_level: &str, log_format: &str, excluded_targets: &[String]) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(log_level, excluded_targets)));

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for request tracing.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Request Context
// ============================================================================

/// Per-request tracing context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Trace ID, propagated from the caller when present
    pub trace_id: String,
    /// Service name
    pub service: String,
}

impl RequestContext {
    /// Create context from HTTP headers, reusing `X-Trace-Id` if sent.
    pub fn from_headers(headers: &http::HeaderMap, service: impl Into<String>) -> Self {
        let trace_id = headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(generate_trace_id);

        Self {
            trace_id,
            service: service.into(),
        }
    }

    /// Add the trace id to outgoing HTTP headers.
    pub fn to_headers(&self, headers: &mut http::HeaderMap) {
        if let Ok(trace_id) = self.trace_id.parse() {
            headers.insert(TRACE_ID_HEADER, trace_id);
        }
    }
}

/// Create a tracing span for a request with business context.
///
/// # Example
///
/// ```ignore
/// let span = request_span!("chat", ctx.trace_id, session_id = %session);
/// ```
#[macro_export]
macro_rules! request_span {
    ($name:expr, $trace_id:expr) => {
        tracing::info_span!($name, trace_id = %$trace_id)
    };
    ($name:expr, $trace_id:expr, $($field:tt)*) => {
        tracing::info_span!($name, trace_id = %$trace_id, $($field)*)
    };
}
