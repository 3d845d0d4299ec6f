//! # Tracing and Structured Logging Configuration
//!
//! Initializes the logging system with environment-appropriate settings.
//!
//! ## Output Formats
//!
//! | Environment | Format | Purpose |
//! |-------------|--------|---------|
//! | Development | Pretty | Human-readable, colored output |
//! | Production  | JSON   | Machine-parseable for log aggregation |
//!
//! ## Filter Configuration
//!
//! Control verbosity via `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=debug
//! RUST_LOG=info,auth_service=debug
//! RUST_LOG=info,sqlx=warn
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initializes the tracing/logging system.
///
/// Call this once at process start, before anything else emits logs.
///
/// If `RUST_LOG` is unset: production defaults to `info`; development
/// defaults to `debug,sqlx=warn`.
pub fn init_tracing(service_name: &str, is_production: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("debug,sqlx=warn")
        }
    });

    if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    }

    tracing::info!(
        service = service_name,
        production = is_production,
        "tracing initialized"
    );
}

/// Creates a span for tracking a unit of work (a subscription broadcast, a
/// scheduler tick, an upload chunk) with common correlation fields.
#[macro_export]
macro_rules! work_span {
    ($op:expr, $id:expr) => {
        tracing::info_span!("work", op = %$op, id = %$id)
    };
}

/// Logs an error with context, at a consistent format across crates.
pub fn log_error<E: std::fmt::Display>(error: &E, context: &str) {
    tracing::error!(error = %error, context = context, "error occurred");
}

/// Logs a warning with context.
pub fn log_warning(message: &str, context: &str) {
    tracing::warn!(message = message, context = context, "warning");
}
