//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and a JSON log file, used to
//! follow sweeps and per-index runs across many concurrently managed indices.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        let file_logging = fs::create_dir_all(&log_dir).is_ok();

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("ism.{environment}.{pid}.{timestamp}.log");

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        if file_logging {
            let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level));

            if tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .is_err()
            {
                tracing::debug!("Global tracing subscriber already initialized");
            }

            // The writer flushes for the lifetime of the process
            std::mem::forget(guard);
        } else if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_dir.join(&log_filename).display(),
            file_logging = file_logging,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var("ISM_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return filter;
    }
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for a per-index runner operation
pub fn log_runner_operation(
    operation: &str,
    index: &str,
    index_uuid: &str,
    policy_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        index = %index,
        index_uuid = %index_uuid,
        policy_id = policy_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 RUNNER_OPERATION"
    );
}

/// Log structured data for a coordinator sweep or bulk operation
pub fn log_coordinator_operation(
    operation: &str,
    status: &str,
    item_count: usize,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        status = %status,
        item_count = item_count,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🧹 COORDINATOR_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }
}
