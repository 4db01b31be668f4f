//! Tracing setup
//!
//! Opt-in via `VIEWQUERY_TRACE`. Events go to `VIEWQUERY_TRACE_FILE`
//! (default `viewquery_trace.log`) through a non-blocking appender.

use crate::config::LoggingConfig;
use std::env;
use std::sync::OnceLock;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Returns false when tracing stays off.
pub fn init_tracing(logging_config: &LoggingConfig) -> bool {
    // Environment variables take precedence over config file values
    let enabled = env::var("VIEWQUERY_TRACE").ok().is_some_and(|v| v != "0");
    if !enabled {
        return false;
    }

    let log_path =
        env::var("VIEWQUERY_TRACE_FILE").unwrap_or_else(|_| "viewquery_trace.log".to_string());

    let json = env::var("VIEWQUERY_TRACE_JSON")
        .ok()
        .map_or_else(|| logging_config.format == "json", |v| v != "0");

    let level = env::var("VIEWQUERY_TRACE_LEVEL")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("ERROR: Unable to open VIEWQUERY_TRACE_FILE '{log_path}': {e}");
            return false;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(non_blocking.clone())
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
