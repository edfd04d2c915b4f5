//! Global `tracing` subscriber and panic hook setup (§8 "Logging"): a
//! human-readable `fmt` layer in development, switching to the `json` layer
//! under `APP_ENV=production`. Initialized once, at the very top of `main`,
//! before anything else in the process — including `Config::load` itself —
//! runs, which is why it reads `APP_ENV`/`LOG_LEVEL` directly from the
//! environment rather than waiting on the typed `Config` they otherwise
//! populate.

use std::panic;

use tracing::error;
use tracing_error::ErrorLayer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

/// Initializes the global `tracing` subscriber. Safe to call once at process
/// start; a second call would panic on the global default already being set,
/// which is exactly what we want — it is a programming error to call this
/// twice.
pub fn init_tracing() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase()));

    let production = std::env::var("APP_ENV")
        .map(|v| v.eq_ignore_ascii_case("production") || v.eq_ignore_ascii_case("prod"))
        .unwrap_or(false);

    let error_layer = ErrorLayer::default();

    if production {
        let json_layer = fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());

        let subscriber = Registry::default().with(filter).with(json_layer).with(error_layer);
        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global tracing subscriber");
    } else {
        let fmt_layer = fmt::layer()
            .with_ansi(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());

        let subscriber = Registry::default().with(filter).with(fmt_layer).with(error_layer);
        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global tracing subscriber");
    }
}

/// Logs panics through `tracing` before the default hook's stderr dump runs,
/// so a panic in a spawned task shows up in the same structured log stream
/// as everything else.
pub fn init_panic_handler() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let msg = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(message = %msg, location = %location, "process panicked");
        default_hook(panic_info);
    }));
}
