//! Tracing subscriber setup for binaries and tests embedding the crate.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application. These helpers cover the common cases. The
//! filter comes from `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable stdout subscriber.
///
/// # Panics
///
/// Panics if a global subscriber is already installed; use [`try_init`]
/// when that can happen.
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
        .init();
}

/// Install a JSON-lines subscriber for log shippers.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json())
        .init();
}

/// Install a human-readable subscriber unless one is already set.
///
/// Returns false if another subscriber won.
pub fn try_init() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
        .try_init()
        .is_ok()
}

/// Subscriber whose output is captured by the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_test_writer())
        .try_init();
}
