//! Minimal `tracing-subscriber` initialization.
//!
//! This crate only emits `tracing` spans/events; it never installs a global
//! subscriber on its own (a library shouldn't override its embedder's
//! logging setup). [`init_env_filter_logging`] is a convenience entry point
//! for binaries and tests that embed this crate and don't already configure
//! their own subscriber: no JSON/pretty-tree format selection, just an
//! `EnvFilter`-driven compact formatter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a compact, `EnvFilter`-driven subscriber as the global default.
/// Honors `RUST_LOG` when set; falls back to `default_directive` otherwise
/// (e.g. `"info"` or `"appsync_realtime_client=debug"`). A second call while
/// a subscriber is already installed panics: this is meant to be called
/// once, early, by a binary or test harness embedding this crate.
pub fn init_env_filter_logging(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(fmt::layer().compact())
        .with(filter)
        .init();
}
