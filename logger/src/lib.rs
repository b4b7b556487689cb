//! Logger configuration for Peyk services.
//!
//! Every service binary and test funnels through here so log shape stays
//! uniform: compact single-line events on stderr, INFO by default, and the
//! HTTP client internals (gateway and crypto provider calls go through
//! hyper/reqwest) quieted to WARN so payment-flow events stay readable.
//! `PEYK_LOG` overrides everything, falling back to `RUST_LOG`; both use
//! the tracing targets syntax:
//! <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.Targets.html>

// Enforce disallowed methods clippy lint
#![deny(clippy::disallowed_methods)]

use std::io::IsTerminal;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Dependency targets that drown out payment-flow events at INFO.
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "rustls"];

/// Initialize the global logger for a service process.
///
/// Panics if a logger is already initialized; use [`init_for_testing`] in
/// tests, where threads race to install one.
pub fn init() {
    try_init().expect("A global logger was already installed");
}

/// Initialize the global logger inside tests.
///
/// Quiet unless asked: `cargo test` output stays clean, and setting
/// `PEYK_LOG` (or `RUST_LOG`) surfaces flow logs from a failing test.
/// Safe to call from every test; losing the install race is not an error.
pub fn init_for_testing() {
    if std::env::var_os("PEYK_LOG").is_none()
        && std::env::var_os("RUST_LOG").is_none()
    {
        return;
    }
    let _ = try_init();
}

/// Install the global logger, reporting an `Err` if another subscriber is
/// already installed.
pub fn try_init() -> Result<(), TryInitError> {
    let stderr_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        // Colors for a human at a terminal, plain text for piped logs.
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    tracing_subscriber::registry().with(stderr_log).try_init()
}

/// `PEYK_LOG` beats `RUST_LOG` beats [`default_targets`]. An unparseable
/// spec falls back to the default rather than failing startup.
fn env_filter() -> Targets {
    std::env::var("PEYK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|spec| Targets::from_str(&spec).ok())
        .unwrap_or_else(default_targets)
}

/// INFO everywhere, except the HTTP stack at WARN.
fn default_targets() -> Targets {
    let mut targets = Targets::new().with_default(Level::INFO);
    for target in QUIET_TARGETS {
        targets = targets.with_target(*target, Level::WARN);
    }
    targets
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_filter_quiets_http_internals() {
        let targets = default_targets();

        // Peyk flow events pass at INFO.
        assert!(targets.would_enable("peyk_ads::fiat", &Level::INFO));
        assert!(targets.would_enable("peyk_ads::campaign", &Level::INFO));

        // The HTTP stack only surfaces problems.
        for target in ["hyper::proto", "reqwest::connect", "rustls::conn"] {
            assert!(!targets.would_enable(target, &Level::INFO), "{target}");
            assert!(targets.would_enable(target, &Level::WARN), "{target}");
        }
    }

    #[test]
    fn parseable_spec_overrides_default_shape() {
        // The same syntax an operator would put in PEYK_LOG.
        let targets =
            Targets::from_str("warn,peyk_ads::crypto=debug").unwrap();
        assert!(targets.would_enable("peyk_ads::crypto", &Level::DEBUG));
        assert!(!targets.would_enable("peyk_ads::fiat", &Level::INFO));
    }
}
