//! Tracing setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "scd_client=info";

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`.
///
/// Returns `false` when a global subscriber was already installed, so
/// embedding applications and test binaries may call it more than once.
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
