//! Logging bootstrap
//!
//! Library code only emits `tracing` events. Embedders and tests call
//! [`init_logging`] once to route them to stderr; `RUST_LOG` takes precedence
//! over the default directive.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default directive when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "tessera_recipes=info,tessera_client=warn";

/// Install a global fmt subscriber.
///
/// Returns `false` when a global subscriber was already installed, which makes
/// the call safe to repeat from every test.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
