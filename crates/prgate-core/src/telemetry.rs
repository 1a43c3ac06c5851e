//! Log output for `prgate`.
//!
//! Logs always go to stderr: stdout carries tool reports and the JSON job
//! report, and CI captures the two streams separately.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Route `tracing` events to stderr, as JSON lines when `json` is set.
///
/// `RUST_LOG` overrides `level`. Only the first call in a process takes
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    // an already-installed subscriber is not an error
    let _ = if json {
        registry.with(stderr.json()).try_init()
    } else {
        registry.with(stderr).try_init()
    };
}
