//! Log setup for the runner.
//!
//! The runner's own events go to stderr, next to whatever the stages print,
//! so a CI log reads top to bottom. Call [`init_tracing`] once at startup.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when present. With `json` each event is one
/// JSON object per line. Returns `false` if a subscriber was already set.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().with_target(false).with_writer(std::io::stderr).json()), None)
    } else {
        (None, Some(fmt::layer().with_target(false).with_writer(std::io::stderr)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}
