//! Tracing subscriber setup for programs embedding the packager.
//!
//! The library itself only emits events; installing a subscriber is left to
//! the host binary or test harness.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting JSON output when set to `json`.
pub const LOG_FORMAT_ENV: &str = "ADP_LOG_FORMAT";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, events are
/// written as newline-delimited JSON. Only the first call in a process has
/// any effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(false)).try_init().ok();
    }
}

/// Like [`init_tracing`], reading the output format from [`LOG_FORMAT_ENV`].
pub fn init_tracing_from_env(level: Level) {
    init_tracing(json_requested(std::env::var(LOG_FORMAT_ENV).ok().as_deref()), level);
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}
