use std::str::FromStr;

use tracing::Level;

/// Initialize the tracing subscriber used by the demo binary.
///
/// `RUST_LOG` wins when it names a plain level (`trace` .. `error`);
/// otherwise `default_level` applies.
pub fn init(default_level: &str) {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| Level::from_str(raw.trim()).ok())
        .or_else(|| Level::from_str(default_level).ok())
        .unwrap_or(Level::INFO);

    // try_init so tests can call this more than once without panicking
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
