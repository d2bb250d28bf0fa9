//! Logging initialization shared by the binaries.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Quiet mode only surfaces warnings; verbose mode emits JSON events at
/// the level selected by `CREW_LOG` (default `info`). Calling twice is
/// harmless: the second install attempt is ignored.
pub fn init_logging(quiet: bool) {
    let default_directive = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_env("CREW_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
