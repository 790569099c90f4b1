//! Console logging via `tracing-subscriber`.
//!
//! Logs go to stderr so command output on stdout stays clean. The filter
//! comes from the configured `log_level` (which `HEALDEC_LOG` already
//! overrides at config load time).

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Build the filter for `level`, falling back to `info` on a bad directive.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("invalid log filter {level:?} ({e}), using \"info\"");
        EnvFilter::new("info")
    })
}

/// Install the global subscriber. Only the first call has an effect.
pub fn init_logging(level: &str, json: bool) {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = build_filter(level);
        let use_ansi = std::io::stderr().is_terminal();

        let result = if json {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        } else {
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        } else {
            tracing::debug!(level, json, ansi = use_ansi, "Logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_filter_is_kept() {
        let filter = build_filter("healdec=debug,warn");
        assert!(filter.to_string().contains("healdec=debug"));
    }

    #[test]
    fn invalid_filter_falls_back_to_info() {
        assert!(EnvFilter::try_new("healdec=notalevel").is_err());
        let filter = build_filter("healdec=notalevel");
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn init_is_idempotent() {
        init_logging("warn", false);
        init_logging("trace", true);
        assert!(TRACING_INITIALIZED.get().is_some());
    }
}
