use crate::config::Config;

/// Install the global fmt subscriber. `RUST_LOG` wins over the configured
/// level. Safe to call more than once, later calls are no-ops.
pub fn init() {
    init_with_level(&Config::global().log.level);
}

pub fn init_with_level(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(true)
        .try_init();
}
