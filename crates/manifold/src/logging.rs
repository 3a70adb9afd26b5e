//! Subscriber setup for embedding binaries and tests.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global subscriber and routes `log` records into it.
///
/// `RUST_LOG` takes precedence over `level`. Returns false if a subscriber
/// was already installed; calling this more than once is harmless.
pub fn init(level: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let installed = if json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    // Fails only when a logger is already set.
    let _ = tracing_log::LogTracer::init();

    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug", false);
        assert!(!init("info", true));
        log::info!("logging initialized");
    }
}
