use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting the output format (`json` or anything else for compact).
pub const LOG_FORMAT_ENV: &str = "SELFHEAL_LOG_FORMAT";

/// Initialize tracing for a host process that embeds the engine.
///
/// - Default level: INFO globally, DEBUG for this crate; override via RUST_LOG
/// - Compact human-readable output, or JSON lines when `SELFHEAL_LOG_FORMAT=json`
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,selfheal=debug"));

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()
    };

    match result {
        Ok(()) => tracing::debug!("Tracing initialized"),
        Err(_) => tracing::debug!("Tracing subscriber already installed, keeping it"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
