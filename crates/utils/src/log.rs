use tracing_subscriber::{EnvFilter, fmt, prelude::*, util::TryInitError};

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `default_directive`; `LOG_FORMAT=json` switches to
/// JSON lines.
pub fn init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    }
}
