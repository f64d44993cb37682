use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "MARKBOOK_CALC_LOG";
const DEFAULT_FILTER: &str = "markbook_calc=warn";

/// Installs the stderr subscriber. Stdout carries the JSON-lines protocol, so
/// nothing may log there.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .try_init()?;
    Ok(())
}
