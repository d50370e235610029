/// Installs a `tracing` subscriber printing to stderr.
///
/// The filter is read from `RUST_LOG` and defaults to `poshwizard=info`.
/// Calling this more than once, or after another subscriber was installed,
/// returns an error.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("poshwizard=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;

    Ok(())
}
