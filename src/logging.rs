use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

pub fn setup_tracing(debug: bool) -> Result<()> {
    // Layer to output to stdout
    let stdout_layer = tracing_subscriber::fmt::layer();

    let filter_level = if debug {
        "storm_reactor=debug"
    } else {
        "storm_reactor=info"
    };

    let filter = EnvFilter::from_default_env().add_directive(filter_level.parse()?);

    let subscriber = Registry::default().with(stdout_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
