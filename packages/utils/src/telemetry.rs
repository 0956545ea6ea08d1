use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber: plain console output filtered by `filters`
pub fn setup_tracing(filters: tracing_subscriber::EnvFilter) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false),
        )
        .with(filters)
        .try_init()?;

    Ok(())
}
