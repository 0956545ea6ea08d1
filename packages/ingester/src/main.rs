use anyhow::{Context, Result};
use clap::Parser;
use ingester::{args::CliArgs, config::Config, run_ingester};
use utils::{
    config::{ConfigBuilder, ConfigExt},
    context::AppContext,
    telemetry::setup_tracing,
};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config: Config = ConfigBuilder::new(args).build()?;

    setup_tracing(config.tracing_env_filter()?)?;

    let ctx = AppContext::new().context("building the tokio runtime")?;

    run_ingester(ctx, config)
}
