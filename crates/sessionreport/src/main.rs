mod cli;
mod config;
mod geo;
mod logging;
mod run;
mod upload;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose { true } else { logging::env_flag() };
    logging::init(verbose);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" })),
        )
        .with_writer(std::io::stderr)
        .init();
    run::run(cli)
}
