mod cli;
mod commands;
mod compile;
mod config;
mod context;
mod error;
mod extension;
mod manifest;
mod project;
mod resource;
mod runtime;
mod server;
mod utils;
mod watch;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localserve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string())))
        .init();

    let cli = cli::Cli::parse();
    commands::run(cli)
}
