//! cdpctl — Commitment Discount Planner CLI entry point.

use cdpctl::Cli;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cdpctl=info".parse().expect("static directive parses")))
        .init();

    match cdpctl::run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            std::process::exit(err.exit_code());
        }
    }
}
