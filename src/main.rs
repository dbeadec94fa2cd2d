//! csvchat - chat with a CSV file
//!
//! By default, runs the web server. Use the 'ask' subcommand to ask a single
//! question from the terminal.

use clap::Parser;
use csvchat::cli::{self, Cli, Command};
use csvchat::server;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = cli.log_level.as_deref().unwrap_or("info").to_lowercase();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = cli.load_config().await?;

    match cli.command {
        Some(Command::Ask(args)) => cli::ask::execute(args, &config).await,
        Some(Command::Serve(args)) => {
            args.apply(&mut config);
            server::serve(config).await
        }
        None => server::serve(config).await,
    }
}
