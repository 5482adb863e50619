use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;
mod settings;

use settings::{Cli, Settings};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Configuration errors are fatal before any network call is made
    let settings = match Settings::from_cli(cli) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run_server(settings).await {
        tracing::error!("Server error: {e:#}");
        std::process::exit(1);
    }
}
