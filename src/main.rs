//! ms-refresh-token - obtain Microsoft OAuth2 refresh tokens
//!
//! Runs the authorization code flow in the browser and stores the resulting
//! tokens in an INI config file.

mod auth;
mod config;
mod proxy;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ms-refresh-token")]
#[command(about = "Obtain and store Microsoft OAuth2 refresh tokens", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the INI config file
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the browser and store the tokens (default)
    Login {
        /// Seconds to wait for the browser redirect
        #[arg(short, long, default_value = "300")]
        timeout: u64,

        /// Print the sign-in URL instead of launching a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Exchange the stored refresh token for a new token pair
    Refresh,

    /// Show stored token status
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let command = cli.command.unwrap_or(Commands::Login {
        timeout: auth::authorize::DEFAULT_REDIRECT_TIMEOUT.as_secs(),
        no_browser: false,
    });

    let result = match command {
        Commands::Login {
            timeout,
            no_browser,
        } => {
            tracing::info!("Starting authorization code flow...");
            let options = auth::LoginOptions {
                timeout: Duration::from_secs(timeout),
                open_browser: !no_browser,
            };
            auth::login(&cli.config, &options).await
        }
        Commands::Refresh => auth::refresh(&cli.config).await,
        Commands::Status => auth::status(&cli.config).await,
    };

    if let Err(ref e) = result {
        tracing::error!("Run failed: {:#}", e);
    }
    result
}
