use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tracon::commands;
use tracon::config::AppConfig;
use tracon::errors::TraconError;

#[derive(Parser, Debug)]
#[command(
    name = "tracon",
    about = "Continuous ingestion and session summarization for a live ATC network"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingestion and summarization service
    Run,
    /// Validate configuration and database schema, then exit
    Check,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
}

fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    let _sentry_guard = init_sentry();

    let cli = Cli::parse();

    let config = match AppConfig::load_from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(2);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Run => commands::handle_run(config).await,
            Commands::Check => commands::handle_check(config).await,
        }
    });

    match result {
        Ok(()) => {
            info!("Shutdown complete");
        }
        Err(e) => {
            // Config and schema problems are startup failures; everything
            // else is an unrecoverable runtime fault.
            let code = match e.downcast_ref::<TraconError>() {
                Some(TraconError::Config(_)) | Some(TraconError::DatabaseFatal(_)) => 1,
                _ => 2,
            };
            error!("Exiting with code {}: {}", code, e);
            std::process::exit(code);
        }
    }
}
