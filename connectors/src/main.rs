use clap::{Parser, Subcommand};
use connector_core::{telemetry, Config};
use connectors::App;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[clap(name = "connectors")]
#[clap(about = "Enumerates external content sources into normalized documents", version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full enumeration pass
    Sync {
        /// Emit metadata only, skip all content downloads
        #[clap(long, env = "SYNC_SKIP_CONTENT")]
        skip_content: bool,

        /// Write NDJSON here instead of the configured output
        #[clap(long, env = "SYNC_OUTPUT")]
        output: Option<String>,
    },

    /// Verify the configured path against the backing service
    Validate,

    /// Check connectivity and credentials
    Ping,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    let cli = Cli::parse();

    let app = App::new(config)?;

    match cli.command {
        Commands::Sync {
            skip_content,
            output,
        } => {
            let report = app.sync(!skip_content, output).await?;
            info!(
                documents = report.documents,
                attachments = report.attachments,
                skipped = report.skipped,
                failed_downloads = report.failed_downloads,
                "Sync pass finished"
            );
        }

        Commands::Validate => {
            app.validate().await?;
            info!("Configured source is valid");
        }

        Commands::Ping => {
            app.ping().await?;
            info!("Source is reachable");
        }
    }

    telemetry::shutdown();
    Ok(())
}
