use clap::{Parser, Subcommand};
use collector::{build_fetcher, Scraper};
use database::Database;
use std::path::PathBuf;
use subvault_core::ScraperConfig;

#[derive(Parser)]
#[command(name = "subvault", about = "Coverage-maximizing subreddit archiver")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "subvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every collection strategy, then the comment pass.
    Scrape,
    /// Print an overview of what the store holds.
    Stats,
    /// Export posts with nested comment trees as JSON.
    Export {
        #[arg(short, long, default_value = "export.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "subvault=info,collector=info,reddit_client=info,database=info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = ScraperConfig::load(&cli.config)?;
    let db = Database::connect(&format!("sqlite://{}", config.database_path)).await?;

    match cli.command {
        Command::Scrape => {
            let fetcher = build_fetcher(&config)?;
            let scraper = Scraper::new(config, db, fetcher).await?;
            let summary = scraper.run().await?;
            println!("{}", summary);
        }
        Command::Stats => {
            let stats = db.stats().await?;
            println!("{}", stats);
        }
        Command::Export { output } => {
            let export = db.export().await?;
            let json = serde_json::to_string_pretty(&export)?;
            std::fs::write(&output, json)?;
            tracing::info!(
                "Exported {} posts to {}",
                export.metadata.total_posts,
                output.display()
            );
        }
    }

    Ok(())
}
