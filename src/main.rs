//! Command line entry point
//!
//! ```bash
//! catalog-lister run https://www.ebay.com/str/some-seller
//! catalog-lister settings set-header CONDITION "New"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{error, warn};

use catalog_lister::application::{ListingPipeline, RunSummary};
use catalog_lister::infrastructure::config::{DEFAULT_SETTINGS_FILE, SettingsManager};
use catalog_lister::infrastructure::logging::init_logging_with_config;

#[derive(Parser)]
#[command(name = "catalog-lister")]
#[command(version, about = "Acquire store listings into upload-ready batches")]
struct Cli {
    /// Settings file (created with defaults when missing)
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a store page into numbered batches
    Run {
        store_url: String,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or edit the settings file
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show,

    /// Change the default value of an existing CSV column
    SetHeader { key: String, value: String },

    /// Change the output directory
    SetBaseDir { dir: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut manager = SettingsManager::load(&cli.settings)
        .await
        .with_context(|| format!("Failed to load settings from {:?}", cli.settings))?;

    match cli.command {
        Commands::Run { store_url, json } => {
            init_logging_with_config(&manager.settings().logging)?;
            if let Some(reason) = manager.fallback_reason() {
                warn!("⚠️ Running with default settings: {}", reason);
            }
            let summary = match run(&manager, &store_url).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!("❌ Run failed: {:#}", e);
                    return Err(e);
                }
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
            } else {
                println!(
                    "{} products, batches {:?}, {} images ({} failed) -> {}",
                    summary.products.len(),
                    summary.batches,
                    summary.images_downloaded,
                    summary.images_failed,
                    summary.output_dir.display()
                );
            }
        }
        Commands::Settings { action } => {
            if let Some(reason) = manager.fallback_reason() {
                eprintln!("warning: using default settings: {reason}");
            }
            match action {
                SettingsAction::Show => {
                    println!("{}", serde_json::to_string_pretty(manager.settings())?);
                }
                SettingsAction::SetHeader { key, value } => {
                    if !manager.update_csv_header(&key, header_value(&value)).await? {
                        anyhow::bail!("Unknown CSV header '{key}'");
                    }
                    println!("Updated {key}");
                }
                SettingsAction::SetBaseDir { dir } => {
                    manager.update_base_dir(dir.clone()).await?;
                    println!("Output directory set to {dir}");
                }
            }
        }
    }

    Ok(())
}

async fn run(manager: &SettingsManager, store_url: &str) -> Result<RunSummary> {
    let pipeline = ListingPipeline::new(manager.settings().clone()).await?;

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight work");
            token.cancel();
        }
    });

    Ok(pipeline.run(store_url).await?)
}

/// Numeric input stays numeric in the settings file.
fn header_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(number @ Value::Number(_)) => number,
        _ => Value::from(raw),
    }
}

fn summary_json(summary: &RunSummary) -> Value {
    json!({
        "runId": summary.run_id,
        "storeUrl": summary.store_url,
        "outputDir": summary.output_dir,
        "startingBatch": summary.starting_batch,
        "batches": summary.batches,
        "stats": summary.stats,
        "imagesDownloaded": summary.images_downloaded,
        "imagesFailed": summary.images_failed,
        "imagesSkipped": summary.images_skipped,
        "recordsWritten": summary.records_written,
        "recordsFailed": summary.records_failed,
        "cancelled": summary.cancelled,
        "elapsedMs": summary.elapsed.as_millis() as u64,
        "products": summary.products,
    })
}
