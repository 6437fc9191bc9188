//! Generates photos for every record of a workbook and writes them as PNG files.
//!
//! Records are processed one at a time; a failed record is reported and the
//! run continues with the next one.

use anyhow::Context;
use clap::Parser;
use rust_permit_api::config::Config;
use rust_permit_api::enrichment::{EnrichmentOrchestrator, GenerationOutcome};
use rust_permit_api::export::{export_file_name, photo_bytes, ExportFormat};
use rust_permit_api::image_client::ImagenClient;
use rust_permit_api::ingest;
use rust_permit_api::store::RecordStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "batch_generate", about = "Generate permit photos for a whole workbook")]
struct Args {
    /// Workbook with one person per row
    input: PathBuf,

    /// Directory the PNG files are written to
    #[arg(long, default_value = "photos")]
    out_dir: PathBuf,

    /// Per-record timeout in seconds (overrides GENERATION_TIMEOUT_SECS)
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = Config::from_env()?;

    println!("=== Batch Photo Generation ===\n");

    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let records = ingest::ingest(&bytes)?;
    let total = records.len();
    println!("✓ Loaded {} record(s) from {}\n", total, args.input.display());

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let mut store = RecordStore::new();
    store.load(records);
    let ids: Vec<_> = (0..total).filter_map(|i| store.id_at(i)).collect();
    let store = Arc::new(Mutex::new(store));

    let client = ImagenClient::new(config.image_api_url.clone(), config.image_api_key.clone())?;
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(config.generation_timeout);
    let orchestrator =
        EnrichmentOrchestrator::new(store.clone(), Arc::new(client)).with_timeout(timeout);

    let mut success_count = 0;
    let mut fail_count = 0;

    for id in ids {
        println!("[{}/{}] Generating photo...", id.index + 1, total);

        match orchestrator.request_generation(id).await {
            GenerationOutcome::Completed(_) => {
                let guard = store.lock().await;
                let Some(record) = guard.get(id) else {
                    continue;
                };
                let path = args.out_dir.join(export_file_name(record, ExportFormat::Png));
                let bytes = photo_bytes(record)?;
                drop(guard);

                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("  ✓ Saved {}", path.display());
                success_count += 1;
            }
            outcome => {
                println!("  ✗ {}", outcome.message());
                fail_count += 1;
            }
        }
    }

    println!("\n=== Summary ===");
    println!("Total: {}", total);
    println!("✓ Success: {}", success_count);
    println!("✗ Failed: {}", fail_count);

    Ok(())
}
