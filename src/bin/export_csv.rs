//! One-shot export: fetch every post from the last N months and write CSV.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use post_pulse::export::{collect_rows, month_cutoff, to_csv};
use post_pulse::ingest::config::load_config_default;
use post_pulse::ingest::fetcher::HttpTransport;
use post_pulse::ingest::types::TokioSleeper;

#[derive(Debug, Parser)]
#[command(name = "export_csv", about = "Export posts from the configured feed to CSV")]
struct Args {
    /// How many months back to export (at least 1)
    #[arg(long)]
    months: u32,

    /// Output file
    #[arg(long, default_value = "posts.csv")]
    out: PathBuf,

    /// Override the configured source URL
    #[arg(long)]
    source_url: Option<String>,

    /// Safety cap on pages walked
    #[arg(long, default_value_t = 500)]
    max_pages: u32,
}

async fn run(args: Args) -> Result<usize> {
    let mut cfg = load_config_default()?;
    if let Some(url) = args.source_url {
        cfg.source_url = url;
    }
    let cutoff = month_cutoff(Utc::now(), args.months)?;
    tracing::info!(source = %cfg.source_url, %cutoff, "exporting posts");

    let transport = HttpTransport::from_config(&cfg)?;
    let rows = collect_rows(&transport, &TokioSleeper, &cfg, cutoff, args.max_pages).await?;

    tokio::fs::write(&args.out, to_csv(&rows))
        .await
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!("exported {} posts to {}", rows.len(), args.out.display());
    Ok(rows.len())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    match run(Args::parse()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("export failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
