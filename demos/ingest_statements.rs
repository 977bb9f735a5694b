use anyhow::{bail, Context};
use asset_ingest::*;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Ingests the statements named on the command line, prints the review
/// sessions and commits every session with its default selection.
///
/// cargo run --example ingest_statements --features gemini -- holdings.csv cas.pdf
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        bail!("usage: ingest_statements <file> [<file> ...]");
    }

    let mut files = Vec::new();
    for path in &paths {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path))?;
        let filename = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        files.push(UploadedFile::new(filename, bytes));
    }

    let portfolio = Arc::new(InMemoryPortfolioStore::new());
    let staging = Arc::new(InMemoryStagingRepository::new());
    let pipeline = IngestionPipeline::builder(portfolio.clone(), staging)
        .oracle(Arc::new(GeminiClient::new(api_key)))
        .build()?;

    println!("🚀 Ingesting {} file(s)...", files.len());

    let (tx, mut rx) = mpsc::channel(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                IngestEvent::Extracting { filename } => println!("📄 Extracting {}", filename),
                IngestEvent::FileFailed { filename, reason } => println!("❌ {}: {}", filename, reason),
                IngestEvent::Classifying(p) => println!("🏷️  Classified {}/{}", p.completed, p.total),
                IngestEvent::Staging { sessions } => println!("📥 Staging {} session(s)", sessions),
                _ => {}
            }
        }
    });

    let summary = pipeline.ingest("demo-user", &files, Some(tx)).await?;
    printer.await?;

    println!(
        "\n✅ {} succeeded, {} failed, {} classification failure(s)",
        summary.succeeded,
        summary.failed,
        summary.classification_failures.len()
    );

    for session in &summary.sessions {
        let view = pipeline.review(session.session_id).await?;
        println!(
            "\n📋 {} ({} asset(s), {:?} statement date)",
            session.proposed_name.as_deref().unwrap_or("Unnamed session"),
            view.staged_assets.len(),
            session.statement_date.date
        );
        for asset in &view.staged_assets {
            println!(
                "   {:<40} {:>14.2}  {}/{} ({:.2})",
                asset.name(),
                asset.value(),
                asset.asset_class().as_str(),
                asset.classified.classification.asset_subclass,
                asset.confidence()
            );
        }
        for group in &view.duplicate_groups {
            let names: Vec<&str> = group.members.iter().map(|m| m.name.as_str()).collect();
            println!(
                "   ⚠️  possible duplicates {:?}: spread {:.1}%, {:?}",
                names, group.value_spread_pct, group.recommendation
            );
        }

        let result = pipeline
            .finalize(session.session_id, &FinalizeOptions::default())
            .await?;
        println!(
            "   💾 saved {} asset(s) to {} (total {:.2})",
            result.assets_saved,
            result.snapshot_id,
            result.totals.total()
        );
    }

    let snapshots = portfolio.list_snapshots("demo-user").await?;
    println!("\n📊 Portfolio now has {} snapshot(s)", snapshots.len());
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    Ok(())
}
