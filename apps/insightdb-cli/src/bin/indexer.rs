use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use insightdb_cli::init_tracing;
use insightdb_core::config::Config;
use insightdb_core::ingest::{collect_section_files, load_sections_file};
use insightdb_engine::InsightEngine;

/// Ingest parser output (JSON section files) into the chunk index.
#[derive(Parser)]
#[command(name = "insightdb-indexer")]
struct Args {
    /// Files or directories to scan for `*.json` section files.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Stop after this many files.
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;

    let mut files: Vec<PathBuf> = args.paths.iter().flat_map(|p| collect_section_files(p)).collect();
    if let Some(limit) = args.limit {
        println!("🔢 Limiting to {limit} files");
        files.truncate(limit);
    }
    if files.is_empty() {
        println!("No section files found.");
        return Ok(());
    }

    let engine = InsightEngine::from_config(&config).await?;
    println!("InsightDB Indexer\n=================");
    println!("Index: {}", engine.index().path().display());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );

    let (mut documents, mut chunks, mut failed) = (0usize, 0usize, 0usize);
    for file in &files {
        let fallback = file.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        pb.set_message(fallback.clone());
        let outcome = async {
            let sections = load_sections_file(file)?;
            let stored = engine
                .ingest_smart_chunks(sections, &fallback)
                .await
                .with_context(|| format!("ingesting {}", file.display()))?;
            anyhow::Ok(stored)
        }
        .await;
        match outcome {
            Ok(stored) => {
                documents += stored.len();
                chunks += stored.iter().map(|(_, n)| n).sum::<usize>();
            }
            Err(e) => {
                failed += 1;
                pb.suspend(|| eprintln!("⚠️  {e:#}"));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    println!("\n✅ Indexing completed");
    println!("📊 {documents} documents, {chunks} chunks from {} files", files.len());
    if failed > 0 {
        println!("⚠️  {failed} files failed, see messages above");
    }
    println!("\n💡 To query, use: cargo run --bin insightdb -- related '<text>'");
    Ok(())
}
