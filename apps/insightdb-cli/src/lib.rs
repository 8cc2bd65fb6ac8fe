//! Shared helpers for the `insightdb` binaries.

use insightdb_core::types::{CommentaryLine, RankedResult, ScoreSource};
use tracing_subscriber::EnvFilter;

/// Logs go to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}

pub fn print_ranked(results: &[RankedResult]) {
    for (i, r) in results.iter().enumerate() {
        let marker = match r.source {
            ScoreSource::Joint => "",
            ScoreSource::Recall => " (recall)",
        };
        println!(
            "{:>2}. [{:.3}{}] {} p.{} · {}",
            i + 1,
            r.score,
            marker,
            r.chunk.document_id,
            r.chunk.page_number,
            r.chunk.section_title
        );
        println!("    {}", preview(&r.chunk.raw_text, 160));
    }
}

pub fn print_commentary(lines: &[CommentaryLine]) {
    for line in lines {
        println!("    {}: {}", line.speaker, line.text);
    }
}
