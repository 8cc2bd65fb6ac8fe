use clap::{Parser, Subcommand};

use insightdb_cli::{init_tracing, print_commentary, print_ranked};
use insightdb_core::config::Config;
use insightdb_engine::InsightEngine;

#[derive(Parser)]
#[command(name = "insightdb", about = "Related passages and insights across your document library")]
struct Cli {
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Passages most related to the selection (recall + rerank).
    Related {
        selection: String,
        /// Restrict to one document.
        #[arg(long)]
        doc: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Related passages plus contradictions, enhancements and connections.
    Insights {
        selection: String,
        #[arg(long)]
        doc: Option<String>,
    },
    /// Persona-styled Host/Analyst scripts about the selection.
    Podcast { selection: String },
    /// Remove every chunk of a document.
    Delete { document_id: String },
    /// List indexed documents.
    Documents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let engine = InsightEngine::from_config(&config).await?;

    match cli.command {
        Command::Related { selection, doc, limit } => {
            let mut results = engine.get_related(&selection, doc.as_deref()).await?;
            if let Some(limit) = limit {
                results.truncate(limit);
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No related passages found.");
            } else {
                println!("🔎 {} related passages\n", results.len());
                print_ranked(&results);
            }
        }
        Command::Insights { selection, doc } => {
            let insights = engine.retrieve(&selection, doc.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&insights)?);
                return Ok(());
            }
            println!("🔎 {} related passages (from {} recalled)", insights.related.len(), insights.recall_count);
            if insights.rerank_degraded {
                println!("⚠️  Reranker unavailable, showing recall order");
            }
            print_ranked(&insights.related);
            for category in insights.categories() {
                println!("\n📌 {} ({})", category.kind.response_key(), category.results.len());
                if !category.is_complete() {
                    println!("⚠️  {:?}, results may be missing", category.status);
                }
                print_ranked(&category.results);
                print_commentary(&category.commentary);
            }
        }
        Command::Podcast { selection } => {
            let scripts = engine.persona_scripts(&selection).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&scripts)?);
                return Ok(());
            }
            for script in &scripts {
                let note = if script.fallback { " (fallback)" } else { "" };
                println!("\n🎙️  {}{}", script.persona.as_str(), note);
                print_commentary(&script.lines);
            }
        }
        Command::Delete { document_id } => {
            engine.delete_document(&document_id).await?;
            println!("✅ Removed {document_id}");
        }
        Command::Documents => {
            let docs = engine.documents().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else {
                println!("📚 {} documents", docs.len());
                for doc in docs {
                    println!("  {doc}");
                }
            }
        }
    }
    Ok(())
}
