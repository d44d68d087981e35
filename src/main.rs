//! # Support KB CLI (`kb`)
//!
//! Command-line front end for the knowledge retrieval core. Loads the
//! knowledge base described by the config file, builds a retrieval engine,
//! and runs one operation.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb search "<query>"` | Rank documents against a query |
//! | `kb context "<query>"` | Assemble the length-bounded prompt context |
//! | `kb add "<content>"` | Append a custom document (persisted via snapshot) |
//! | `kb stats` | Show document counts and the active scoring mode |
//!
//! ## Examples
//!
//! ```bash
//! kb search "退款流程" --top-k 5
//! kb search "退款流程" --json
//! kb context "退款流程" --max-chars 800
//! kb add "问题：测试\n答案：测试答案" --field question=测试 --field answer=测试答案
//! kb add "保修期为一年。" --doc-type faq --field question=保修期多久？ --field answer=一年。
//! kb stats
//! ```

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use support_kb::config::{load_config, Config};
use support_kb::embedding::create_embedder;
use support_kb::engine::RetrievalEngine;
use support_kb::store::DocumentStore;

/// Support KB — the knowledge retrieval core of a customer-support chat
/// backend.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "Knowledge retrieval core for a customer-support chat backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank knowledge documents against a query.
    Search {
        query: String,

        /// Maximum number of results (defaults to retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print results as JSON instead of a readable listing.
        #[arg(long)]
        json: bool,
    },

    /// Assemble the context string handed to the prompt layer.
    Context {
        query: String,

        /// Character budget (defaults to retrieval.context_max_chars).
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Append a custom knowledge document.
    ///
    /// The content is stored verbatim. Additional structured fields are
    /// passed as repeated `--field key=value` arguments. The updated store
    /// is written to the configured snapshot so the addition survives
    /// restarts.
    Add {
        content: String,

        /// Document type to carry; `faq` with question/answer fields stores
        /// a FAQ entry, anything else a custom entry.
        #[arg(long = "doc-type", default_value = "custom")]
        doc_type: String,

        /// Structured field, `key=value`. Repeatable.
        #[arg(long = "field")]
        fields: Vec<String>,
    },

    /// Show document counts and the active scoring mode.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let engine = build_engine(&config).await;

    match cli.command {
        Commands::Search { query, top_k, json } => {
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            let results = engine.search(&query, top_k).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    let first_line = result.document.content().lines().next().unwrap_or("");
                    println!(
                        "{}. [{:.4}] {}  {}",
                        i + 1,
                        result.similarity_score,
                        result.document.kind(),
                        first_line
                    );
                }
            }
        }
        Commands::Context { query, max_chars } => {
            let max_chars = max_chars.unwrap_or(config.retrieval.context_max_chars);
            let context = engine.get_context(&query, max_chars).await;
            if context.is_empty() {
                println!("No context.");
            } else {
                println!("{}", context);
            }
        }
        Commands::Add {
            content,
            doc_type,
            fields,
        } => {
            let mut engine = engine;
            let fields = parse_fields(&fields)?;
            engine.add_custom(content, &doc_type, fields).await;

            match &config.knowledge.snapshot_path {
                Some(path) => {
                    engine.store().save_snapshot(path)?;
                    println!("added: {} documents total", engine.store().len());
                }
                None => {
                    println!(
                        "added: {} documents total (no snapshot_path configured, not persisted)",
                        engine.store().len()
                    );
                }
            }
        }
        Commands::Stats => {
            let store = engine.store();
            let count_kind = |kind: &str| {
                store
                    .documents()
                    .iter()
                    .filter(|d| d.kind() == kind)
                    .count()
            };
            println!("documents: {}", store.len());
            println!("  faq: {}", count_kind("faq"));
            println!("  category: {}", count_kind("category"));
            println!("  custom: {}", count_kind("custom"));
            println!("mode: {}", engine.mode());
        }
    }

    Ok(())
}

/// Load the store and build the engine.
///
/// An existing snapshot takes precedence over the raw sources (it contains
/// them plus any custom additions). Embedder construction failure is
/// non-fatal: the engine comes up in lexical mode.
async fn build_engine(config: &Config) -> RetrievalEngine {
    let store = match &config.knowledge.snapshot_path {
        Some(path) if path.exists() => match DocumentStore::load_snapshot(path) {
            Ok(store) => {
                tracing::info!(path = %path.display(), documents = store.len(), "restored knowledge snapshot");
                store
            }
            Err(err) => {
                tracing::warn!(error = %err, "snapshot unreadable, loading sources instead");
                DocumentStore::load(&config.knowledge).await
            }
        },
        _ => DocumentStore::load(&config.knowledge).await,
    };

    let embedder = match create_embedder(&config.embedding) {
        Ok(embedder) => embedder,
        Err(err) => {
            tracing::warn!(error = %err, "embedding capability unavailable, using lexical matching");
            None
        }
    };

    RetrievalEngine::build(store, embedder)
        .await
        .with_context_top_k(config.retrieval.context_top_k)
}

/// Parse repeated `key=value` field arguments into a JSON map.
fn parse_fields(fields: &[String]) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut map = serde_json::Map::new();
    for field in fields {
        let (key, value) = field
            .split_once('=')
            .with_context(|| format!("Invalid --field '{}': expected key=value", field))?;
        map.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }
    Ok(map)
}
