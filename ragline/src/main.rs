use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ragline::{
    load_ingest_file, AdminResponse, CacheRegistry, CacheSettings, ChatOrchestrator, IngestRequest,
    RagConfig, TokenCallback,
};

#[derive(Parser)]
#[command(name = "ragline")]
#[command(about = "Grounded retrieval-augmented chat with tiered caching", long_about = None)]
struct Cli {
    /// Vector namespace (overrides PINECONE_NAMESPACE)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one or more questions through the cached pipeline
    Chat {
        /// Question to ask (repeat to ask several in one process)
        #[arg(long = "q", required = true)]
        questions: Vec<String>,

        /// Print answer tokens as they arrive
        #[arg(long)]
        stream: bool,

        /// Print cache statistics after the last question
        #[arg(long)]
        stats: bool,
    },

    /// Run vector search only and show the retrieved chunks
    DebugRetrieval {
        /// Question to search for
        #[arg(long = "q")]
        question: String,
    },

    /// Show cache statistics of this process (always empty in a one-shot run; use `chat --stats`)
    Stats,

    /// Purge caches or a vector namespace
    Purge {
        #[command(subcommand)]
        target: PurgeTarget,
    },

    /// Embed and upsert pre-extracted chunks from a JSONL file
    Ingest {
        /// One JSON object per line with `content` (or `text`) and `source` (or `url`)
        #[arg(short, long)]
        file: PathBuf,

        /// Ingest at most this many chunks
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Write to the index (default is a dry run)
        #[arg(long)]
        commit: bool,
    },
}

#[derive(Subcommand)]
enum PurgeTarget {
    /// Clear this process's cache tiers (only meaningful when embedded in a long-lived process)
    Caches {
        /// all | retriever | retrieval | embeddings | answer
        #[arg(short, long, default_value = "all")]
        scope: String,
    },

    /// Delete every vector in the configured namespace
    Namespace {
        /// Index name (defaults to PINECONE_INDEX)
        #[arg(short, long)]
        index: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Logs go to stderr; stdout carries JSON only
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ragline=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = RagConfig::from_env()?;
    if let Some(namespace) = cli.namespace {
        config.namespace = Some(namespace).filter(|ns| !ns.trim().is_empty());
    }
    let registry = CacheRegistry::new(CacheSettings::from_env()?)?;

    let ok = match cli.command {
        Commands::Chat {
            questions,
            stream,
            stats,
        } => {
            if let Err(e) = config.validate() {
                emit(&AdminResponse::from(Err::<(), _>(e)))?
            } else {
                let orchestrator = ChatOrchestrator::from_config(config, registry);
                let mut all_ok = true;

                for question in &questions {
                    all_ok &= chat_once(&orchestrator, question, stream).await?;
                }
                if stats {
                    emit(&orchestrator.admin().cache_stats().await)?;
                }
                all_ok
            }
        }

        Commands::DebugRetrieval { question } => {
            if let Err(e) = config.validate() {
                emit(&AdminResponse::from(Err::<(), _>(e)))?
            } else {
                let orchestrator = ChatOrchestrator::from_config(config, registry);
                emit(&AdminResponse::from(
                    orchestrator.debug_retrieval(&question).await,
                ))?
            }
        }

        Commands::Stats => {
            let admin = ChatOrchestrator::from_config(config, registry).admin();
            emit(&admin.cache_stats().await)?
        }

        Commands::Purge { target } => match target {
            PurgeTarget::Caches { scope } => {
                let admin = ChatOrchestrator::from_config(config, registry).admin();
                emit(&admin.purge_caches(&scope).await)?
            }
            PurgeTarget::Namespace { index } => {
                let index = index.unwrap_or_else(|| config.index.clone());
                let namespace = config.namespace.clone().unwrap_or_default();
                let admin = ChatOrchestrator::from_config(config, registry).admin();
                emit(&admin.purge_namespace(&index, &namespace).await)?
            }
        },

        Commands::Ingest {
            file,
            max_chunks,
            commit,
        } => match load_ingest_file(&file).await {
            Err(e) => emit(&AdminResponse::from(Err::<(), _>(e)))?,
            Ok(_) if commit && config.validate().is_err() => {
                emit(&AdminResponse::<()>::from(config.validate()))?
            }
            Ok(documents) => {
                let admin = ChatOrchestrator::from_config(config, registry).admin();
                let request = IngestRequest {
                    documents,
                    max_chunks,
                    dry_run: !commit,
                };
                emit(&admin.ingest_documents(request).await)?
            }
        },
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Answer one question, printing streamed tokens and then a JSON summary
async fn chat_once(orchestrator: &ChatOrchestrator, question: &str, stream: bool) -> Result<bool> {
    let started = Instant::now();

    let outcome = if stream {
        let mut stdout = std::io::stdout();
        let mut write_token = |token: &str| {
            let _ = stdout.write_all(token.as_bytes());
            let _ = stdout.flush();
        };
        let on_token: TokenCallback<'_> = &mut write_token;
        let outcome = orchestrator.run_chat(question, true, Some(on_token)).await;
        println!();
        outcome
    } else {
        orchestrator.run_chat(question, false, None).await
    };

    let elapsed_ms = started.elapsed().as_millis();
    let response = AdminResponse::from(outcome.map(|outcome| {
        json!({
            "question": question,
            "elapsedMs": elapsed_ms,
            "result": outcome,
        })
    }));
    emit(&response)
}

/// Print a response as JSON and report whether it succeeded
fn emit<T: Serialize>(response: &AdminResponse<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(response.is_ok())
}
