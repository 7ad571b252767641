//! `reverie` — record dreams and run the multi-agent analysis pipeline.
//!
//! This binary is the composition root: it constructs the Ollama client and
//! the SQLite store once, threads both into the pipeline as explicit
//! handles, and owns their lifecycle for the duration of the process.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use reverie_llm::models;
use reverie_llm::ollama::OllamaClient;
use reverie_pipeline::{AnalysisRequest, Pipeline, PipelineConfig, PipelineState};
use reverie_store::{AnalysisStore, SqliteStore};

#[derive(Parser)]
#[command(name = "reverie", version, about = "Multi-agent dream analysis")]
struct Cli {
    /// SQLite database path.
    #[arg(long, global = true, default_value = "reverie.db")]
    db: PathBuf,

    /// Ollama endpoint (default http://localhost:11434).
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a dream and run the full analysis pipeline on it.
    Analyze {
        /// The dream text. Read from stdin when omitted.
        text: Option<String>,

        /// Model every stage runs on.
        #[arg(long, default_value = models::DEFAULT_MODEL)]
        model: String,

        /// Stream pipeline events as NDJSON instead of waiting for the end.
        #[arg(long)]
        follow: bool,

        /// Automatically retry specialists scoring below the threshold.
        #[arg(long)]
        auto_retry: bool,

        /// Quality threshold for the retry policy (1-5).
        #[arg(long, default_value_t = 3)]
        threshold: u8,
    },

    /// List recorded dreams, newest first.
    List,

    /// Show one dream and all its analyses.
    Show {
        /// Dream id.
        id: i64,
    },

    /// Print the known models, weakest to strongest.
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = Arc::new(SqliteStore::open(&cli.db).context("opening database")?);

    match cli.command {
        Command::Analyze {
            text,
            model,
            follow,
            auto_retry,
            threshold,
        } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buffer = String::new();
                    let _ = std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("reading dream from stdin")?;
                    buffer
                }
            };
            let text = text.trim();
            if text.len() < 10 {
                bail!("please enter a longer dream (at least 10 characters)");
            }

            let generator =
                Arc::new(OllamaClient::new(cli.base_url).context("building ollama client")?);
            let config = PipelineConfig {
                quality_threshold: threshold,
                auto_retry,
                ..PipelineConfig::default()
            };
            let pipeline = Pipeline::with_config(
                generator,
                Arc::clone(&store) as Arc<dyn AnalysisStore>,
                config,
            );

            let subject = store.create_subject(text)?;
            eprintln!("dream #{} recorded, analyzing with {model}", subject.id);

            if follow {
                analyze_streaming(&pipeline, subject.id, &model).await
            } else {
                let state = pipeline
                    .run(AnalysisRequest::new(subject.id, text, &model))
                    .await?;
                print_state(&state);
                Ok(())
            }
        }

        Command::List => {
            for subject in store.list_subjects()? {
                let analyses = store.list_for_subject(subject.id)?.len();
                println!(
                    "#{:<4} {}  ({analyses} analyses)  {}",
                    subject.id,
                    &subject.created_at[..16.min(subject.created_at.len())],
                    reverie_core::text::preview(&subject.content, 72),
                );
            }
            Ok(())
        }

        Command::Show { id } => {
            let Some(subject) = store.get_subject(id)? else {
                bail!("dream {id} not found");
            };
            println!("dream #{} ({})\n{}\n", subject.id, subject.created_at, subject.content);
            for row in store.list_for_subject(id)? {
                println!("── {} [{}] {}", row.role, row.model, stars(row.score));
                println!("{}\n", row.content);
            }
            Ok(())
        }

        Command::Models => {
            for model in models::MODEL_LADDER {
                let marker = if model.id == models::DEFAULT_MODEL {
                    " (default)"
                } else {
                    ""
                };
                println!("{:<24} {}{marker}", model.label, model.id);
            }
            Ok(())
        }
    }
}

/// Stream the first pass as raw text, then the remainder as NDJSON events.
async fn analyze_streaming(pipeline: &Pipeline, subject_id: i64, model: &str) -> anyhow::Result<()> {
    let mut first = pipeline.stream_first_pass(subject_id, model).await?;
    let mut stdout = std::io::stdout();
    while let Some(fragment) = first.next().await {
        stdout.write_all(fragment?.as_bytes())?;
        stdout.flush()?;
    }
    println!();

    let mut events = pipeline.stream_analysis(subject_id, model).await?;
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn print_state(state: &PipelineState) {
    use reverie_core::role::Role;

    println!("\n=== First pass ===\n{}", state.generalist);
    for role in Role::SPECIALISTS {
        println!(
            "\n=== {} {} ===\n{}",
            role,
            stars(state.scores.get(&role).copied()),
            state.output(role),
        );
    }
    println!("\n=== Synthesis ===\n{}", state.synthesis);
}

fn stars(score: Option<u8>) -> String {
    match score {
        Some(score) => {
            let filled = usize::from(score.min(5));
            format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
        }
        None => String::new(),
    }
}
