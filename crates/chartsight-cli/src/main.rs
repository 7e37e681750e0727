use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use chartsight_contracts::config::{MediaConfig, VlmConfig};
use chartsight_contracts::events::EventWriter;
use chartsight_contracts::market::CsvStore;
use chartsight_contracts::snapshots::SnapshotStore;
use chartsight_contracts::vlm::AnalysisKind;
use chartsight_engine::prompts;
use chartsight_engine::{ImagePreparer, OllamaClient, Pipeline, PipelineOutcome};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "chartsight",
    version,
    about = "Visual reasoning over financial dashboard snapshots"
)]
struct Cli {
    /// Media root holding the snapshots directory (default: $MEDIA_ROOT or ./media).
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,
    /// Market data CSV backing the prompt context.
    #[arg(long, global = true, default_value = "data/financial_data.csv")]
    data: PathBuf,
    /// Ollama server URL (default: $OLLAMA_HOST or http://localhost:11434).
    #[arg(long, global = true)]
    host: Option<String>,
    /// Vision model name (default: $OLLAMA_MODEL or llava).
    #[arg(long, global = true)]
    model: Option<String>,
    /// Request timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Append pipeline events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Print raw JSON results instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the vision backend is reachable and the model installed.
    Status,
    /// Ask a question about a snapshot (the latest one by default).
    Chat {
        question: String,
        #[arg(long)]
        snapshot: Option<u64>,
    },
    /// Run a structured analysis of a snapshot.
    Analyze {
        /// One of: full, trends, correlation, volatility, summary.
        #[arg(long, default_value = "full")]
        kind: String,
        #[arg(long)]
        snapshot: Option<u64>,
        /// Commodity pair for correlation analysis, e.g. gold,oil.
        #[arg(long)]
        pair: Option<String>,
    },
    /// Store a dashboard image as a snapshot and summarize it.
    Save {
        image: PathBuf,
        #[arg(long)]
        title: Option<String>,
        /// Skip the automatic summary generation.
        #[arg(long)]
        no_summary: bool,
    },
    /// List stored snapshots, newest first.
    Snapshots,
    /// Regenerate the summary for a snapshot (e.g. after starting Ollama).
    Regenerate { id: u64 },
    /// Show example questions to get started.
    Questions,
}

fn main() {
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("chartsight error: {err:#}");
            process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = VlmConfig::from_env();
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }

    let media = cli
        .media_root
        .clone()
        .map(MediaConfig::new)
        .unwrap_or_else(MediaConfig::from_env);
    let store = SnapshotStore::open(media.snapshots_dir())?;
    let client = OllamaClient::new(&config);

    let mut pipeline = Pipeline::new(
        store,
        ImagePreparer::with_raster_codec(),
        Box::new(client),
        Box::new(CsvStore::new(&cli.data)),
        &config,
    );
    if let Some(events) = &cli.events {
        pipeline = pipeline.with_events(EventWriter::with_generated_session(events));
    }

    match &cli.command {
        Command::Status => {
            let availability = pipeline.status();
            println!(
                "{}: {} (model {} at {})",
                if availability.available { "online" } else { "offline" },
                availability.message,
                config.model,
                config.host,
            );
            Ok(i32::from(!availability.available))
        }
        Command::Chat { question, snapshot } => {
            let outcome = pipeline.chat(question, *snapshot);
            Ok(print_outcome(&outcome, cli.json))
        }
        Command::Analyze {
            kind,
            snapshot,
            pair,
        } => {
            let pair = pair.as_deref().map(parse_pair).transpose()?;
            let outcome = pipeline.analyze(*snapshot, AnalysisKind::parse(kind), pair);
            Ok(print_outcome(&outcome, cli.json))
        }
        Command::Save {
            image,
            title,
            no_summary,
        } => {
            let bytes = fs::read(image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let extension = image
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("png");
            // A failed summary never fails the save itself.
            let (record, _outcome) =
                pipeline.save_snapshot(title.clone(), extension, &bytes, !*no_summary)?;

            println!("Saved snapshot #{} ({})", record.id, record.filename);
            if record.has_ai_summary() {
                println!("Summary: {}", record.ai_summary);
            } else if !record.ai_analysis_error.is_empty() {
                println!("Summary unavailable: {}", record.ai_analysis_error);
            }
            Ok(0)
        }
        Command::Snapshots => {
            let snapshots = pipeline.store().list();
            if snapshots.is_empty() {
                println!("No snapshots stored yet.");
                return Ok(0);
            }
            for record in snapshots {
                println!("#{} {} {}", record.id, record.created_at, record.title);
                if record.has_ai_summary() {
                    println!("    {}", record.ai_summary);
                } else if !record.ai_analysis_error.is_empty() {
                    println!("    analysis failed: {}", record.ai_analysis_error);
                }
            }
            Ok(0)
        }
        Command::Regenerate { id } => {
            let outcome = pipeline.regenerate_summary(*id);
            Ok(print_outcome(&outcome, cli.json))
        }
        Command::Questions => {
            for question in prompts::example_questions() {
                println!("- {question}");
            }
            Ok(0)
        }
    }
}

fn print_outcome(outcome: &PipelineOutcome, as_json: bool) -> i32 {
    if as_json {
        let rendered = serde_json::to_string_pretty(&outcome.result)
            .unwrap_or_else(|_| "{}".to_string());
        println!("{rendered}");
        return i32::from(!outcome.result.success);
    }

    match (&outcome.result.response, &outcome.result.failure) {
        (Some(response), _) => {
            println!("{response}");
            if let Some(id) = outcome.snapshot_id {
                println!("(snapshot #{id}, model {})", outcome.result.model);
            }
            0
        }
        (None, Some(failure)) => {
            println!("Error ({}): {}", failure.kind, failure.message);
            1
        }
        (None, None) => 1,
    }
}

/// `gold,oil` -> ("gold", "oil")
fn parse_pair(raw: &str) -> Result<(String, String)> {
    let mut parts = raw.split(',').map(str::trim).filter(|part| !part.is_empty());
    let first = parts.next();
    let second = parts.next();
    match (first, second, parts.next()) {
        (Some(first), Some(second), None) => Ok((first.to_string(), second.to_string())),
        _ => bail!("expected --pair in the form a,b (e.g. gold,oil)"),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_pair;

    #[test]
    fn parse_pair_accepts_two_commodities() {
        let pair = parse_pair("gold, oil").expect("pair should parse");
        assert_eq!(pair, ("gold".to_string(), "oil".to_string()));
    }

    #[test]
    fn parse_pair_rejects_wrong_arity() {
        assert!(parse_pair("gold").is_err());
        assert!(parse_pair("gold,oil,silver").is_err());
        assert!(parse_pair("").is_err());
    }
}
