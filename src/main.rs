use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use syncshadow::{EngineConfig, RawEvent, SemanticEvent, SyncShadow};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "SyncShadow - Causally ordered replay of recorded synchronization events"
)]
struct Cli {
    /// Recorded trace, one JSON raw event per line
    trace: PathBuf,

    /// JSON engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journal file for the replayed events
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Print the final state of every process
    #[arg(short, long)]
    snapshot: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let mut builder = SyncShadow::new()
        .with_config(config)
        .observer(|event: &SemanticEvent| match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to serialize event: {e}"),
        });
    if let Some(path) = cli.log {
        builder = builder.with_log(path);
    }
    let engine = builder.start()?;

    let file = File::open(&cli.trace)
        .with_context(|| format!("Failed to open trace {}", cli.trace.display()))?;
    let mut replayed = 0usize;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read trace line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: RawEvent = serde_json::from_str(&line)
            .with_context(|| format!("Invalid raw event on line {}", index + 1))?;
        // A failed process is already torn down; the others keep going
        if let Err(e) = engine.dispatch(event) {
            error!("Line {}: {e}", index + 1);
        }
        replayed += 1;
    }
    info!("Replayed {replayed} raw events");

    if cli.snapshot {
        for process_id in engine.process_ids() {
            if let Some(snapshot) = engine.snapshot(process_id) {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
        }
    }

    engine.flush_logs()?;
    Ok(())
}
