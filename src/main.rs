use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};

use pivot_breakout::data::pivots::load_pivot_specs;
use pivot_breakout::engine::session::EngineConfig;
use pivot_breakout::live::{run_live, BarEvent};
use pivot_breakout::replay::run_replay;
use pivot_breakout::validate::run_validation;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pivot breakout decision engine")]
struct Args {
    /// Engine config JSON; defaults apply when omitted
    #[arg(short, long, env = "PIVOT_BREAKOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose (debug-level) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay cached session bars and regenerate the decision log
    Replay {
        /// Directory of cached bar files ({SYMBOL}-{YYYYMMDD}.bars.csv.zst)
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Pivot spec JSON file
        #[arg(short, long)]
        pivots: PathBuf,

        /// Session date, YYYYMMDD
        #[arg(long)]
        date: String,

        /// Decision log output path
        #[arg(short, long, default_value = "decisions.jsonl")]
        log: PathBuf,
    },
    /// Grade a decision log against what the market actually did
    Validate {
        #[arg(short, long)]
        data_dir: PathBuf,

        #[arg(short, long)]
        pivots: PathBuf,

        #[arg(long)]
        date: String,

        /// Decision log to validate
        #[arg(short, long, default_value = "decisions.jsonl")]
        log: PathBuf,

        /// Optional JSON report output path
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Consume JSON bar events from stdin and log decisions as they happen
    Live {
        #[arg(short, long)]
        pivots: PathBuf,

        #[arg(short, long, default_value = "decisions.jsonl")]
        log: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!("pivot_breakout={default_level}"))
            }),
        )
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match args.command {
        Command::Replay {
            data_dir,
            pivots,
            date,
            log,
        } => {
            let (_, summary) = run_replay(&data_dir, &pivots, &log, &date, &config)?;
            print!("{}", summary.render("REPLAY COMPLETE"));
        }
        Command::Validate {
            data_dir,
            pivots,
            date,
            log,
            report,
        } => {
            let result = run_validation(&data_dir, &pivots, &log, &date, &config)?;
            print!("{}", result.render());
            if let Some(path) = report {
                result.write_json(&path)?;
                info!("wrote validation report to {:?}", path);
            }
            if !result.critical.is_empty() {
                std::process::exit(2);
            }
        }
        Command::Live { pivots, log } => {
            let (specs, skipped) =
                load_pivot_specs(&pivots).context("failed to load pivot specs")?;
            if !skipped.is_empty() {
                info!("{} invalid pivot specs skipped", skipped.len());
            }

            let (tx, rx) = mpsc::channel::<BarEvent>(1024);
            let reader = tokio::task::spawn_blocking(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let line = match line {
                        Ok(l) => l,
                        Err(e) => {
                            error!("stdin read failed: {}", e);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<BarEvent>(&line) {
                        Ok(event) => {
                            if tx.blocking_send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("malformed bar event: {}", e),
                    }
                }
            });

            let summary = run_live(rx, specs, &config, &log).await?;
            reader.await?;
            print!("{}", summary.render("LIVE SESSION COMPLETE"));
        }
    }

    Ok(())
}
