//! Replay mode: drive recorded session bars through the engine, symbol by
//! symbol, and regenerate the decision log.
//!
//! Symbols run in parallel but merge in sorted-symbol order, so two replays
//! over the same inputs and config produce byte-identical logs. A symbol
//! with missing or malformed data is skipped and counted, never treated as
//! a flat session.

use anyhow::Context;
use rayon::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use crate::data::bars::{load_session_bars, Bar};
use crate::data::pivots::{load_pivot_specs, PivotSpec};
use crate::engine::decision_log::DecisionLog;
use crate::engine::session::{run_session, EngineConfig, SessionCounts};
use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaySummary {
    pub symbols: usize,
    pub skipped: usize,
    pub bars: usize,
    pub attempts: u32,
    pub entered: u32,
    pub blocked: u32,
}

impl ReplaySummary {
    fn absorb(&mut self, counts: SessionCounts) {
        self.symbols += 1;
        self.bars += counts.bars;
        self.attempts += counts.attempts;
        self.entered += counts.entered;
        self.blocked += counts.blocked;
    }

    pub fn render(&self, title: &str) -> String {
        let rule = "═".repeat(62);
        format!(
            "{rule}\n  {title}\n{rule}\n  \
             Symbols:   {} ({} skipped)\n  \
             Bars:      {}\n  \
             Attempts:  {}\n  \
             Entered:   {}\n  \
             Blocked:   {}\n{rule}\n",
            self.symbols, self.skipped, self.bars, self.attempts, self.entered, self.blocked
        )
    }
}

/// Replay in-memory sessions. Sorts by symbol and merges in that order so
/// the resulting log is reproducible regardless of scheduling.
pub fn replay_sessions(
    mut sessions: Vec<(PivotSpec, Vec<Bar>)>,
    config: &EngineConfig,
) -> (DecisionLog, ReplaySummary, Vec<PipelineError>) {
    sessions.sort_by(|a, b| a.0.symbol.cmp(&b.0.symbol));

    let results: Vec<_> = sessions
        .par_iter()
        .map(|(spec, bars)| run_session(spec.clone(), bars, config.clone()))
        .collect();

    let mut log = DecisionLog::new();
    let mut summary = ReplaySummary::default();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok((entries, counts)) => {
                log.extend(entries);
                summary.absorb(counts);
            }
            Err(e) => {
                warn!("skipping session: {}", e);
                summary.skipped += 1;
                errors.push(e);
            }
        }
    }
    (log, summary, errors)
}

/// Full file-driven replay: load pivots and cached bars, run every symbol,
/// write the decision log (truncating any previous run).
pub fn run_replay(
    data_dir: &Path,
    pivot_path: &Path,
    log_out: &Path,
    date: &str,
    config: &EngineConfig,
) -> anyhow::Result<(DecisionLog, ReplaySummary)> {
    let (specs, skipped_specs) =
        load_pivot_specs(pivot_path).context("failed to load pivot specs")?;
    info!("replaying {} symbols for {}", specs.len(), date);

    let mut sessions = Vec::new();
    let mut skipped = skipped_specs.len();
    for spec in specs {
        match load_session_bars(data_dir, &spec.symbol, date) {
            Ok(bars) => sessions.push((spec, bars.bars().to_vec())),
            Err(e) => {
                warn!("skipping {}: {}", spec.symbol, e);
                skipped += 1;
            }
        }
    }

    let (log, mut summary, errors) = replay_sessions(sessions, config);
    summary.skipped += skipped + errors.len();

    log.write_json_lines(log_out)
        .with_context(|| format!("failed to write decision log {:?}", log_out))?;
    info!("wrote {} decisions to {:?}", log.entries().len(), log_out);

    Ok((log, summary))
}
