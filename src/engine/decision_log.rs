//! Decision log: the primary observable contract of the engine.
//!
//! Append-only within a run, regenerated (truncated) each run, identical in
//! shape for live and replay. Exactly one entry per bar processed by an
//! attempt; intermediate continue-monitoring entries are distinct from
//! terminal blocks so the validator can match exhaustively on the decision
//! kind.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::data::pivots::Side;
use crate::engine::filters::FilterResult;
use crate::engine::state_machine::MachineState;

/// Which confirmation path produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPath {
    MomentumBreakout,
    CvdAggressiveConfirmed,
    CvdSustained,
    PullbackRetest,
}

impl std::fmt::Display for EntryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPath::MomentumBreakout => write!(f, "momentum_breakout"),
            EntryPath::CvdAggressiveConfirmed => write!(f, "cvd_aggressive_confirmed"),
            EntryPath::CvdSustained => write!(f, "cvd_sustained"),
            EntryPath::PullbackRetest => write!(f, "pullback_retest"),
        }
    }
}

/// Why an attempt terminally blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// First full bar offered no momentum, no weak interest, no pullback.
    NoConfirmationPath,
    /// Filters rejected the only available path.
    FiltersRejected,
    /// Weak-breakout tracking ran out of bars without CVD confirmation.
    ConfirmationTimeout,
    /// Pullback tracking ran out of bars without a retest.
    PullbackTimeout,
    /// Price closed back through the pivot adversely.
    AdverseClose,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::NoConfirmationPath => write!(f, "no_confirmation_path"),
            BlockReason::FiltersRejected => write!(f, "filters_rejected"),
            BlockReason::ConfirmationTimeout => write!(f, "confirmation_timeout"),
            BlockReason::PullbackTimeout => write!(f, "pullback_timeout"),
            BlockReason::AdverseClose => write!(f, "adverse_close"),
        }
    }
}

/// The per-bar decision, as a tagged union of kind and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Entered { path: EntryPath },
    Blocked { reason: BlockReason },
    Monitoring { state: MachineState },
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::Entered { .. } | Decision::Blocked { .. })
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, Decision::Entered { .. })
    }
}

/// One logged bar-level decision. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub symbol: String,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub decision: Decision,
    pub reason: String,
    pub filters: Vec<FilterResult>,
    pub state: MachineState,
    pub attempt_number: u32,
}

/// Ordered collection of decisions for a run, with JSON-lines persistence.
#[derive(Debug, Clone, Default)]
pub struct DecisionLog {
    entries: Vec<DecisionLogEntry>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DecisionLogEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: Vec<DecisionLogEntry>) {
        self.entries.extend(entries);
    }

    pub fn entries(&self) -> &[DecisionLogEntry] {
        &self.entries
    }

    pub fn terminal_entries(&self) -> impl Iterator<Item = &DecisionLogEntry> {
        self.entries.iter().filter(|e| e.decision.is_terminal())
    }

    /// Write the full log, truncating any previous run's file.
    pub fn write_json_lines(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create decision log {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_json_lines(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open decision log {:?}", path))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(Self { entries })
    }

    /// Serialized form, used for byte-level determinism checks.
    pub fn to_json_lines(&self) -> anyhow::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}
