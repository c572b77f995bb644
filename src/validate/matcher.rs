//! Aligns classifier breakouts with logged engine attempts.
//!
//! Matching is by (symbol, side) and spawn timestamp, tolerant to one bar
//! interval of skew. Breakouts the engine never engaged (attempt cap,
//! cooldown, or a gapped session) legitimately stay unmatched; a terminal
//! logged attempt with no breakout near it is a timestamp alignment failure
//! and surfaces as a critical finding.

use chrono::{DateTime, Utc};

use crate::data::pivots::Side;
use crate::engine::decision_log::DecisionLogEntry;
use crate::errors::PipelineError;
use crate::validate::classifier::Breakout;

/// One engine attempt reassembled from its log entries.
#[derive(Debug, Clone)]
pub struct LoggedAttempt<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub attempt_number: u32,
    /// Timestamp of the spawn entry, i.e. the crossing bar.
    pub spawned_at: DateTime<Utc>,
    pub entries: Vec<&'a DecisionLogEntry>,
    /// The terminal decision, when the attempt resolved before session end.
    pub terminal: Option<&'a DecisionLogEntry>,
}

/// Group a run's log into attempts. Entries arrive in log order, so the
/// first entry of each (symbol, side, attempt_number) group is the spawn.
pub fn collect_attempts(log: &[DecisionLogEntry]) -> Vec<LoggedAttempt<'_>> {
    let mut attempts: Vec<LoggedAttempt> = Vec::new();
    for entry in log {
        let existing = attempts.iter_mut().find(|a| {
            a.symbol == entry.symbol
                && a.side == entry.side
                && a.attempt_number == entry.attempt_number
        });
        match existing {
            Some(attempt) => {
                if entry.decision.is_terminal() {
                    attempt.terminal = Some(entry);
                }
                attempt.entries.push(entry);
            }
            None => attempts.push(LoggedAttempt {
                symbol: &entry.symbol,
                side: entry.side,
                attempt_number: entry.attempt_number,
                spawned_at: entry.timestamp,
                entries: vec![entry],
                terminal: entry.decision.is_terminal().then_some(entry),
            }),
        }
    }
    attempts
}

/// For each breakout, the index of its matched attempt (if any), parallel to
/// the breakout slice. Each attempt matches at most one breakout; ties go to
/// the nearest spawn timestamp.
pub fn match_breakouts(
    breakouts: &[Breakout],
    attempts: &[LoggedAttempt],
    tolerance_secs: i64,
) -> Vec<Option<usize>> {
    let mut taken = vec![false; attempts.len()];
    breakouts
        .iter()
        .map(|breakout| {
            let best = attempts
                .iter()
                .enumerate()
                .filter(|(i, a)| {
                    !taken[*i]
                        && a.terminal.is_some()
                        && a.symbol == breakout.symbol
                        && a.side == breakout.side
                })
                .map(|(i, a)| {
                    let delta = (a.spawned_at - breakout.timestamp).num_seconds().abs();
                    (i, delta)
                })
                .filter(|(_, delta)| *delta <= tolerance_secs)
                .min_by_key(|(_, delta)| *delta);
            best.map(|(i, _)| {
                taken[i] = true;
                i
            })
        })
        .collect()
}

/// Terminal attempts left unmatched after breakout alignment. Each is a
/// timestamp alignment failure: the engine decided at a crossing the
/// classifier cannot find.
pub fn unmatched_terminal_attempts(
    attempts: &[LoggedAttempt],
    matches: &[Option<usize>],
) -> Vec<PipelineError> {
    let matched: std::collections::HashSet<usize> = matches.iter().flatten().copied().collect();
    attempts
        .iter()
        .enumerate()
        .filter(|(i, a)| a.terminal.is_some() && !matched.contains(i))
        .map(|(_, a)| PipelineError::TimestampMatch {
            symbol: a.symbol.to_string(),
            timestamp: a.spawned_at,
        })
        .collect()
}
