//! Decision-quality grading.
//!
//! Crosses what the engine decided with what the market then did. Every
//! graded breakout lands in exactly one verdict cell:
//!
//!   entered  x favorable        -> GOOD_ENTRY
//!   entered  x stopped early    -> EARLY_EXIT (stop misplaced, not direction)
//!   entered  x unfavorable      -> BAD_ENTRY
//!   blocked  x favorable        -> MISSED_WINNER
//!   blocked  x unfavorable      -> GOOD_BLOCK
//!   no match x favorable        -> CRITICAL_MISS (detection gap on a winner)
//!   no match x unfavorable      -> MISSED_OK
//!
//! Ungradeable outcomes are NEUTRAL regardless of the decision. Each verdict
//! carries an analysis line and a recommended action.

use serde::{Deserialize, Serialize};

use crate::engine::decision_log::{Decision, EntryPath};
use crate::engine::filters::blocking_names;
use crate::validate::classifier::{Breakout, Outcome};
use crate::validate::matcher::LoggedAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    GoodEntry,
    BadEntry,
    EarlyExit,
    GoodBlock,
    MissedWinner,
    CriticalMiss,
    MissedOk,
    Neutral,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Verdict::GoodEntry => "GOOD_ENTRY",
            Verdict::BadEntry => "BAD_ENTRY",
            Verdict::EarlyExit => "EARLY_EXIT",
            Verdict::GoodBlock => "GOOD_BLOCK",
            Verdict::MissedWinner => "MISSED_WINNER",
            Verdict::CriticalMiss => "CRITICAL_MISS",
            Verdict::MissedOk => "MISSED_OK",
            Verdict::Neutral => "NEUTRAL",
        };
        write!(f, "{}", name)
    }
}

pub const ALL_VERDICTS: [Verdict; 8] = [
    Verdict::GoodEntry,
    Verdict::BadEntry,
    Verdict::EarlyExit,
    Verdict::GoodBlock,
    Verdict::MissedWinner,
    Verdict::CriticalMiss,
    Verdict::MissedOk,
    Verdict::Neutral,
];

/// What the engine did at a breakout, reduced for grading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EngineAction {
    Entered { path: EntryPath },
    Blocked { blocking_filters: Vec<String> },
    /// No attempt within tolerance: cap, cooldown, or a blocked session.
    NotEngaged,
}

/// One graded breakout with its verdict and a human-readable rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionGrade {
    pub symbol: String,
    pub side: crate::data::pivots::Side,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub verdict: Verdict,
    pub outcome: Outcome,
    pub stars: u8,
    pub action: EngineAction,
    pub analysis: String,
    pub recommendation: String,
}

fn verdict_for(breakout: &Breakout, action: &EngineAction) -> Verdict {
    if breakout.outcome == Outcome::InsufficientData {
        return Verdict::Neutral;
    }
    match action {
        EngineAction::Entered { .. } => {
            if breakout.outcome.is_favorable() {
                Verdict::GoodEntry
            } else if breakout.stopped_out_early {
                Verdict::EarlyExit
            } else if breakout.outcome == Outcome::Choppy {
                Verdict::Neutral
            } else {
                Verdict::BadEntry
            }
        }
        EngineAction::Blocked { .. } => {
            if breakout.outcome.is_favorable() {
                Verdict::MissedWinner
            } else {
                Verdict::GoodBlock
            }
        }
        EngineAction::NotEngaged => {
            if breakout.outcome.is_favorable() {
                Verdict::CriticalMiss
            } else {
                Verdict::MissedOk
            }
        }
    }
}

fn analysis_for(breakout: &Breakout, action: &EngineAction, verdict: Verdict) -> String {
    match verdict {
        Verdict::GoodEntry => format!(
            "entered a {}-star {} ({} checkpoints reached)",
            breakout.stars, breakout.outcome, breakout.checkpoints
        ),
        Verdict::BadEntry => format!(
            "entered a {} that gained only {:.2}% before failing",
            breakout.outcome, breakout.max_favorable_pct
        ),
        Verdict::EarlyExit => format!(
            "direction was right but the stop at {:.2} fired before the move completed",
            breakout.stop
        ),
        Verdict::GoodBlock => format!(
            "correctly avoided a {} ({:.2}% best excursion)",
            breakout.outcome, breakout.max_favorable_pct
        ),
        Verdict::MissedWinner => {
            let cause = match action {
                EngineAction::Blocked { blocking_filters } if !blocking_filters.is_empty() => {
                    format!("blocked by {}", blocking_filters.join(", "))
                }
                _ => "blocked without a filter rejection".to_string(),
            };
            format!(
                "{} on a {}-star {} reaching {:.2}%",
                cause, breakout.stars, breakout.outcome, breakout.max_favorable_pct
            )
        }
        Verdict::CriticalMiss => format!(
            "no attempt within tolerance of a {}-star {} reaching {:.2}%",
            breakout.stars, breakout.outcome, breakout.max_favorable_pct
        ),
        Verdict::MissedOk => format!(
            "never engaged a {} that went nowhere, no harm done",
            breakout.outcome
        ),
        Verdict::Neutral => "outcome not gradeable for this decision".to_string(),
    }
}

fn recommendation_for(verdict: Verdict) -> String {
    match verdict {
        Verdict::GoodEntry | Verdict::GoodBlock | Verdict::MissedOk => "no change".to_string(),
        Verdict::BadEntry => "review which filters passed on the entry bar".to_string(),
        Verdict::EarlyExit => "review stop buffer; direction calls are sound".to_string(),
        Verdict::MissedWinner => "review the blocking filters' thresholds".to_string(),
        Verdict::CriticalMiss => {
            "investigate detection: crossing never became an attempt".to_string()
        }
        Verdict::Neutral => "no action".to_string(),
    }
}

/// Grade every breakout against its matched attempt (parallel `matches`
/// slice from the matcher).
pub fn grade_decisions(
    breakouts: &[Breakout],
    attempts: &[LoggedAttempt],
    matches: &[Option<usize>],
) -> Vec<DecisionGrade> {
    breakouts
        .iter()
        .zip(matches)
        .map(|(breakout, matched)| {
            let action = match matched.map(|i| &attempts[i]) {
                Some(attempt) => {
                    // Matcher guarantees matched attempts are terminal.
                    let terminal = attempt.terminal.unwrap_or(attempt.entries[0]);
                    match &terminal.decision {
                        Decision::Entered { path } => EngineAction::Entered { path: *path },
                        Decision::Blocked { .. } => EngineAction::Blocked {
                            blocking_filters: blocking_names(&terminal.filters),
                        },
                        Decision::Monitoring { .. } => EngineAction::NotEngaged,
                    }
                }
                None => EngineAction::NotEngaged,
            };
            let verdict = verdict_for(breakout, &action);
            DecisionGrade {
                symbol: breakout.symbol.clone(),
                side: breakout.side,
                timestamp: breakout.timestamp,
                verdict,
                outcome: breakout.outcome,
                stars: breakout.stars,
                analysis: analysis_for(breakout, &action, verdict),
                recommendation: recommendation_for(verdict),
                action,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::pivots::Side;

    fn breakout(outcome: Outcome, checkpoints: u8, stars: u8) -> Breakout {
        Breakout {
            symbol: "TEST".to_string(),
            side: Side::Long,
            crossing_idx: 5,
            timestamp: chrono::Utc::now(),
            entry_price: 100.0,
            stop: 99.5,
            outcome,
            checkpoint_prices: [102.5, 105.0, 107.5, 110.0],
            checkpoints_hit: [false; 4],
            checkpoints,
            stars,
            hit_stop: matches!(outcome, Outcome::StoppedOut | Outcome::FalseBreakout),
            stopped_out_early: false,
            max_favorable_pct: checkpoints as f64 * 0.75,
            max_adverse_pct: 0.2,
            bars_tracked: 20,
        }
    }

    fn entered() -> EngineAction {
        EngineAction::Entered {
            path: EntryPath::MomentumBreakout,
        }
    }

    fn blocked() -> EngineAction {
        EngineAction::Blocked {
            blocking_filters: vec!["volume_surge".to_string()],
        }
    }

    #[test]
    fn test_entered_verdicts() {
        assert_eq!(
            verdict_for(&breakout(Outcome::Winner, 3, 4), &entered()),
            Verdict::GoodEntry
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::Runner, 0, 1), &entered()),
            Verdict::GoodEntry
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::FalseBreakout, 0, 0), &entered()),
            Verdict::BadEntry
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::StoppedOut, 0, 1), &entered()),
            Verdict::BadEntry
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::Choppy, 0, 0), &entered()),
            Verdict::Neutral
        );
    }

    #[test]
    fn test_early_stop_on_entry_is_early_exit() {
        let mut b = breakout(Outcome::StoppedOut, 0, 1);
        b.stopped_out_early = true;
        assert_eq!(verdict_for(&b, &entered()), Verdict::EarlyExit);
        // The same breakout blocked is still a good block.
        assert_eq!(verdict_for(&b, &blocked()), Verdict::GoodBlock);
    }

    #[test]
    fn test_blocked_verdicts() {
        assert_eq!(
            verdict_for(&breakout(Outcome::FalseBreakout, 0, 0), &blocked()),
            Verdict::GoodBlock
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::Choppy, 0, 0), &blocked()),
            Verdict::GoodBlock
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::Winner, 2, 3), &blocked()),
            Verdict::MissedWinner
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::Runner, 0, 1), &blocked()),
            Verdict::MissedWinner
        );
    }

    #[test]
    fn test_unmatched_winner_is_critical_miss() {
        assert_eq!(
            verdict_for(&breakout(Outcome::Winner, 2, 3), &EngineAction::NotEngaged),
            Verdict::CriticalMiss
        );
        assert_eq!(
            verdict_for(&breakout(Outcome::Runner, 0, 1), &EngineAction::NotEngaged),
            Verdict::CriticalMiss
        );
        assert_eq!(
            verdict_for(
                &breakout(Outcome::FalseBreakout, 0, 0),
                &EngineAction::NotEngaged
            ),
            Verdict::MissedOk
        );
    }

    #[test]
    fn test_insufficient_data_is_always_neutral() {
        for action in [entered(), blocked(), EngineAction::NotEngaged] {
            assert_eq!(
                verdict_for(&breakout(Outcome::InsufficientData, 0, 0), &action),
                Verdict::Neutral
            );
        }
    }

    #[test]
    fn test_analysis_names_blocking_filters() {
        let b = breakout(Outcome::Winner, 2, 3);
        let text = analysis_for(&b, &blocked(), Verdict::MissedWinner);
        assert!(text.contains("volume_surge"));
    }
}
