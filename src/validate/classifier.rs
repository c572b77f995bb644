//! Outcome classifier: independent hindsight grading of pivot breakouts.
//!
//! Scans session bars for pivot crossings with the same close-based rule the
//! engine uses, then tracks each breakout forward to classify what actually
//! happened. Deliberately knows nothing about the engine's filters or state
//! machine; the validator compares the two afterwards.
//!
//! Grading is checkpoint-based: the distance from the breakout close to the
//! first target is split into quarters, and each first touch of a quarter
//! level is a checkpoint. A bar touching both the stop and a checkpoint
//! counts the stop first, so grades never flatter the breakout. Checkpoint
//! touches are still recorded after a stop breach: a stop that fired before
//! a move that would have reached its checkpoints anyway is flagged as
//! `stopped_out_early` (wrong stop, not wrong direction).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::bars::Bar;
use crate::data::pivots::{PivotSpec, Side};
use crate::engine::stops::{stop_price, StopConfig};

pub const CHECKPOINT_FRACTIONS: [f64; 4] = [0.25, 0.50, 0.75, 1.00];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Maximum favorable excursion (pct of entry) a failed breakout may show
    /// and still grade as a false breakout rather than a stop-out.
    pub false_breakout_max_gain_pct: f64,
    /// Minimum bars of sideways drift before "choppy" applies; fewer bars
    /// without resolution is insufficient data.
    pub choppy_min_bars: usize,
    /// Favorable excursion (pct of entry) that counts as a meaningful move
    /// when no checkpoint was reached.
    pub runner_min_gain_pct: f64,
    /// Favorable excursion (pct of entry) earning one star when no
    /// checkpoint was reached.
    pub one_star_min_gain_pct: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            false_breakout_max_gain_pct: 0.3,
            choppy_min_bars: 15,
            runner_min_gain_pct: 1.0,
            one_star_min_gain_pct: 0.5,
        }
    }
}

/// What a breakout did, in hindsight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reached at least one checkpoint before any stop breach.
    Winner,
    /// Moved meaningfully in the breakout direction without reaching a
    /// checkpoint or the stop.
    Runner,
    /// Hit the stop before any checkpoint, after real favorable excursion.
    StoppedOut,
    /// Reversed through the stop with negligible progress.
    FalseBreakout,
    /// Drifted sideways: no stop, no checkpoint, enough bars to be sure.
    Choppy,
    /// Too few bars after the crossing to grade.
    InsufficientData,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Outcome::Winner => "WINNER",
            Outcome::Runner => "RUNNER",
            Outcome::StoppedOut => "STOPPED_OUT",
            Outcome::FalseBreakout => "FALSE_BREAKOUT",
            Outcome::Choppy => "CHOPPY",
            Outcome::InsufficientData => "INSUFFICIENT_DATA",
        };
        write!(f, "{}", name)
    }
}

impl Outcome {
    /// Would entering this breakout have been favorable?
    pub fn is_favorable(&self) -> bool {
        matches!(self, Outcome::Winner | Outcome::Runner)
    }
}

/// One graded breakout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakout {
    pub symbol: String,
    pub side: Side,
    pub crossing_idx: usize,
    pub timestamp: DateTime<Utc>,
    /// Close of the crossing bar; the price a decision at this crossing
    /// would have worked from.
    pub entry_price: f64,
    pub stop: f64,
    pub outcome: Outcome,
    /// Quarter-distance levels between entry and the first target.
    pub checkpoint_prices: [f64; 4],
    /// Checkpoints first touched before any stop breach.
    pub checkpoints_hit: [bool; 4],
    /// Count of `checkpoints_hit`, the star-rating input.
    pub checkpoints: u8,
    /// 0-5 quality grade derived from checkpoints and excursion.
    pub stars: u8,
    pub hit_stop: bool,
    /// Stop breached first, but a checkpoint was still reached afterwards:
    /// the stop was misplaced, the direction was right.
    pub stopped_out_early: bool,
    /// Best favorable excursion before any stop breach, pct of entry.
    pub max_favorable_pct: f64,
    /// Worst adverse excursion before any stop breach, pct of entry.
    pub max_adverse_pct: f64,
    pub bars_tracked: usize,
}

/// Star grade: a direct function of checkpoints and favorable excursion so
/// reports stay comparable across configs.
pub fn star_rating(checkpoints: u8, max_favorable_pct: f64, cfg: &ClassifierConfig) -> u8 {
    match checkpoints {
        4.. => 5,
        3 => 4,
        2 => 3,
        1 => 2,
        0 if max_favorable_pct >= cfg.one_star_min_gain_pct => 1,
        _ => 0,
    }
}

/// Scan a session for pivot crossings, same close-based rule as the engine,
/// and grade each one. Every re-crossing is its own breakout; the classifier
/// applies no attempt cap.
pub fn identify_breakouts(
    spec: &PivotSpec,
    bars: &[Bar],
    stops: &StopConfig,
    cfg: &ClassifierConfig,
) -> Vec<Breakout> {
    let mut breakouts = Vec::new();
    for idx in 1..bars.len() {
        let prev = bars[idx - 1].close;
        let cur = bars[idx].close;
        for side in [Side::Long, Side::Short] {
            let level = spec.level_for(side);
            let crossed = match side {
                Side::Long => prev <= level && cur > level,
                Side::Short => prev >= level && cur < level,
            };
            if crossed {
                breakouts.push(classify(spec, bars, idx, side, stops, cfg));
            }
        }
    }
    breakouts
}

/// Grade one crossing by walking every remaining session bar.
pub fn classify(
    spec: &PivotSpec,
    bars: &[Bar],
    crossing_idx: usize,
    side: Side,
    stops: &StopConfig,
    cfg: &ClassifierConfig,
) -> Breakout {
    let crossing = &bars[crossing_idx];
    let entry = crossing.close;
    let pivot = spec.level_for(side);
    let stop = stop_price(side, entry, pivot, stops);
    let target = spec.target1;
    let distance = side.sign() * (target - entry);

    let checkpoint_prices = CHECKPOINT_FRACTIONS
        .map(|f| entry + side.sign() * distance.max(0.0) * f);

    let mut breakout = Breakout {
        symbol: spec.symbol.clone(),
        side,
        crossing_idx,
        timestamp: crossing.timestamp,
        entry_price: entry,
        stop,
        outcome: Outcome::InsufficientData,
        checkpoint_prices,
        checkpoints_hit: [false; 4],
        checkpoints: 0,
        stars: 0,
        hit_stop: false,
        stopped_out_early: false,
        max_favorable_pct: 0.0,
        max_adverse_pct: 0.0,
        bars_tracked: 0,
    };

    // A target on the wrong side of entry leaves nothing to measure toward.
    if distance <= 0.0 || crossing_idx + 1 >= bars.len() {
        return breakout;
    }

    let mut hit_before_stop = [false; 4];
    let mut hit_after_stop = false;
    let mut stopped = false;
    let mut max_favorable = 0.0f64;
    let mut max_adverse = 0.0f64;

    for bar in &bars[crossing_idx + 1..] {
        let adverse_extreme = match side {
            Side::Long => bar.low,
            Side::Short => bar.high,
        };
        let favorable_extreme = match side {
            Side::Long => bar.high,
            Side::Short => bar.low,
        };
        let stop_touched = side.sign() * (adverse_extreme - stop) <= 0.0;

        if !stopped {
            breakout.bars_tracked += 1;
            if stop_touched {
                // Stop-first within the bar: this bar's favorable extreme
                // earns no pre-stop credit.
                stopped = true;
                continue;
            }
            for (i, &level) in checkpoint_prices.iter().enumerate() {
                if side.sign() * (favorable_extreme - level) >= 0.0 {
                    hit_before_stop[i] = true;
                }
            }
            max_favorable = max_favorable.max(side.sign() * (favorable_extreme - entry) / entry * 100.0);
            max_adverse = max_adverse.max(-side.sign() * (adverse_extreme - entry) / entry * 100.0);
        } else {
            // Post-stop: only checkpoint touches matter, as evidence the
            // stop fired on a move that was going to work.
            if side.sign() * (favorable_extreme - checkpoint_prices[0]) >= 0.0 {
                hit_after_stop = true;
            }
        }
    }

    let checkpoints = hit_before_stop.iter().filter(|&&h| h).count() as u8;
    breakout.checkpoints_hit = hit_before_stop;
    breakout.checkpoints = checkpoints;
    breakout.hit_stop = stopped;
    breakout.stopped_out_early = stopped && checkpoints == 0 && hit_after_stop;
    breakout.max_favorable_pct = max_favorable;
    breakout.max_adverse_pct = max_adverse;
    breakout.stars = star_rating(checkpoints, max_favorable, cfg);

    breakout.outcome = if checkpoints > 0 {
        Outcome::Winner
    } else if stopped {
        if max_favorable < cfg.false_breakout_max_gain_pct {
            Outcome::FalseBreakout
        } else {
            Outcome::StoppedOut
        }
    } else if max_favorable >= cfg.runner_min_gain_pct {
        Outcome::Runner
    } else if breakout.bars_tracked >= cfg.choppy_min_bars {
        Outcome::Choppy
    } else {
        Outcome::InsufficientData
    };

    breakout
}
