//! Per-symbol session engine.
//!
//! Owns everything one symbol needs for one session: gap resolution,
//! close-based crossing detection, the attempt tracker, and the active
//! state machine per side. Live and replay both drive `on_bar`; the engine
//! performs no I/O, so the only blocking point in either mode is "next bar
//! available".

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::data::bars::Bar;
use crate::data::pivots::{PivotSpec, Side};
use crate::engine::attempts::{AttemptConfig, AttemptTracker};
use crate::engine::cvd::imbalance_pct;
use crate::engine::decision_log::DecisionLogEntry;
use crate::engine::filters::FilterConfig;
use crate::engine::state_machine::{
    BarContext, EntryStateMachine, MachineState, StateMachineConfig,
};
use crate::engine::stops::{stop_price, StopConfig};
use crate::validate::classifier::ClassifierConfig;

/// Aggregate immutable configuration for a run. Passed explicitly into each
/// component; two runs with different configs can execute side by side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub filters: FilterConfig,
    pub machine: StateMachineConfig,
    pub attempts: AttemptConfig,
    pub stops: StopConfig,
    pub classifier: ClassifierConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("failed to parse config {:?}", path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapState {
    /// Session opened inside the pivot range.
    Clean,
    /// Gapped through a pivot; collecting opening-range bars.
    PendingSubstitution,
    /// Pivot replaced by the opening range.
    Substituted,
    /// Gapped and substitution disabled; gap filter blocks all entries.
    Blocked,
}

/// Per-session decision counts for the run summary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionCounts {
    pub bars: usize,
    pub attempts: u32,
    pub entered: u32,
    pub blocked: u32,
}

pub struct SessionEngine {
    spec: PivotSpec,
    /// Spec with effective (possibly opening-range substituted) levels.
    effective: PivotSpec,
    config: EngineConfig,
    gap: GapState,
    tracker: AttemptTracker,
    active: HashMap<Side, EntryStateMachine>,
    bars: Vec<Bar>,
    imbalances: Vec<f64>,
    log: Vec<DecisionLogEntry>,
    counts: SessionCounts,
}

impl SessionEngine {
    pub fn new(spec: PivotSpec, config: EngineConfig) -> Result<Self, crate::errors::PipelineError> {
        spec.validate()?;
        let tracker = AttemptTracker::new(config.attempts.clone());
        Ok(Self {
            effective: spec.clone(),
            spec,
            config,
            gap: GapState::Clean,
            tracker,
            active: HashMap::new(),
            bars: Vec::new(),
            imbalances: Vec::new(),
            log: Vec::new(),
            counts: SessionCounts::default(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.spec.symbol
    }

    pub fn log(&self) -> &[DecisionLogEntry] {
        &self.log
    }

    pub fn counts(&self) -> SessionCounts {
        self.counts
    }

    pub fn into_log(self) -> (Vec<DecisionLogEntry>, SessionCounts) {
        (self.log, self.counts)
    }

    /// Process one full bar close. Identical for live and replay.
    pub fn on_bar(&mut self, bar: Bar) {
        self.imbalances.push(imbalance_pct(&bar));
        self.bars.push(bar);
        let idx = self.bars.len() - 1;
        self.counts.bars = self.bars.len();

        if idx == 0 {
            self.resolve_gap();
        }
        self.maybe_substitute_opening_range(idx);

        self.step_machines(idx);

        if idx >= 1 && self.gap != GapState::PendingSubstitution {
            self.detect_crossings(idx);
        }
    }

    /// Did the session open gap through either pivot beyond tolerance?
    fn resolve_gap(&mut self) {
        let open = self.bars[0].open;
        if !session_gapped(&self.spec, open, &self.config.filters) {
            return;
        }
        if self.config.filters.substitute_on_gap {
            debug!(
                "{}: session gapped through pivot (open {:.2}), forming opening range",
                self.spec.symbol, open
            );
            self.gap = GapState::PendingSubstitution;
        } else {
            info!(
                "{}: session gapped through pivot (open {:.2}), entries blocked",
                self.spec.symbol, open
            );
            self.gap = GapState::Blocked;
        }
    }

    fn maybe_substitute_opening_range(&mut self, idx: usize) {
        if self.gap != GapState::PendingSubstitution {
            return;
        }
        if idx + 1 < self.config.filters.opening_range_bars {
            return;
        }
        match effective_pivots(&self.spec, &self.bars, &self.config.filters) {
            Some(substituted) => {
                self.effective = substituted;
                self.gap = GapState::Substituted;
                info!(
                    "{}: opening-range pivot substituted (resistance {:.2}, support {:.2})",
                    self.spec.symbol, self.effective.resistance, self.effective.support
                );
            }
            None => {
                // Completely flat open: nothing usable to substitute.
                self.gap = GapState::Blocked;
            }
        }
    }

    /// Step any active machines. Fixed side order keeps the log
    /// deterministic.
    fn step_machines(&mut self, idx: usize) {
        for side in [Side::Long, Side::Short] {
            let Some(mut machine) = self.active.remove(&side) else {
                continue;
            };
            let entry = {
                let ctx = BarContext {
                    bar_idx: idx,
                    bar: &self.bars[idx],
                    window: &self.bars,
                    imbalances: &self.imbalances,
                    gap_substituted: self.gap == GapState::Substituted,
                    gap_blocked: self.gap == GapState::Blocked,
                };
                machine.on_bar(&ctx)
            };
            if machine.is_terminal() {
                self.tracker.on_resolve(side, idx);
                if entry.decision.is_entry() {
                    self.counts.entered += 1;
                    let stop = stop_price(
                        side,
                        entry.price,
                        self.effective.level_for(side),
                        &self.config.stops,
                    );
                    info!(
                        "{} {} entered at {:.2}, stop {:.2}",
                        self.spec.symbol, side, entry.price, stop
                    );
                } else {
                    self.counts.blocked += 1;
                }
            } else {
                self.active.insert(side, machine);
            }
            self.log.push(entry);
        }
    }

    /// Close-based crossing: current close beyond the level, previous close
    /// not. Every re-crossing after a resolved attempt is a fresh attempt,
    /// subject to the tracker's cap and cooldown.
    fn detect_crossings(&mut self, idx: usize) {
        let prev = self.bars[idx - 1].close;
        let cur = self.bars[idx].close;

        for side in [Side::Long, Side::Short] {
            if self.active.contains_key(&side) {
                continue;
            }
            let level = self.effective.level_for(side);
            let crossed = match side {
                Side::Long => prev <= level && cur > level,
                Side::Short => prev >= level && cur < level,
            };
            if !crossed {
                continue;
            }
            match self.tracker.can_spawn(side, idx) {
                Ok(()) => {
                    let attempt_number = self.tracker.on_spawn(side);
                    self.counts.attempts += 1;
                    let mut machine = EntryStateMachine::new(
                        &self.effective,
                        side,
                        level,
                        attempt_number,
                        idx,
                        self.config.machine.clone(),
                        self.config.filters.clone(),
                    );
                    let entry = machine.arm(&self.bars[idx]);
                    debug!(
                        "{} {} attempt {} born at {:.2} (level {:.2})",
                        self.spec.symbol, side, attempt_number, cur, level
                    );
                    debug_assert_eq!(machine.state(), MachineState::WaitingCandleClose);
                    self.active.insert(side, machine);
                    self.log.push(entry);
                }
                Err(block) => {
                    debug!(
                        "{} {} crossing at {:.2} suppressed: {:?}",
                        self.spec.symbol, side, cur, block
                    );
                }
            }
        }
    }
}

/// Did the session open through either pivot beyond the gap tolerance?
pub fn session_gapped(spec: &PivotSpec, open: f64, filters: &FilterConfig) -> bool {
    let tol = filters.gap_tolerance_pct / 100.0;
    open > spec.resistance * (1.0 + tol) || open < spec.support * (1.0 - tol)
}

/// The pivot levels a gapped session actually trades: the original levels
/// replaced by the opening-range high/low. Returns `None` when no
/// substitution applies (clean open, substitution disabled, too few bars,
/// or a completely flat opening range).
pub fn effective_pivots(spec: &PivotSpec, bars: &[Bar], filters: &FilterConfig) -> Option<PivotSpec> {
    let first = bars.first()?;
    if !filters.substitute_on_gap || !session_gapped(spec, first.open, filters) {
        return None;
    }
    if bars.len() < filters.opening_range_bars {
        return None;
    }
    let range = &bars[..filters.opening_range_bars];
    let or_high = range.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let or_low = range.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    if or_high <= or_low {
        return None;
    }
    let mut substituted = spec.clone();
    substituted.resistance = or_high;
    substituted.support = or_low;
    Some(substituted)
}

/// Drive a full session of bars through a fresh engine.
pub fn run_session(
    spec: PivotSpec,
    bars: &[Bar],
    config: EngineConfig,
) -> Result<(Vec<DecisionLogEntry>, SessionCounts), crate::errors::PipelineError> {
    let mut engine = SessionEngine::new(spec, config)?;
    for bar in bars {
        engine.on_bar(bar.clone());
    }
    Ok(engine.into_log())
}
