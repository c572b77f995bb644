//! Entry decision state machine.
//!
//! One instance per pivot attempt. Born on the crossing bar, it acts only on
//! subsequent full bars to avoid intrabar noise, consults the filter
//! pipeline, and resolves through one of four entry paths or a terminal
//! block:
//! 1. WAITING_CANDLE_CLOSE - first full bar after the crossing decides the path
//! 2. MOMENTUM - strong volume with room to run enters immediately
//! 3. WEAK_BREAKOUT / CVD_MONITORING / SUSTAINED - weak volume waits for
//!    order-flow confirmation (aggressive or sustained imbalance)
//! 4. PULLBACK - a retreat toward the pivot waits for a retest with renewed
//!    volume
//!
//! Every processed bar appends exactly one decision log entry. All timeouts
//! are bar-count based so live and replay time out identically.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::bars::Bar;
use crate::data::pivots::{PivotSpec, Side};
use crate::engine::cvd::directional_magnitude;
use crate::engine::decision_log::{BlockReason, Decision, DecisionLogEntry, EntryPath};
use crate::engine::filters::{
    all_pass, cvd_confirmation, run_pipeline, sustained_streak, trailing_volume_avg,
    ConfirmationPath, CvdPath, FilterConfig, FilterContext, FilterResult,
};

/// Attempt lifecycle state. Owned exclusively by one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Init,
    WaitingCandleClose,
    MomentumDetected,
    WeakBreakoutTracking,
    PullbackTracking,
    CvdMonitoring,
    SustainedTracking,
    Entered,
    Blocked,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MachineState::Init => "INIT",
            MachineState::WaitingCandleClose => "WAITING_CANDLE_CLOSE",
            MachineState::MomentumDetected => "MOMENTUM_DETECTED",
            MachineState::WeakBreakoutTracking => "WEAK_BREAKOUT_TRACKING",
            MachineState::PullbackTracking => "PULLBACK_TRACKING",
            MachineState::CvdMonitoring => "CVD_MONITORING",
            MachineState::SustainedTracking => "SUSTAINED_TRACKING",
            MachineState::Entered => "ENTERED",
            MachineState::Blocked => "BLOCKED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineConfig {
    /// Bars of weak-breakout tracking before giving up on CVD confirmation.
    pub confirmation_timeout_bars: usize,
    /// Bars of pullback tracking before giving up on a retest.
    pub pullback_timeout_bars: usize,
    /// First full bar within this percentage of the pivot counts as
    /// "already retreated" and routes to pullback tracking.
    pub pullback_proximity_pct: f64,
    /// Touch zone around the pivot that counts as a retest.
    pub retest_tolerance_pct: f64,
    /// How far through the pivot a close may sit during pullback tracking
    /// before the thesis is invalidated.
    pub adverse_tolerance_pct: f64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_bars: 8,
            pullback_timeout_bars: 10,
            pullback_proximity_pct: 0.3,
            retest_tolerance_pct: 0.15,
            adverse_tolerance_pct: 0.2,
        }
    }
}

/// Read-only view of the session handed to the machine each bar.
pub struct BarContext<'a> {
    pub bar_idx: usize,
    pub bar: &'a Bar,
    /// Session bars up to and including the current one.
    pub window: &'a [Bar],
    /// Per-bar imbalance percentages, aligned with `window`.
    pub imbalances: &'a [f64],
    pub gap_substituted: bool,
    pub gap_blocked: bool,
}

/// One pivot attempt's decision machine.
pub struct EntryStateMachine {
    pub id: Uuid,
    spec: PivotSpec,
    side: Side,
    /// Effective crossing level (opening-range substituted when gapped).
    pivot: f64,
    attempt_number: u32,
    state: MachineState,
    crossing_bar_idx: usize,
    tracking_since: Option<usize>,
    touched_retest: bool,
    /// CVD confirmed at least once but a filter rejected that bar.
    saw_confirmation: bool,
    config: StateMachineConfig,
    filter_config: FilterConfig,
}

impl EntryStateMachine {
    pub fn new(
        spec: &PivotSpec,
        side: Side,
        pivot: f64,
        attempt_number: u32,
        crossing_bar_idx: usize,
        config: StateMachineConfig,
        filter_config: FilterConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec: spec.clone(),
            side,
            pivot,
            attempt_number,
            state: MachineState::Init,
            crossing_bar_idx,
            tracking_since: None,
            touched_retest: false,
            saw_confirmation: false,
            config,
            filter_config,
        }
    }

    /// Arm the freshly constructed machine on its crossing bar. Returns the
    /// spawn log entry; the machine then acts on the next full bar.
    pub fn arm(&mut self, crossing_bar: &Bar) -> DecisionLogEntry {
        debug_assert_eq!(self.state, MachineState::Init);
        self.state = MachineState::WaitingCandleClose;
        self.entry(
            crossing_bar,
            Decision::Monitoring {
                state: MachineState::WaitingCandleClose,
            },
            format!(
                "close crossed {:.2}, waiting for next candle close",
                self.pivot
            ),
            vec![],
        )
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, MachineState::Entered | MachineState::Blocked)
    }

    /// Process one full bar. Appends exactly one decision per call.
    pub fn on_bar(&mut self, ctx: &BarContext) -> DecisionLogEntry {
        match self.state {
            MachineState::WaitingCandleClose => self.process_first_bar(ctx),
            MachineState::WeakBreakoutTracking
            | MachineState::CvdMonitoring
            | MachineState::SustainedTracking => self.process_cvd_tracking(ctx),
            MachineState::PullbackTracking => self.process_pullback(ctx),
            MachineState::Init
            | MachineState::MomentumDetected
            | MachineState::Entered
            | MachineState::Blocked => {
                unreachable!("on_bar called in state {}", self.state)
            }
        }
    }

    /// First full bar after the crossing picks the confirmation path.
    fn process_first_bar(&mut self, ctx: &BarContext) -> DecisionLogEntry {
        let bar = ctx.bar;

        if self.adverse_close(bar.close, 0.0) {
            return self.block(ctx, BlockReason::AdverseClose, "closed back through pivot before confirmation".to_string(), vec![]);
        }

        // Momentum path: strong volume with every enabled filter passing.
        let results = run_pipeline(&self.filter_ctx(ctx, ConfirmationPath::Momentum), &self.filter_config);
        if all_pass(&results) {
            self.state = MachineState::MomentumDetected;
            return self.enter(
                ctx,
                EntryPath::MomentumBreakout,
                "strong volume breakout, all filters passed".to_string(),
                results,
            );
        }

        let vol_ratio = trailing_volume_avg(ctx.window, self.filter_config.volume_lookback)
            .filter(|&avg| avg > 0.0)
            .map(|avg| bar.volume as f64 / avg);

        // Weak-but-nonzero interest: hold the attempt open for order flow.
        if let Some(ratio) = vol_ratio {
            if ratio >= self.filter_config.weak_volume_mult {
                self.state = MachineState::WeakBreakoutTracking;
                self.tracking_since = Some(ctx.bar_idx);
                return self.entry(
                    bar,
                    Decision::Monitoring {
                        state: MachineState::WeakBreakoutTracking,
                    },
                    format!("weak volume ({:.2}x), tracking CVD confirmation", ratio),
                    results,
                );
            }
        }

        // Price already retreated toward the pivot: wait for the retest.
        let excursion_pct = self.side.sign() * (bar.close - self.pivot) / self.pivot * 100.0;
        if excursion_pct <= self.config.pullback_proximity_pct {
            self.state = MachineState::PullbackTracking;
            self.tracking_since = Some(ctx.bar_idx);
            return self.entry(
                bar,
                Decision::Monitoring {
                    state: MachineState::PullbackTracking,
                },
                format!(
                    "price retreated to {:.2}% beyond pivot, tracking retest",
                    excursion_pct
                ),
                results,
            );
        }

        self.block(
            ctx,
            BlockReason::NoConfirmationPath,
            "no momentum, no weak interest, no pullback setup".to_string(),
            results,
        )
    }

    /// Weak-breakout family: wait for aggressive or sustained CVD
    /// confirmation, bounded by a bar-count timeout.
    fn process_cvd_tracking(&mut self, ctx: &BarContext) -> DecisionLogEntry {
        let bar = ctx.bar;

        if self.adverse_close(bar.close, 0.0) {
            return self.block(ctx, BlockReason::AdverseClose, "closed back through pivot during tracking".to_string(), vec![]);
        }

        let elapsed = ctx.bar_idx - self.tracking_since.unwrap_or(self.crossing_bar_idx);
        if elapsed > self.config.confirmation_timeout_bars {
            let (reason, detail) = if self.saw_confirmation {
                (
                    BlockReason::FiltersRejected,
                    format!(
                        "CVD confirmed but filters rejected every bar within {} bars",
                        self.config.confirmation_timeout_bars
                    ),
                )
            } else {
                (
                    BlockReason::ConfirmationTimeout,
                    format!("no CVD confirmation within {} bars", self.config.confirmation_timeout_bars),
                )
            };
            return self.block(ctx, reason, detail, vec![]);
        }

        let confirmation = cvd_confirmation(ctx.imbalances, self.side, &self.filter_config);
        let results = run_pipeline(&self.filter_ctx(ctx, ConfirmationPath::Cvd), &self.filter_config);

        if let Some(path) = confirmation {
            if all_pass(&results) {
                let (entry_path, reason) = match path {
                    CvdPath::Aggressive => (
                        EntryPath::CvdAggressiveConfirmed,
                        "aggressive imbalance trigger confirmed".to_string(),
                    ),
                    CvdPath::Sustained => (
                        EntryPath::CvdSustained,
                        format!(
                            "imbalance sustained for {} bars",
                            self.filter_config.cvd_sustained_bars
                        ),
                    ),
                };
                return self.enter(ctx, entry_path, reason, results);
            }
            // Confirmation seen but another filter rejected this bar; keep
            // tracking until timeout.
            self.saw_confirmation = true;
            self.update_cvd_bookkeeping(ctx);
            return self.entry(
                bar,
                Decision::Monitoring { state: self.state },
                "CVD confirmed but filters rejected this bar".to_string(),
                results,
            );
        }

        self.update_cvd_bookkeeping(ctx);
        let reason = match self.state {
            MachineState::CvdMonitoring => {
                "aggressive imbalance trigger, awaiting confirmation bar".to_string()
            }
            MachineState::SustainedTracking => format!(
                "imbalance streak {} of {} bars",
                sustained_streak(ctx.imbalances, self.side, &self.filter_config),
                self.filter_config.cvd_sustained_bars
            ),
            _ => "no order-flow confirmation yet".to_string(),
        };
        self.entry(bar, Decision::Monitoring { state: self.state }, reason, results)
    }

    /// Track which CVD sub-path is forming, for observable machine state.
    fn update_cvd_bookkeeping(&mut self, ctx: &BarContext) {
        let last = ctx.imbalances.last().copied().unwrap_or(0.0);
        let magnitude = directional_magnitude(self.side, last);
        self.state = if magnitude >= self.filter_config.cvd_aggressive_pct {
            MachineState::CvdMonitoring
        } else if sustained_streak(ctx.imbalances, self.side, &self.filter_config) > 0 {
            MachineState::SustainedTracking
        } else {
            MachineState::WeakBreakoutTracking
        };
    }

    /// Pullback path: wait for a touch of the pivot zone followed by a close
    /// back in the breakout direction with renewed volume.
    fn process_pullback(&mut self, ctx: &BarContext) -> DecisionLogEntry {
        let bar = ctx.bar;

        if self.adverse_close(bar.close, self.config.adverse_tolerance_pct) {
            return self.block(ctx, BlockReason::AdverseClose, "closed through pivot beyond tolerance during pullback".to_string(), vec![]);
        }

        let elapsed = ctx.bar_idx - self.tracking_since.unwrap_or(self.crossing_bar_idx);
        if elapsed > self.config.pullback_timeout_bars {
            return self.block(
                ctx,
                BlockReason::PullbackTimeout,
                format!("no retest within {} bars", self.config.pullback_timeout_bars),
                vec![],
            );
        }

        let tol = self.config.retest_tolerance_pct / 100.0;
        let touched = match self.side {
            Side::Long => bar.low <= self.pivot * (1.0 + tol),
            Side::Short => bar.high >= self.pivot * (1.0 - tol),
        };
        if touched {
            self.touched_retest = true;
        }

        let closed_favorably = self.side.sign() * (bar.close - self.pivot) > 0.0;
        if self.touched_retest && closed_favorably {
            let results = run_pipeline(
                &self.filter_ctx(ctx, ConfirmationPath::PullbackRetest),
                &self.filter_config,
            );
            if all_pass(&results) {
                return self.enter(
                    ctx,
                    EntryPath::PullbackRetest,
                    "pivot retest held with renewed volume".to_string(),
                    results,
                );
            }
            return self.entry(
                bar,
                Decision::Monitoring {
                    state: MachineState::PullbackTracking,
                },
                "retest close without filter confirmation".to_string(),
                results,
            );
        }

        self.entry(
            bar,
            Decision::Monitoring {
                state: MachineState::PullbackTracking,
            },
            if self.touched_retest {
                "retest touched, awaiting favorable close".to_string()
            } else {
                "awaiting pullback retest".to_string()
            },
            vec![],
        )
    }

    /// Close on the wrong side of the pivot by more than the tolerance.
    fn adverse_close(&self, close: f64, tolerance_pct: f64) -> bool {
        let tol = tolerance_pct / 100.0;
        match self.side {
            Side::Long => close < self.pivot * (1.0 - tol),
            Side::Short => close > self.pivot * (1.0 + tol),
        }
    }

    fn filter_ctx<'a>(&'a self, ctx: &'a BarContext<'a>, path: ConfirmationPath) -> FilterContext<'a> {
        FilterContext {
            bar: ctx.bar,
            window: ctx.window,
            spec: &self.spec,
            side: self.side,
            imbalances: ctx.imbalances,
            path,
            gap_substituted: ctx.gap_substituted,
            gap_blocked: ctx.gap_blocked,
        }
    }

    fn enter(
        &mut self,
        ctx: &BarContext,
        path: EntryPath,
        reason: String,
        filters: Vec<FilterResult>,
    ) -> DecisionLogEntry {
        self.state = MachineState::Entered;
        tracing::info!(
            "{} {} attempt {} ENTERED via {} at {:.2}",
            self.spec.symbol,
            self.side,
            self.attempt_number,
            path,
            ctx.bar.close
        );
        self.entry(ctx.bar, Decision::Entered { path }, reason, filters)
    }

    fn block(
        &mut self,
        ctx: &BarContext,
        block_reason: BlockReason,
        reason: String,
        filters: Vec<FilterResult>,
    ) -> DecisionLogEntry {
        self.state = MachineState::Blocked;
        tracing::debug!(
            "{} {} attempt {} blocked: {}",
            self.spec.symbol,
            self.side,
            self.attempt_number,
            block_reason
        );
        self.entry(
            ctx.bar,
            Decision::Blocked {
                reason: block_reason,
            },
            reason,
            filters,
        )
    }

    fn entry(
        &self,
        bar: &Bar,
        decision: Decision,
        reason: String,
        filters: Vec<FilterResult>,
    ) -> DecisionLogEntry {
        DecisionLogEntry {
            symbol: self.spec.symbol.clone(),
            side: self.side,
            timestamp: bar.timestamp,
            price: bar.close,
            decision,
            reason,
            filters,
            state: self.state,
            attempt_number: self.attempt_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bars::test_support::bar_at;
    use crate::engine::cvd::imbalance_pct;

    fn spec() -> PivotSpec {
        PivotSpec {
            symbol: "TEST".to_string(),
            resistance: 100.0,
            support: 98.0,
            target1: 103.0,
            target2: 105.0,
            target3: 107.0,
        }
    }

    /// Green baseline bars below the pivot: volume 1000, ~1% range.
    fn baseline(n: i64) -> Vec<Bar> {
        (0..n)
            .map(|i| bar_at(i, 99.2, 99.9, 99.1, 99.7, 1000))
            .collect()
    }

    struct Harness {
        machine: EntryStateMachine,
        window: Vec<Bar>,
        imbalances: Vec<f64>,
    }

    impl Harness {
        /// Crossing bar closes above resistance at minute `n`.
        fn new(side: Side) -> Self {
            let spec = spec();
            let mut window = baseline(20);
            let crossing = bar_at(20, 99.7, 100.4, 99.6, 100.2, 1200);
            window.push(crossing.clone());
            let imbalances: Vec<f64> = window.iter().map(imbalance_pct).collect();
            let crossing_idx = window.len() - 1;
            let mut machine = EntryStateMachine::new(
                &spec,
                side,
                100.0,
                1,
                crossing_idx,
                StateMachineConfig::default(),
                FilterConfig::default(),
            );
            let armed = machine.arm(&crossing);
            assert!(!armed.decision.is_terminal());
            Self {
                machine,
                window,
                imbalances,
            }
        }

        fn step(&mut self, bar: Bar) -> DecisionLogEntry {
            self.window.push(bar);
            self.imbalances.push(imbalance_pct(self.window.last().unwrap()));
            let ctx = BarContext {
                bar_idx: self.window.len() - 1,
                bar: self.window.last().unwrap(),
                window: &self.window,
                imbalances: &self.imbalances,
                gap_substituted: false,
                gap_blocked: false,
            };
            self.machine.on_bar(&ctx)
        }
    }

    #[test]
    fn test_momentum_breakout_enters_on_first_full_bar() {
        let mut h = Harness::new(Side::Long);
        // Strong green bar, 2x trailing volume, closing near its high.
        let entry = h.step(bar_at(21, 100.2, 101.2, 100.1, 101.1, 2200));
        assert_eq!(
            entry.decision,
            Decision::Entered {
                path: EntryPath::MomentumBreakout
            }
        );
        assert_eq!(entry.state, MachineState::Entered);
        assert!(h.machine.is_terminal());
    }

    #[test]
    fn test_weak_volume_routes_to_tracking() {
        let mut h = Harness::new(Side::Long);
        // 0.9x volume: not momentum, but not dead either.
        let entry = h.step(bar_at(21, 100.2, 100.9, 100.1, 100.8, 930));
        assert_eq!(
            entry.decision,
            Decision::Monitoring {
                state: MachineState::WeakBreakoutTracking
            }
        );
        assert_eq!(h.machine.state(), MachineState::WeakBreakoutTracking);
    }

    /// Weak first bar with a mid-range close: proxy imbalance ~0, so it
    /// neither triggers nor breaks any CVD path on its own.
    fn weak_neutral_bar() -> Bar {
        bar_at(21, 100.2, 101.1, 100.1, 100.6, 930)
    }

    #[test]
    fn test_cvd_aggressive_path_enters_after_confirm_bar() {
        let mut h = Harness::new(Side::Long);
        h.step(weak_neutral_bar());
        // Trigger bar closes at its high: proxy imbalance -100 (heavy buying).
        let trigger = h.step(bar_at(22, 100.8, 101.2, 100.8, 101.2, 950));
        assert_eq!(
            trigger.decision,
            Decision::Monitoring {
                state: MachineState::CvdMonitoring
            }
        );
        // Confirm bar keeps buying pressure above the lower threshold.
        let confirm = h.step(bar_at(23, 101.2, 101.6, 101.1, 101.5, 940));
        assert_eq!(
            confirm.decision,
            Decision::Entered {
                path: EntryPath::CvdAggressiveConfirmed
            }
        );
    }

    #[test]
    fn test_cvd_sustained_path_enters_after_streak() {
        let mut h = Harness::new(Side::Long);
        h.step(weak_neutral_bar());
        // Moderate buying: close at 62.5% of range -> imbalance -25,
        // above the sustained threshold but below the aggressive trigger.
        let moderate = |m| bar_at(m, 100.4, 101.0, 100.0, 100.625, 950);
        let first = h.step(moderate(22));
        assert_eq!(
            first.decision,
            Decision::Monitoring {
                state: MachineState::SustainedTracking
            }
        );
        h.step(moderate(23));
        let third = h.step(moderate(24));
        assert_eq!(
            third.decision,
            Decision::Entered {
                path: EntryPath::CvdSustained
            }
        );
    }

    #[test]
    fn test_weak_tracking_times_out() {
        let mut h = Harness::new(Side::Long);
        h.step(weak_neutral_bar());
        // Neutral bars: close mid-range, no confirmation either way.
        let mut last = None;
        for m in 22..40 {
            let entry = h.step(bar_at(m, 100.7, 101.0, 100.4, 100.7, 900));
            let terminal = entry.decision.is_terminal();
            last = Some(entry);
            if terminal {
                break;
            }
        }
        let last = last.unwrap();
        assert_eq!(
            last.decision,
            Decision::Blocked {
                reason: BlockReason::ConfirmationTimeout
            }
        );
    }

    #[test]
    fn test_confirmed_but_filtered_blocks_as_filters_rejected() {
        let mut h = Harness::new(Side::Long);
        h.step(weak_neutral_bar());
        // Every bar closes at its high (heavy buying, aggressive trigger and
        // confirm) but too close to target1 (103) for room_to_run to pass.
        let mut last = None;
        for m in 22..40 {
            let entry = h.step(bar_at(m, 102.5, 102.8, 102.4, 102.8, 900));
            let terminal = entry.decision.is_terminal();
            last = Some(entry);
            if terminal {
                break;
            }
        }
        assert_eq!(
            last.unwrap().decision,
            Decision::Blocked {
                reason: BlockReason::FiltersRejected
            }
        );
    }

    #[test]
    fn test_adverse_close_blocks_immediately() {
        let mut h = Harness::new(Side::Long);
        h.step(weak_neutral_bar());
        let entry = h.step(bar_at(22, 100.8, 100.9, 99.4, 99.6, 1100));
        assert_eq!(
            entry.decision,
            Decision::Blocked {
                reason: BlockReason::AdverseClose
            }
        );
    }

    #[test]
    fn test_pullback_retest_enters_with_renewed_volume() {
        let mut h = Harness::new(Side::Long);
        // First full bar retreats to just above the pivot on low volume.
        let entry = h.step(bar_at(21, 100.2, 100.3, 100.0, 100.1, 500));
        assert_eq!(
            entry.decision,
            Decision::Monitoring {
                state: MachineState::PullbackTracking
            }
        );
        // Retest bar: dips to the pivot, closes back above with 2.5x volume.
        let retest = h.step(bar_at(22, 100.1, 100.8, 99.95, 100.7, 2450));
        assert_eq!(
            retest.decision,
            Decision::Entered {
                path: EntryPath::PullbackRetest
            }
        );
    }

    #[test]
    fn test_pullback_times_out_without_retest() {
        let mut h = Harness::new(Side::Long);
        h.step(bar_at(21, 100.2, 100.3, 100.0, 100.1, 500));
        let mut last = None;
        for m in 22..40 {
            // Hovers above the retest zone on low volume.
            let entry = h.step(bar_at(m, 100.25, 100.35, 100.2, 100.3, 400));
            let terminal = entry.decision.is_terminal();
            last = Some(entry);
            if terminal {
                break;
            }
        }
        assert_eq!(
            last.unwrap().decision,
            Decision::Blocked {
                reason: BlockReason::PullbackTimeout
            }
        );
    }

    #[test]
    fn test_dead_first_bar_blocks_with_no_path() {
        let mut h = Harness::new(Side::Long);
        // Far from the pivot, volume collapsed: nothing to track.
        let entry = h.step(bar_at(21, 100.2, 101.3, 100.2, 101.2, 300));
        assert_eq!(
            entry.decision,
            Decision::Blocked {
                reason: BlockReason::NoConfirmationPath
            }
        );
    }
}
