//! Entry filter pipeline.
//!
//! Nine independent pass/block predicates evaluated in a fixed priority
//! order for reporting: gap -> time-window -> index-symbol -> choppy ->
//! room-to-run -> volume-surge -> directional-volume -> stochastic ->
//! cvd-imbalance -> cvd-price-alignment. Each filter is a pure function of
//! the bar, its trailing window, the pivot spec, and the config; the
//! pass/block outcome is order-independent. A bar is entry-eligible only if
//! every enabled filter passes.

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::data::bars::Bar;
use crate::data::pivots::{PivotSpec, Side};
use crate::engine::cvd::directional_magnitude;

/// Which confirmation path is asking for entry. Volume-surge thresholds are
/// per-path (the momentum path tolerates less of a surge than a pullback
/// retest), and CVD confirmation is only demanded on the CVD path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPath {
    Momentum,
    Cvd,
    PullbackRetest,
}

/// Which CVD sub-path confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvdPath {
    /// One bar beyond the high threshold, next bar beyond the confirm
    /// threshold, same direction.
    Aggressive,
    /// Moderate threshold held for N consecutive bars, same direction.
    Sustained,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub enable_gap: bool,
    pub enable_time_window: bool,
    pub enable_index_symbol: bool,
    pub enable_choppy: bool,
    pub enable_room_to_run: bool,
    pub enable_volume_surge: bool,
    pub enable_directional_volume: bool,
    pub enable_stochastic: bool,
    pub enable_cvd_imbalance: bool,
    pub enable_cvd_alignment: bool,

    /// Session gap tolerance: open beyond the pivot by more than this
    /// percentage triggers opening-range substitution (or a session block).
    pub gap_tolerance_pct: f64,
    /// Bars used to form the substitute opening-range pivot.
    pub opening_range_bars: usize,
    /// When false, a gapped session is blocked instead of substituted.
    pub substitute_on_gap: bool,

    /// Entry window, exchange-local (ET) time.
    pub session_start_hour: u32,
    pub session_start_minute: u32,
    pub session_end_hour: u32,
    pub session_end_minute: u32,

    /// Broad-market symbols that may not be shorted.
    pub index_symbols: Vec<String>,

    /// Choppy market: rolling (high-low)/low over this many bars must reach
    /// the minimum percentage.
    pub choppy_lookback: usize,
    pub choppy_min_range_pct: f64,

    /// Minimum percentage distance from price to the next target.
    pub min_room_pct: f64,

    /// Volume surge: current volume vs the trailing average.
    pub volume_lookback: usize,
    pub momentum_volume_mult: f64,
    pub pullback_volume_mult: f64,
    /// Floor below which first-bar volume is not even "weak" interest.
    pub weak_volume_mult: f64,

    /// Directional volume: up/down volume ratio confirming the breakout.
    pub min_directional_ratio: f64,

    /// Stochastic %K momentum gate.
    pub stochastic_lookback: usize,
    pub stochastic_threshold: f64,

    /// CVD imbalance thresholds (percent, direction-relative).
    pub cvd_aggressive_pct: f64,
    pub cvd_confirm_pct: f64,
    pub cvd_sustained_pct: f64,
    pub cvd_sustained_bars: usize,

    /// Price alignment: a candle is "unambiguous" when |body|/range reaches
    /// this ratio; contradicting flow beyond the threshold blocks.
    pub alignment_min_body_ratio: f64,
    pub alignment_contradiction_pct: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enable_gap: true,
            enable_time_window: true,
            enable_index_symbol: true,
            enable_choppy: true,
            enable_room_to_run: true,
            enable_volume_surge: true,
            enable_directional_volume: true,
            enable_stochastic: false,
            enable_cvd_imbalance: true,
            enable_cvd_alignment: true,

            gap_tolerance_pct: 0.5,
            opening_range_bars: 5,
            substitute_on_gap: true,

            session_start_hour: 9,
            session_start_minute: 30,
            session_end_hour: 15,
            session_end_minute: 30,

            index_symbols: vec![
                "SPY".to_string(),
                "QQQ".to_string(),
                "DIA".to_string(),
                "IWM".to_string(),
            ],

            choppy_lookback: 10,
            choppy_min_range_pct: 0.3,

            min_room_pct: 0.5,

            volume_lookback: 20,
            momentum_volume_mult: 1.5,
            pullback_volume_mult: 2.0,
            weak_volume_mult: 0.8,

            min_directional_ratio: 1.5,

            stochastic_lookback: 14,
            stochastic_threshold: 70.0,

            cvd_aggressive_pct: 40.0,
            cvd_confirm_pct: 15.0,
            cvd_sustained_pct: 20.0,
            cvd_sustained_bars: 3,

            alignment_min_body_ratio: 0.6,
            alignment_contradiction_pct: 25.0,
        }
    }
}

/// One filter's verdict for one bar. Fresh each bar, never mutated;
/// accumulated on the decision log entry for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterResult {
    pub name: String,
    pub enabled: bool,
    pub passed: bool,
    pub reason: String,
    pub inputs: serde_json::Value,
}

impl FilterResult {
    fn pass(name: &str, reason: impl Into<String>, inputs: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            passed: true,
            reason: reason.into(),
            inputs,
        }
    }

    fn block(name: &str, reason: impl Into<String>, inputs: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            passed: false,
            reason: reason.into(),
            inputs,
        }
    }

    fn disabled(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: false,
            passed: true,
            reason: "disabled".to_string(),
            inputs: serde_json::Value::Null,
        }
    }
}

/// Everything a filter may look at for one bar. Borrowed, read-only.
pub struct FilterContext<'a> {
    pub bar: &'a Bar,
    /// All session bars up to and including the current one.
    pub window: &'a [Bar],
    pub spec: &'a PivotSpec,
    pub side: Side,
    /// Per-bar imbalance percentages up to and including the current bar.
    pub imbalances: &'a [f64],
    pub path: ConfirmationPath,
    pub gap_substituted: bool,
    pub gap_blocked: bool,
}

/// Run every filter in priority order. The outcome is order-independent;
/// the order only fixes how results read in the log.
pub fn run_pipeline(ctx: &FilterContext, cfg: &FilterConfig) -> Vec<FilterResult> {
    vec![
        gap_filter(ctx, cfg),
        time_window_filter(ctx, cfg),
        index_symbol_filter(ctx, cfg),
        choppy_filter(ctx, cfg),
        room_to_run_filter(ctx, cfg),
        volume_surge_filter(ctx, cfg),
        directional_volume_filter(ctx, cfg),
        stochastic_filter(ctx, cfg),
        cvd_imbalance_filter(ctx, cfg),
        cvd_alignment_filter(ctx, cfg),
    ]
}

pub fn all_pass(results: &[FilterResult]) -> bool {
    results.iter().all(|r| !r.enabled || r.passed)
}

/// Names of enabled filters that blocked.
pub fn blocking_names(results: &[FilterResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| r.enabled && !r.passed)
        .map(|r| r.name.clone())
        .collect()
}

/// Trailing volume average over the lookback, excluding the current bar.
/// Returns None when there is no prior history.
pub fn trailing_volume_avg(window: &[Bar], lookback: usize) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let prior = &window[..window.len() - 1];
    let start = prior.len().saturating_sub(lookback);
    let slice = &prior[start..];
    if slice.is_empty() {
        return None;
    }
    Some(slice.iter().map(|b| b.volume as f64).sum::<f64>() / slice.len() as f64)
}

/// CVD confirmation over the imbalance history: aggressive (high-threshold
/// trigger bar confirmed by the next bar) or sustained (moderate threshold
/// for N consecutive bars). Shared by the filter and the state machine so
/// the two can never disagree.
pub fn cvd_confirmation(imbalances: &[f64], side: Side, cfg: &FilterConfig) -> Option<CvdPath> {
    let n = imbalances.len();
    if n >= 2 {
        let trigger = directional_magnitude(side, imbalances[n - 2]);
        let confirm = directional_magnitude(side, imbalances[n - 1]);
        if trigger >= cfg.cvd_aggressive_pct && confirm >= cfg.cvd_confirm_pct {
            return Some(CvdPath::Aggressive);
        }
    }
    if cfg.cvd_sustained_bars > 0 && n >= cfg.cvd_sustained_bars {
        let tail = &imbalances[n - cfg.cvd_sustained_bars..];
        if tail
            .iter()
            .all(|&i| directional_magnitude(side, i) >= cfg.cvd_sustained_pct)
        {
            return Some(CvdPath::Sustained);
        }
    }
    None
}

/// Length of the current sustained-direction streak ending at the last bar.
pub fn sustained_streak(imbalances: &[f64], side: Side, cfg: &FilterConfig) -> usize {
    imbalances
        .iter()
        .rev()
        .take_while(|&&i| directional_magnitude(side, i) >= cfg.cvd_sustained_pct)
        .count()
}

pub fn gap_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "gap";
    if !cfg.enable_gap {
        return FilterResult::disabled(NAME);
    }
    let inputs = json!({
        "substituted": ctx.gap_substituted,
        "tolerance_pct": cfg.gap_tolerance_pct,
    });
    if ctx.gap_blocked {
        return FilterResult::block(
            NAME,
            "session gapped through pivot and substitution is disabled",
            inputs,
        );
    }
    if ctx.gap_substituted {
        return FilterResult::pass(NAME, "opening-range pivot substituted after gap", inputs);
    }
    FilterResult::pass(NAME, "no gap through pivot", inputs)
}

pub fn time_window_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "time_window";
    if !cfg.enable_time_window {
        return FilterResult::disabled(NAME);
    }
    // Exchange-local clock; chrono-tz handles DST.
    let et = ctx.bar.timestamp.with_timezone(&chrono_tz::America::New_York);
    let mins = et.hour() * 60 + et.minute();
    let start = cfg.session_start_hour * 60 + cfg.session_start_minute;
    let end = cfg.session_end_hour * 60 + cfg.session_end_minute;
    let inputs = json!({ "et_time": format!("{:02}:{:02}", et.hour(), et.minute()) });
    if mins >= start && mins < end {
        FilterResult::pass(NAME, "inside entry window", inputs)
    } else {
        FilterResult::block(NAME, "outside entry window", inputs)
    }
}

pub fn index_symbol_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "index_symbol";
    if !cfg.enable_index_symbol {
        return FilterResult::disabled(NAME);
    }
    let is_index = cfg.index_symbols.iter().any(|s| s == &ctx.spec.symbol);
    let inputs = json!({ "is_index": is_index, "side": ctx.side.to_string() });
    if is_index && ctx.side == Side::Short {
        FilterResult::block(NAME, "no shorting broad-market index symbols", inputs)
    } else {
        FilterResult::pass(NAME, "not an index short", inputs)
    }
}

pub fn choppy_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "choppy";
    if !cfg.enable_choppy {
        return FilterResult::disabled(NAME);
    }
    let start = ctx.window.len().saturating_sub(cfg.choppy_lookback);
    let slice = &ctx.window[start..];
    let high = slice.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = slice.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let range_pct = if low > 0.0 { (high - low) / low * 100.0 } else { 0.0 };
    let inputs = json!({
        "range_pct": range_pct,
        "min_range_pct": cfg.choppy_min_range_pct,
        "lookback": slice.len(),
    });
    if range_pct >= cfg.choppy_min_range_pct {
        FilterResult::pass(NAME, format!("rolling range {:.2}%", range_pct), inputs)
    } else {
        FilterResult::block(
            NAME,
            format!(
                "rolling range {:.2}% below {:.2}%, no directional conviction",
                range_pct, cfg.choppy_min_range_pct
            ),
            inputs,
        )
    }
}

pub fn room_to_run_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "room_to_run";
    if !cfg.enable_room_to_run {
        return FilterResult::disabled(NAME);
    }
    let price = ctx.bar.close;
    let targets = [ctx.spec.target1, ctx.spec.target2, ctx.spec.target3];
    // First target still ahead of price in the trade direction.
    let next_target = targets
        .iter()
        .copied()
        .find(|&t| ctx.side.sign() * (t - price) > 0.0);
    match next_target {
        Some(target) => {
            let room_pct = (target - price).abs() / price * 100.0;
            let inputs = json!({ "next_target": target, "room_pct": room_pct });
            if room_pct >= cfg.min_room_pct {
                FilterResult::pass(
                    NAME,
                    format!("{:.2}% to next target {:.2}", room_pct, target),
                    inputs,
                )
            } else {
                FilterResult::block(
                    NAME,
                    format!("only {:.2}% to next target {:.2}", room_pct, target),
                    inputs,
                )
            }
        }
        None => FilterResult::block(
            NAME,
            "price already beyond final target",
            json!({ "price": price }),
        ),
    }
}

pub fn volume_surge_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "volume_surge";
    if !cfg.enable_volume_surge {
        return FilterResult::disabled(NAME);
    }
    if ctx.path == ConfirmationPath::Cvd {
        // Order-flow confirmation carries the burden on the CVD path.
        return FilterResult::pass(
            NAME,
            "not required on CVD confirmation path",
            serde_json::Value::Null,
        );
    }
    let mult = match ctx.path {
        ConfirmationPath::Momentum => cfg.momentum_volume_mult,
        ConfirmationPath::PullbackRetest => cfg.pullback_volume_mult,
        ConfirmationPath::Cvd => unreachable!(),
    };
    let Some(avg) = trailing_volume_avg(ctx.window, cfg.volume_lookback) else {
        return FilterResult::block(
            NAME,
            "insufficient volume history",
            serde_json::Value::Null,
        );
    };
    let ratio = if avg > 0.0 {
        ctx.bar.volume as f64 / avg
    } else {
        0.0
    };
    let inputs = json!({
        "volume": ctx.bar.volume,
        "trailing_avg": avg,
        "ratio": ratio,
        "required_mult": mult,
    });
    if ratio >= mult {
        FilterResult::pass(NAME, format!("volume {:.2}x trailing average", ratio), inputs)
    } else {
        FilterResult::block(
            NAME,
            format!("volume {:.2}x below required {:.2}x", ratio, mult),
            inputs,
        )
    }
}

pub fn directional_volume_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "directional_volume";
    if !cfg.enable_directional_volume {
        return FilterResult::disabled(NAME);
    }
    let start = ctx.window.len().saturating_sub(cfg.volume_lookback);
    let slice = &ctx.window[start..];
    let up: u64 = slice.iter().filter(|b| b.body() > 0.0).map(|b| b.volume).sum();
    let down: u64 = slice.iter().filter(|b| b.body() < 0.0).map(|b| b.volume).sum();
    let (with_trend, against) = match ctx.side {
        Side::Long => (up, down),
        Side::Short => (down, up),
    };
    let ratio = if against > 0 {
        with_trend as f64 / against as f64
    } else if with_trend > 0 {
        f64::INFINITY
    } else {
        0.0
    };
    let inputs = json!({ "up_volume": up, "down_volume": down, "ratio_with_trend": ratio });
    if ratio >= cfg.min_directional_ratio {
        FilterResult::pass(
            NAME,
            format!("with-trend volume ratio {:.2}", ratio),
            inputs,
        )
    } else {
        FilterResult::block(
            NAME,
            format!(
                "with-trend volume ratio {:.2} below {:.2}",
                ratio, cfg.min_directional_ratio
            ),
            inputs,
        )
    }
}

pub fn stochastic_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "stochastic";
    if !cfg.enable_stochastic {
        return FilterResult::disabled(NAME);
    }
    let start = ctx.window.len().saturating_sub(cfg.stochastic_lookback);
    let slice = &ctx.window[start..];
    let high = slice.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = slice.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    if high <= low {
        return FilterResult::block(NAME, "flat lookback range", serde_json::Value::Null);
    }
    let k = (ctx.bar.close - low) / (high - low) * 100.0;
    let inputs = json!({ "percent_k": k, "threshold": cfg.stochastic_threshold });
    let confirms = match ctx.side {
        Side::Long => k >= cfg.stochastic_threshold,
        Side::Short => k <= 100.0 - cfg.stochastic_threshold,
    };
    if confirms {
        FilterResult::pass(NAME, format!("%K {:.1} confirms momentum", k), inputs)
    } else {
        FilterResult::block(NAME, format!("%K {:.1} does not confirm", k), inputs)
    }
}

pub fn cvd_imbalance_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "cvd_imbalance";
    if !cfg.enable_cvd_imbalance {
        return FilterResult::disabled(NAME);
    }
    if ctx.path != ConfirmationPath::Cvd {
        return FilterResult::pass(
            NAME,
            "CVD confirmation not required on this path",
            serde_json::Value::Null,
        );
    }
    let last = ctx.imbalances.last().copied().unwrap_or(0.0);
    let inputs = json!({
        "imbalance_pct": last,
        "aggressive_pct": cfg.cvd_aggressive_pct,
        "confirm_pct": cfg.cvd_confirm_pct,
        "sustained_pct": cfg.cvd_sustained_pct,
        "sustained_bars": cfg.cvd_sustained_bars,
    });
    match cvd_confirmation(ctx.imbalances, ctx.side, cfg) {
        Some(CvdPath::Aggressive) => {
            FilterResult::pass(NAME, "aggressive imbalance confirmed", inputs)
        }
        Some(CvdPath::Sustained) => {
            FilterResult::pass(NAME, "sustained imbalance confirmed", inputs)
        }
        None => FilterResult::block(NAME, "no aggressive or sustained confirmation", inputs),
    }
}

pub fn cvd_alignment_filter(ctx: &FilterContext, cfg: &FilterConfig) -> FilterResult {
    const NAME: &str = "cvd_alignment";
    if !cfg.enable_cvd_alignment {
        return FilterResult::disabled(NAME);
    }
    let bar = ctx.bar;
    let range = bar.range();
    let imbalance = ctx.imbalances.last().copied().unwrap_or(0.0);
    let body_ratio = if range > 0.0 {
        bar.body().abs() / range
    } else {
        0.0
    };
    let inputs = json!({ "imbalance_pct": imbalance, "body_ratio": body_ratio });
    if body_ratio < cfg.alignment_min_body_ratio {
        return FilterResult::pass(NAME, "candle ambiguous, no alignment demand", inputs);
    }
    // Unambiguous candle: flow strongly disagreeing with its color blocks.
    let green = bar.body() > 0.0;
    let contradicted = if green {
        imbalance >= cfg.alignment_contradiction_pct
    } else {
        imbalance <= -cfg.alignment_contradiction_pct
    };
    if contradicted {
        FilterResult::block(
            NAME,
            format!(
                "{} candle contradicted by {:.1}% imbalance",
                if green { "green" } else { "red" },
                imbalance
            ),
            inputs,
        )
    } else {
        FilterResult::pass(NAME, "order flow agrees with candle", inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bars::test_support::bar_at;

    fn spec() -> PivotSpec {
        PivotSpec {
            symbol: "TEST".to_string(),
            resistance: 100.0,
            support: 98.0,
            target1: 102.0,
            target2: 104.0,
            target3: 106.0,
        }
    }

    fn ctx<'a>(
        bar: &'a Bar,
        window: &'a [Bar],
        spec: &'a PivotSpec,
        imbalances: &'a [f64],
    ) -> FilterContext<'a> {
        FilterContext {
            bar,
            window,
            spec,
            side: Side::Long,
            imbalances,
            path: ConfirmationPath::Momentum,
            gap_substituted: false,
            gap_blocked: false,
        }
    }

    #[test]
    fn test_choppy_blocks_narrow_range() {
        let spec = spec();
        let window: Vec<Bar> = (0..10)
            .map(|i| bar_at(i, 100.0, 100.05, 99.95, 100.0, 1000))
            .collect();
        let bar = window.last().unwrap().clone();
        let result = choppy_filter(&ctx(&bar, &window, &spec, &[]), &FilterConfig::default());
        assert!(!result.passed);
    }

    #[test]
    fn test_choppy_passes_wide_range() {
        let spec = spec();
        let window: Vec<Bar> = (0..10)
            .map(|i| bar_at(i, 100.0, 101.0, 99.0, 100.5, 1000))
            .collect();
        let bar = window.last().unwrap().clone();
        let result = choppy_filter(&ctx(&bar, &window, &spec, &[]), &FilterConfig::default());
        assert!(result.passed);
    }

    #[test]
    fn test_room_to_run_blocks_near_target() {
        let spec = spec();
        // Close at 101.8, next target 102.0: ~0.2% room, below 0.5% minimum.
        let window = vec![bar_at(0, 101.5, 102.0, 101.4, 101.8, 1000)];
        let bar = window[0].clone();
        let result = room_to_run_filter(&ctx(&bar, &window, &spec, &[]), &FilterConfig::default());
        assert!(!result.passed);
    }

    #[test]
    fn test_room_to_run_skips_passed_targets() {
        let spec = spec();
        // Price between target1 and target2: room measured to target2.
        let window = vec![bar_at(0, 102.5, 103.2, 102.4, 103.0, 1000)];
        let bar = window[0].clone();
        let result = room_to_run_filter(&ctx(&bar, &window, &spec, &[]), &FilterConfig::default());
        assert!(result.passed);
        assert_eq!(result.inputs["next_target"], 104.0);
    }

    #[test]
    fn test_volume_surge_per_path_thresholds() {
        let spec = spec();
        let mut window: Vec<Bar> = (0..20)
            .map(|i| bar_at(i, 100.0, 100.5, 99.5, 100.2, 1000))
            .collect();
        // 1.8x the trailing average: enough for momentum, not for pullback.
        window.push(bar_at(20, 100.2, 101.0, 100.1, 100.9, 1800));
        let bar = window.last().unwrap().clone();
        let cfg = FilterConfig::default();

        let mut c = ctx(&bar, &window, &spec, &[]);
        c.path = ConfirmationPath::Momentum;
        assert!(volume_surge_filter(&c, &cfg).passed);

        c.path = ConfirmationPath::PullbackRetest;
        assert!(!volume_surge_filter(&c, &cfg).passed);
    }

    #[test]
    fn test_volume_surge_blocks_without_history() {
        let spec = spec();
        let window = vec![bar_at(0, 100.0, 101.0, 99.0, 100.5, 5000)];
        let bar = window[0].clone();
        let result =
            volume_surge_filter(&ctx(&bar, &window, &spec, &[]), &FilterConfig::default());
        assert!(!result.passed);
    }

    #[test]
    fn test_index_symbol_blocks_short_only() {
        let mut spec = spec();
        spec.symbol = "SPY".to_string();
        let window = vec![bar_at(0, 100.0, 101.0, 99.0, 100.5, 1000)];
        let bar = window[0].clone();
        let cfg = FilterConfig::default();

        let mut c = ctx(&bar, &window, &spec, &[]);
        assert!(index_symbol_filter(&c, &cfg).passed);
        c.side = Side::Short;
        assert!(!index_symbol_filter(&c, &cfg).passed);
    }

    #[test]
    fn test_cvd_aggressive_confirmation() {
        let cfg = FilterConfig::default();
        // Long side: buying pressure is negative imbalance.
        let imbalances = vec![-5.0, -45.0, -20.0];
        assert_eq!(
            cvd_confirmation(&imbalances, Side::Long, &cfg),
            Some(CvdPath::Aggressive)
        );
        // Confirm bar below the lower threshold: no confirmation.
        let imbalances = vec![-5.0, -45.0, -10.0];
        assert_eq!(cvd_confirmation(&imbalances, Side::Long, &cfg), None);
    }

    #[test]
    fn test_cvd_sustained_confirmation() {
        let cfg = FilterConfig::default();
        let imbalances = vec![-25.0, -22.0, -30.0];
        assert_eq!(
            cvd_confirmation(&imbalances, Side::Long, &cfg),
            Some(CvdPath::Sustained)
        );
        // One bar in the wrong direction breaks the streak.
        let imbalances = vec![-25.0, 10.0, -30.0];
        assert_eq!(cvd_confirmation(&imbalances, Side::Long, &cfg), None);
    }

    #[test]
    fn test_alignment_blocks_contradiction() {
        let spec = spec();
        // Strongly green candle but heavy selling imbalance.
        let window = vec![bar_at(0, 100.0, 101.0, 99.9, 100.9, 1000)];
        let bar = window[0].clone();
        let imbalances = vec![40.0];
        let result =
            cvd_alignment_filter(&ctx(&bar, &window, &spec, &imbalances), &FilterConfig::default());
        assert!(!result.passed);
    }

    #[test]
    fn test_alignment_ignores_doji() {
        let spec = spec();
        // Tiny body relative to range: no alignment demand.
        let window = vec![bar_at(0, 100.0, 101.0, 99.0, 100.05, 1000)];
        let bar = window[0].clone();
        let imbalances = vec![40.0];
        let result =
            cvd_alignment_filter(&ctx(&bar, &window, &spec, &imbalances), &FilterConfig::default());
        assert!(result.passed);
    }

    #[test]
    fn test_time_window_blocks_outside() {
        let spec = spec();
        // 14:30 UTC == 09:30 ET in March (EST->EDT switched Mar 8 2026; Mar 2 is EST, 14:30 UTC = 09:30 EST).
        let inside = bar_at(30, 100.0, 101.0, 99.0, 100.5, 1000);
        let window = vec![inside.clone()];
        let cfg = FilterConfig::default();
        assert!(time_window_filter(&ctx(&inside, &window, &spec, &[]), &cfg).passed);

        // 7 hours later: past the 15:30 ET cutoff.
        let outside = bar_at(420, 100.0, 101.0, 99.0, 100.5, 1000);
        let window = vec![outside.clone()];
        assert!(!time_window_filter(&ctx(&outside, &window, &spec, &[]), &cfg).passed);
    }

    #[test]
    fn test_all_pass_ignores_disabled() {
        let results = vec![
            FilterResult::pass("a", "ok", serde_json::Value::Null),
            FilterResult::disabled("b"),
        ];
        assert!(all_pass(&results));
        let results = vec![FilterResult::block("a", "no", serde_json::Value::Null)];
        assert!(!all_pass(&results));
    }
}
