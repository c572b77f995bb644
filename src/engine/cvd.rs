//! CVD (cumulative volume delta) estimation from bars.
//!
//! Returns a per-bar imbalance percentage in [-100, 100] where POSITIVE
//! means net selling pressure. When the feed carries trade-side volumes the
//! estimate is exact; otherwise it is approximated from the close's position
//! inside the bar's range. The proxy assumes volume is uniformly distributed
//! across the range, which systematically overstates pressure on large-wick
//! bars. Treat proxy values as an estimate, not ground truth.

use crate::data::bars::Bar;
use crate::data::pivots::Side;

/// Per-bar buy/sell imbalance percentage. Positive = selling pressure.
pub fn imbalance_pct(bar: &Bar) -> f64 {
    if let (Some(buy), Some(sell)) = (bar.buy_volume, bar.sell_volume) {
        let total = buy + sell;
        if total == 0 {
            return 0.0;
        }
        return (sell as f64 - buy as f64) / total as f64 * 100.0;
    }

    // OHLCV proxy: close near the high implies buyers absorbed the range.
    let range = bar.range();
    if range <= 0.0 || bar.volume == 0 {
        return 0.0;
    }
    let buy_vol = bar.volume as f64 * (bar.close - bar.low) / range;
    let sell_vol = bar.volume as f64 * (bar.high - bar.close) / range;
    (sell_vol - buy_vol) / bar.volume as f64 * 100.0
}

/// Imbalance magnitude in the direction that favors the given side.
///
/// Long breakouts are confirmed by buying pressure (negative imbalance),
/// shorts by selling pressure (positive imbalance). A negative return value
/// means the flow opposes the side.
pub fn directional_magnitude(side: Side, imbalance: f64) -> f64 {
    -side.sign() * imbalance
}
