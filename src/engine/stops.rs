//! Stop placement shared by the live entry path and the outcome classifier.
//!
//! The classifier must grade outcomes against the stops the strategy would
//! actually have used, so this is the single source of stop math for both.

use serde::{Deserialize, Serialize};

use crate::data::pivots::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    /// Buffer beyond the pivot as a percentage of entry price.
    pub buffer_pct: f64,
    /// Absolute floor for the buffer, in price units.
    pub min_offset: f64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            buffer_pct: 0.5,
            min_offset: 0.05,
        }
    }
}

/// Structure-based stop: beyond the pivot by a buffer, never at the pivot
/// itself. Long stops sit below the broken resistance, short stops above the
/// broken support.
pub fn stop_price(side: Side, entry: f64, pivot: f64, config: &StopConfig) -> f64 {
    let buffer = (entry * config.buffer_pct / 100.0).max(config.min_offset);
    pivot - side.sign() * buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_stop_below_pivot() {
        let cfg = StopConfig::default();
        let stop = stop_price(Side::Long, 101.0, 100.0, &cfg);
        assert!(stop < 100.0);
        assert!((stop - (100.0 - 0.505)).abs() < 1e-9);
    }

    #[test]
    fn test_short_stop_above_pivot() {
        let cfg = StopConfig::default();
        let stop = stop_price(Side::Short, 99.0, 100.0, &cfg);
        assert!(stop > 100.0);
        assert!((stop - (100.0 + 0.495)).abs() < 1e-9);
    }

    #[test]
    fn test_min_offset_floor() {
        let cfg = StopConfig {
            buffer_pct: 0.001,
            min_offset: 0.25,
        };
        let stop = stop_price(Side::Long, 10.0, 10.0, &cfg);
        assert!((stop - 9.75).abs() < 1e-9);
    }
}
