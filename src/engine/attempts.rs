//! Attempt tracking: caps independent pivot-crossing attempts per
//! (symbol, side) per session and enforces a bar-count cooldown between one
//! attempt's terminal resolution and the next attempt's birth. Without this,
//! price oscillating around the pivot would re-trigger without bound.
//!
//! The cooldown anchors only on terminal resolution (entered or blocked);
//! per-bar monitoring blocks inside a live attempt do not touch it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::data::pivots::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptConfig {
    /// Maximum independent attempts per (symbol, side) per session.
    pub max_attempts_per_side: u32,
    /// Minimum bars between terminal resolution and the next attempt birth.
    pub cooldown_bars: usize,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_side: 3,
            cooldown_bars: 10,
        }
    }
}

/// Why a crossing did not spawn an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnBlock {
    /// An attempt on this side is still non-terminal.
    ActiveAttempt,
    /// Session cap reached.
    CapReached,
    /// Still inside the post-resolution cooldown.
    CoolingDown { remaining_bars: usize },
}

#[derive(Debug, Clone, Default)]
struct SideState {
    attempts: u32,
    active: bool,
    last_resolution_bar: Option<usize>,
}

/// Per-symbol attempt bookkeeping for one session.
#[derive(Debug, Clone)]
pub struct AttemptTracker {
    config: AttemptConfig,
    sides: HashMap<Side, SideState>,
}

impl AttemptTracker {
    pub fn new(config: AttemptConfig) -> Self {
        Self {
            config,
            sides: HashMap::new(),
        }
    }

    /// May a new attempt be born on this side at this bar?
    pub fn can_spawn(&self, side: Side, bar_idx: usize) -> Result<(), SpawnBlock> {
        let state = match self.sides.get(&side) {
            Some(s) => s,
            None => return Ok(()),
        };
        if state.active {
            return Err(SpawnBlock::ActiveAttempt);
        }
        if state.attempts >= self.config.max_attempts_per_side {
            return Err(SpawnBlock::CapReached);
        }
        if let Some(resolved) = state.last_resolution_bar {
            let eligible = resolved + self.config.cooldown_bars;
            if bar_idx < eligible {
                return Err(SpawnBlock::CoolingDown {
                    remaining_bars: eligible - bar_idx,
                });
            }
        }
        Ok(())
    }

    /// Record an attempt birth; returns the 1-based attempt number.
    pub fn on_spawn(&mut self, side: Side) -> u32 {
        let state = self.sides.entry(side).or_default();
        state.attempts += 1;
        state.active = true;
        state.attempts
    }

    /// Record an attempt's terminal resolution at the given bar.
    pub fn on_resolve(&mut self, side: Side, bar_idx: usize) {
        if let Some(state) = self.sides.get_mut(&side) {
            state.active = false;
            state.last_resolution_bar = Some(bar_idx);
        }
    }

    pub fn attempts(&self, side: Side) -> u32 {
        self.sides.get(&side).map(|s| s.attempts).unwrap_or(0)
    }

    pub fn has_active(&self, side: Side) -> bool {
        self.sides.get(&side).map(|s| s.active).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_enforced() {
        let mut tracker = AttemptTracker::new(AttemptConfig {
            max_attempts_per_side: 2,
            cooldown_bars: 0,
        });
        for i in 0..2 {
            assert!(tracker.can_spawn(Side::Long, i * 10).is_ok());
            tracker.on_spawn(Side::Long);
            tracker.on_resolve(Side::Long, i * 10 + 3);
        }
        assert_eq!(
            tracker.can_spawn(Side::Long, 100),
            Err(SpawnBlock::CapReached)
        );
        // The other side is independent.
        assert!(tracker.can_spawn(Side::Short, 100).is_ok());
    }

    #[test]
    fn test_cooldown_between_attempts() {
        let mut tracker = AttemptTracker::new(AttemptConfig {
            max_attempts_per_side: 5,
            cooldown_bars: 10,
        });
        tracker.on_spawn(Side::Long);
        tracker.on_resolve(Side::Long, 20);
        assert_eq!(
            tracker.can_spawn(Side::Long, 25),
            Err(SpawnBlock::CoolingDown { remaining_bars: 5 })
        );
        assert!(tracker.can_spawn(Side::Long, 30).is_ok());
    }

    #[test]
    fn test_no_overlapping_attempts() {
        let mut tracker = AttemptTracker::new(AttemptConfig::default());
        tracker.on_spawn(Side::Long);
        assert_eq!(
            tracker.can_spawn(Side::Long, 5),
            Err(SpawnBlock::ActiveAttempt)
        );
        tracker.on_resolve(Side::Long, 6);
        assert!(tracker.can_spawn(Side::Long, 16).is_ok());
    }
}
