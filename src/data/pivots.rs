//! Pivot specs: scanner output consumed once per session.
//!
//! One record per symbol: a resistance/support pair plus up to three
//! upside/downside targets. Records with `resistance <= support` are
//! invalid and skipped with a single config error, never silently dropped.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::errors::PipelineError;

/// Breakout direction relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for Long, -1.0 for Short. Used to fold directional price math.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Scanner-provided pivot levels for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivotSpec {
    pub symbol: String,
    pub resistance: f64,
    pub support: f64,
    pub target1: f64,
    pub target2: f64,
    pub target3: f64,
}

impl PivotSpec {
    /// The level whose crossing starts an attempt on the given side.
    pub fn level_for(&self, side: Side) -> f64 {
        match side {
            Side::Long => self.resistance,
            Side::Short => self.support,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.resistance > self.support) {
            return Err(PipelineError::Config {
                symbol: self.symbol.clone(),
                detail: format!(
                    "resistance {:.2} must exceed support {:.2}",
                    self.resistance, self.support
                ),
            });
        }
        if !self.resistance.is_finite() || !self.support.is_finite() {
            return Err(PipelineError::Config {
                symbol: self.symbol.clone(),
                detail: "non-finite pivot level".to_string(),
            });
        }
        Ok(())
    }
}

/// Load pivot specs from a JSON array file.
///
/// Returns the valid specs plus the config errors for skipped records so the
/// caller can count them in the final report.
pub fn load_pivot_specs(path: &Path) -> anyhow::Result<(Vec<PivotSpec>, Vec<PipelineError>)> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pivot file {:?}", path))?;
    let specs: Vec<PivotSpec> = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse pivot file {:?}", path))?;

    let mut valid = Vec::with_capacity(specs.len());
    let mut skipped = Vec::new();
    for spec in specs {
        match spec.validate() {
            Ok(()) => valid.push(spec),
            Err(e) => {
                warn!("skipping pivot spec: {}", e);
                skipped.push(e);
            }
        }
    }
    Ok((valid, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(resistance: f64, support: f64) -> PivotSpec {
        PivotSpec {
            symbol: "TEST".to_string(),
            resistance,
            support,
            target1: resistance + 2.0,
            target2: resistance + 4.0,
            target3: resistance + 6.0,
        }
    }

    #[test]
    fn test_inverted_levels_rejected() {
        let err = spec(99.0, 100.0).validate().unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[test]
    fn test_equal_levels_rejected() {
        assert!(spec(100.0, 100.0).validate().is_err());
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(spec(100.0, 98.0).validate().is_ok());
    }
}
