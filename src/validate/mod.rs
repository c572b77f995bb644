//! Hindsight validation: classify what the market did, align it with what
//! the engine decided, and grade every decision.
//!
//! The classifier is deliberately independent of the engine (it re-detects
//! crossings from raw bars); only stop placement and gap substitution are
//! shared, so both sides always reason about the identical levels.

pub mod classifier;
pub mod matcher;
pub mod report;
pub mod validator;

use anyhow::Context;
use rayon::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use crate::data::bars::load_session_bars;
use crate::data::pivots::load_pivot_specs;
use crate::engine::decision_log::DecisionLog;
use crate::engine::session::{effective_pivots, EngineConfig};
use crate::errors::PipelineError;
use crate::validate::classifier::identify_breakouts;
use crate::validate::matcher::{collect_attempts, match_breakouts, unmatched_terminal_attempts};
use crate::validate::report::ValidationReport;
use crate::validate::validator::{grade_decisions, DecisionGrade};

struct SymbolValidation {
    grades: Vec<DecisionGrade>,
    errors: Vec<PipelineError>,
    validated: bool,
}

/// Validate a run's decision log against raw bars for one session date.
pub fn run_validation(
    data_dir: &Path,
    pivot_path: &Path,
    log_path: &Path,
    date: &str,
    config: &EngineConfig,
) -> anyhow::Result<ValidationReport> {
    let (mut specs, skipped_specs) =
        load_pivot_specs(pivot_path).context("failed to load pivot specs")?;
    specs.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let log = DecisionLog::read_json_lines(log_path).context("failed to read decision log")?;
    let attempts = collect_attempts(log.entries());
    info!(
        "validating {} symbols against {} logged attempts",
        specs.len(),
        attempts.len()
    );

    let per_symbol: Vec<SymbolValidation> = specs
        .par_iter()
        .map(|spec| {
            let bars = match load_session_bars(data_dir, &spec.symbol, date) {
                Ok(bars) => bars,
                Err(e) => {
                    warn!("skipping {}: {}", spec.symbol, e);
                    return SymbolValidation {
                        grades: vec![],
                        errors: vec![e],
                        validated: false,
                    };
                }
            };
            // Gapped sessions trade the opening-range substituted levels;
            // classify against the same levels the engine used or every
            // logged attempt would look like an alignment failure.
            let effective = effective_pivots(spec, bars.bars(), &config.filters)
                .unwrap_or_else(|| spec.clone());
            let breakouts =
                identify_breakouts(&effective, bars.bars(), &config.stops, &config.classifier);
            let sym_attempts: Vec<_> = attempts
                .iter()
                .filter(|a| a.symbol == spec.symbol)
                .cloned()
                .collect();
            let matches = match_breakouts(&breakouts, &sym_attempts, bars.bar_interval_secs());
            let errors = unmatched_terminal_attempts(&sym_attempts, &matches);
            let grades = grade_decisions(&breakouts, &sym_attempts, &matches);
            SymbolValidation {
                grades,
                errors,
                validated: true,
            }
        })
        .collect();

    let mut grades = Vec::new();
    let mut errors: Vec<PipelineError> = skipped_specs;
    let mut validated = 0;
    for result in per_symbol {
        grades.extend(result.grades);
        errors.extend(result.errors);
        if result.validated {
            validated += 1;
        }
    }

    Ok(ValidationReport::build(validated, grades, &errors))
}
