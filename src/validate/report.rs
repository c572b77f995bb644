//! Validation report: aggregates grades into verdict counts and per-filter
//! effectiveness, renders the console summary, and persists the full detail
//! as JSON.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::PipelineError;
use crate::validate::validator::{DecisionGrade, EngineAction, Verdict, ALL_VERDICTS};

/// How often a filter's blocks were vindicated by the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterEffectiveness {
    pub name: String,
    /// Blocks where the breakout then failed.
    pub correct_blocks: usize,
    /// Blocks where the breakout then won.
    pub costly_blocks: usize,
}

impl FilterEffectiveness {
    pub fn accuracy_pct(&self) -> f64 {
        let total = self.correct_blocks + self.costly_blocks;
        if total == 0 {
            return 0.0;
        }
        self.correct_blocks as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub symbols_validated: usize,
    pub breakouts_graded: usize,
    /// Verdict name -> count, every verdict present even at zero.
    pub verdict_counts: BTreeMap<String, usize>,
    pub filter_effectiveness: Vec<FilterEffectiveness>,
    pub grades: Vec<DecisionGrade>,
    /// Rendered critical findings (timestamp alignment failures).
    pub critical: Vec<String>,
    /// Symbols skipped for data or config problems.
    pub skipped: Vec<String>,
}

impl ValidationReport {
    pub fn build(
        symbols_validated: usize,
        grades: Vec<DecisionGrade>,
        errors: &[PipelineError],
    ) -> Self {
        let mut verdict_counts: BTreeMap<String, usize> = ALL_VERDICTS
            .iter()
            .map(|v| (v.to_string(), 0))
            .collect();
        for grade in &grades {
            *verdict_counts.entry(grade.verdict.to_string()).or_insert(0) += 1;
        }

        // Per-filter scoreboard over blocked-and-matched breakouts.
        let mut filters: BTreeMap<String, FilterEffectiveness> = BTreeMap::new();
        for grade in &grades {
            let EngineAction::Blocked { blocking_filters } = &grade.action else {
                continue;
            };
            let costly = grade.verdict == Verdict::MissedWinner;
            let correct = grade.verdict == Verdict::GoodBlock;
            if !costly && !correct {
                continue;
            }
            for name in blocking_filters {
                let entry = filters
                    .entry(name.clone())
                    .or_insert_with(|| FilterEffectiveness {
                        name: name.clone(),
                        correct_blocks: 0,
                        costly_blocks: 0,
                    });
                if correct {
                    entry.correct_blocks += 1;
                } else {
                    entry.costly_blocks += 1;
                }
            }
        }

        let critical = errors
            .iter()
            .filter(|e| e.is_critical())
            .map(|e| e.to_string())
            .collect();
        let skipped = errors
            .iter()
            .filter(|e| !e.is_critical())
            .map(|e| e.to_string())
            .collect();

        Self {
            symbols_validated,
            breakouts_graded: grades.len(),
            verdict_counts,
            filter_effectiveness: filters.into_values().collect(),
            grades,
            critical,
            skipped,
        }
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.verdict_counts
            .get(&verdict.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Console summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "═".repeat(62);
        out.push_str(&rule);
        out.push_str("\n  DECISION VALIDATION\n");
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!(
            "  Symbols validated:  {}\n  Breakouts graded:   {}\n",
            self.symbols_validated, self.breakouts_graded
        ));
        out.push('\n');
        for verdict in ALL_VERDICTS {
            out.push_str(&format!(
                "  {:<16} {:>5}\n",
                verdict.to_string(),
                self.count(verdict)
            ));
        }
        if !self.filter_effectiveness.is_empty() {
            out.push_str("\n  Filter effectiveness (blocked attempts):\n");
            for f in &self.filter_effectiveness {
                out.push_str(&format!(
                    "    {:<20} {:>3} correct / {:>3} costly  ({:.1}%)\n",
                    f.name,
                    f.correct_blocks,
                    f.costly_blocks,
                    f.accuracy_pct()
                ));
            }
        }
        if !self.skipped.is_empty() {
            out.push_str(&format!("\n  Skipped: {} symbol(s)\n", self.skipped.len()));
        }
        if !self.critical.is_empty() {
            out.push_str(&format!(
                "\n  CRITICAL: {} decision(s) without a matching crossing\n",
                self.critical.len()
            ));
            for c in &self.critical {
                out.push_str(&format!("    {}\n", c));
            }
        }
        out.push_str(&rule);
        out.push('\n');
        out
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write validation report {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::pivots::Side;
    use crate::validate::classifier::Outcome;

    fn grade(verdict: Verdict, action: EngineAction) -> DecisionGrade {
        DecisionGrade {
            symbol: "TEST".to_string(),
            side: Side::Long,
            timestamp: chrono::Utc::now(),
            verdict,
            outcome: Outcome::Winner,
            stars: 3,
            action,
            analysis: String::new(),
            recommendation: String::new(),
        }
    }

    #[test]
    fn test_verdict_counts_cover_all_cells() {
        let report = ValidationReport::build(
            1,
            vec![grade(Verdict::GoodEntry, EngineAction::NotEngaged)],
            &[],
        );
        assert_eq!(report.verdict_counts.len(), 8);
        assert_eq!(report.count(Verdict::GoodEntry), 1);
        assert_eq!(report.count(Verdict::BadEntry), 0);
    }

    #[test]
    fn test_filter_scoreboard_splits_correct_and_costly() {
        let blocked = || EngineAction::Blocked {
            blocking_filters: vec!["choppy".to_string()],
        };
        let grades = vec![
            grade(Verdict::GoodBlock, blocked()),
            grade(Verdict::GoodBlock, blocked()),
            grade(Verdict::MissedWinner, blocked()),
        ];
        let report = ValidationReport::build(1, grades, &[]);
        assert_eq!(report.filter_effectiveness.len(), 1);
        let f = &report.filter_effectiveness[0];
        assert_eq!(f.correct_blocks, 2);
        assert_eq!(f.costly_blocks, 1);
        assert!((f.accuracy_pct() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_critical_errors_surface_in_render() {
        let errors = vec![PipelineError::TimestampMatch {
            symbol: "TEST".to_string(),
            timestamp: chrono::Utc::now(),
        }];
        let report = ValidationReport::build(1, vec![], &errors);
        assert_eq!(report.critical.len(), 1);
        assert!(report.render().contains("CRITICAL"));
    }
}
