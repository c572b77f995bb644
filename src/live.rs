//! Live mode: consume streamed bar closes and drive the same per-symbol
//! engines replay uses.
//!
//! The runner owns one `SessionEngine` per pivot symbol and routes each
//! completed bar to it; nothing here makes decisions, so live and replay
//! stay bit-for-bit equivalent on the same bars. A single writer persists
//! the log at session end, in sorted-symbol order like replay's merge.

use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::data::bars::Bar;
use crate::data::pivots::PivotSpec;
use crate::engine::decision_log::DecisionLog;
use crate::engine::session::{EngineConfig, SessionEngine};
use crate::errors::PipelineError;
use crate::replay::ReplaySummary;

/// One completed bar from the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct BarEvent {
    pub symbol: String,
    #[serde(flatten)]
    pub bar: Bar,
}

pub struct LiveRunner {
    engines: BTreeMap<String, SessionEngine>,
    unknown_events: u64,
}

impl LiveRunner {
    /// Build one engine per valid pivot spec; invalid specs are skipped and
    /// returned as config errors.
    pub fn new(specs: Vec<PivotSpec>, config: &EngineConfig) -> (Self, Vec<PipelineError>) {
        let mut engines = BTreeMap::new();
        let mut errors = Vec::new();
        for spec in specs {
            let symbol = spec.symbol.clone();
            match SessionEngine::new(spec, config.clone()) {
                Ok(engine) => {
                    engines.insert(symbol, engine);
                }
                Err(e) => {
                    warn!("skipping {}: {}", symbol, e);
                    errors.push(e);
                }
            }
        }
        (
            Self {
                engines,
                unknown_events: 0,
            },
            errors,
        )
    }

    pub fn on_event(&mut self, event: BarEvent) {
        match self.engines.get_mut(&event.symbol) {
            Some(engine) => engine.on_bar(event.bar),
            None => {
                if self.unknown_events == 0 {
                    warn!("bar for untracked symbol {}, ignoring", event.symbol);
                }
                self.unknown_events += 1;
            }
        }
    }

    /// Session over: collect every engine's log in symbol order.
    pub fn finish(self) -> (DecisionLog, ReplaySummary) {
        let mut log = DecisionLog::new();
        let mut summary = ReplaySummary::default();
        for (_, engine) in self.engines {
            let counts = engine.counts();
            let (entries, _) = engine.into_log();
            log.extend(entries);
            summary.symbols += 1;
            summary.bars += counts.bars;
            summary.attempts += counts.attempts;
            summary.entered += counts.entered;
            summary.blocked += counts.blocked;
        }
        (log, summary)
    }
}

/// Drain the feed until it closes, then write the decision log once.
pub async fn run_live(
    mut events: mpsc::Receiver<BarEvent>,
    specs: Vec<PivotSpec>,
    config: &EngineConfig,
    log_out: &Path,
) -> anyhow::Result<ReplaySummary> {
    let (mut runner, skipped) = LiveRunner::new(specs, config);
    info!(
        "live session started for {} symbols ({} skipped)",
        runner.engines.len(),
        skipped.len()
    );

    while let Some(event) = events.recv().await {
        runner.on_event(event);
    }

    let (log, mut summary) = runner.finish();
    summary.skipped = skipped.len();
    log.write_json_lines(log_out)
        .with_context(|| format!("failed to write decision log {:?}", log_out))?;
    info!("live session ended, {} decisions logged", log.entries().len());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bars::test_support::bar_at;
    use crate::replay::replay_sessions;

    fn spec(symbol: &str) -> PivotSpec {
        PivotSpec {
            symbol: symbol.to_string(),
            resistance: 100.0,
            support: 98.0,
            target1: 103.0,
            target2: 105.0,
            target3: 107.0,
        }
    }

    fn session_bars() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..20)
            .map(|i| bar_at(i, 99.2, 99.9, 99.1, 99.7, 1000))
            .collect();
        bars.push(bar_at(20, 99.7, 100.4, 99.6, 100.2, 1200));
        bars.push(bar_at(21, 100.2, 101.2, 100.1, 101.1, 2200));
        bars
    }

    #[test]
    fn test_live_log_matches_replay_log() {
        let config = EngineConfig::default();
        let bars = session_bars();

        let (mut runner, _) = LiveRunner::new(vec![spec("TEST")], &config);
        for bar in &bars {
            runner.on_event(BarEvent {
                symbol: "TEST".to_string(),
                bar: bar.clone(),
            });
        }
        let (live_log, live_summary) = runner.finish();

        let (replay_log, replay_summary, _) =
            replay_sessions(vec![(spec("TEST"), bars)], &config);

        assert_eq!(
            live_log.to_json_lines().unwrap(),
            replay_log.to_json_lines().unwrap()
        );
        assert_eq!(live_summary.entered, replay_summary.entered);
    }

    #[test]
    fn test_unknown_symbol_is_ignored() {
        let (mut runner, _) = LiveRunner::new(vec![spec("TEST")], &EngineConfig::default());
        runner.on_event(BarEvent {
            symbol: "OTHER".to_string(),
            bar: bar_at(0, 100.0, 101.0, 99.0, 100.5, 1000),
        });
        assert_eq!(runner.unknown_events, 1);
        let (log, summary) = runner.finish();
        assert!(log.entries().is_empty());
        assert_eq!(summary.symbols, 1);
    }

    #[tokio::test]
    async fn test_channel_feed_drains_to_log() {
        let (tx, rx) = mpsc::channel(64);
        let bars = session_bars();
        let sender = tokio::spawn(async move {
            for bar in bars {
                tx.send(BarEvent {
                    symbol: "TEST".to_string(),
                    bar,
                })
                .await
                .unwrap();
            }
        });

        let dir = std::env::temp_dir().join("pivot-breakout-test-live");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("decisions.jsonl");
        let summary = run_live(rx, vec![spec("TEST")], &EngineConfig::default(), &path)
            .await
            .unwrap();
        sender.await.unwrap();

        assert_eq!(summary.entered, 1);
        let log = DecisionLog::read_json_lines(&path).unwrap();
        assert!(log.entries().iter().any(|e| e.decision.is_entry()));
        std::fs::remove_file(&path).ok();
    }
}
