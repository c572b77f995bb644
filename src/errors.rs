//! Typed failures for the decision pipeline.
//!
//! Data and config problems are locally recoverable: the owning symbol is
//! skipped, counted, and surfaced in the final report. A timestamp-match
//! failure means a logged decision has no corresponding raw-bar crossing,
//! which indicates a state machine bug rather than a bad trade; it is
//! escalated to the report's critical section.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Missing or malformed bar history for a symbol. Never treated as "flat".
    #[error("data error for {symbol}: {detail}")]
    Data { symbol: String, detail: String },

    /// Invalid pivot spec (e.g. resistance <= support).
    #[error("config error for {symbol}: {detail}")]
    Config { symbol: String, detail: String },

    /// A terminal logged decision with no raw-bar crossing within tolerance.
    #[error("decision for {symbol} at {timestamp} has no matching raw-bar crossing")]
    TimestampMatch {
        symbol: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineError {
    pub fn symbol(&self) -> &str {
        match self {
            PipelineError::Data { symbol, .. }
            | PipelineError::Config { symbol, .. }
            | PipelineError::TimestampMatch { symbol, .. } => symbol,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, PipelineError::TimestampMatch { .. })
    }
}
