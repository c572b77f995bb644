// Library crate - pivot breakout decision engine and its hindsight validator

pub mod data;
pub mod engine;
pub mod errors;
pub mod live;
pub mod replay;
pub mod validate;

// Re-export the types most callers need
pub use data::bars::{Bar, SessionBars};
pub use data::pivots::{PivotSpec, Side};
pub use engine::{Decision, DecisionLog, DecisionLogEntry, EngineConfig, SessionEngine};
pub use errors::PipelineError;
