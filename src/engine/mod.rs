//! Entry decision engine: CVD proxy, filter pipeline, attempt tracking, the
//! per-attempt state machine, and the per-symbol session driver that feeds
//! them. Everything here is deterministic in the bar sequence; live and
//! replay share every code path below this module.

pub mod attempts;
pub mod cvd;
pub mod decision_log;
pub mod filters;
pub mod session;
pub mod state_machine;
pub mod stops;

pub use decision_log::{Decision, DecisionLog, DecisionLogEntry};
pub use session::{run_session, EngineConfig, SessionEngine};
pub use state_machine::MachineState;
