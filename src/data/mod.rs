//! Data inputs: bar history and scanner pivot specs.

pub mod bars;
pub mod pivots;

pub use bars::{load_session_bars, Bar, SessionBars};
pub use pivots::{load_pivot_specs, PivotSpec, Side};
