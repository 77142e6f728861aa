//! Device state tracking.

pub mod snapshot;
pub mod status;

pub use snapshot::{ConnectionState, RemainingTime, StateSnapshot, StatusField};
pub use status::{PrintStage, PrintStatus};
