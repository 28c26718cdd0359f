//! Core types and traits for the analysis job tracker.
//!
//! Snapshot JSON uses camelCase field names to match the dashboard's REST payloads.

mod snapshot;
mod state;
mod traits;

pub use snapshot::*;
pub use state::*;
pub use traits::*;
