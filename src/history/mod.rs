//! Inspection history persistence.

pub mod store;
pub mod types;

pub use store::InspectionHistory;
pub use types::*;
