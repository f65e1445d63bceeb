//! Sprint records and their lifecycle.

pub mod controller;
pub mod models;

pub use controller::{SprintAdvance, SprintController};
pub use models::{NewSprint, Sprint, SprintIterationRecord, SprintStatus};
