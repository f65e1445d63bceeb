//! Task records, the board column state machine, the dependency graph, and
//! the per-task iteration ledger.
//!
//! | Submodule   | What it owns                                          |
//! |-------------|-------------------------------------------------------|
//! | `models`    | `Task` and its closed vocabularies                    |
//! | `store`     | task CRUD and column transitions                      |
//! | `graph`     | `depends_on`/`blocks` edges with cycle detection      |
//! | `iteration` | attempt ledger: start/submit/approve/reject           |

pub mod graph;
pub mod iteration;
pub mod models;
pub mod store;

pub use iteration::RejectionOutcome;
pub use models::{
    AcceptanceCriteria, FeedbackSeverity, IterationLogEntry, IterationOutcome, NewTask, Priority,
    Task, TaskColumn, TaskState,
};
pub use store::{TaskStore, TaskUpdate};
