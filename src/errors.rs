//! Typed error hierarchy for the task board.
//!
//! Every failed invariant check surfaces as a [`BoardError`] carrying the
//! offending ids. All variants are local and recoverable: a returned error
//! means the operation left board state unchanged.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BoardError>;

/// Errors returned by board, sprint, and learning operations.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Sprint {id} not found")]
    SprintNotFound { id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Task {task} cannot depend on itself")]
    SelfDependency { task: String },

    #[error("Task {task} already depends on {depends_on}")]
    DuplicateDependency { task: String, depends_on: String },

    #[error("Task {task} does not depend on {depends_on}")]
    DependencyNotFound { task: String, depends_on: String },

    #[error("Dependency of {task} on {depends_on} would create a cycle: {}", .path.join(" -> "))]
    CircularDependency {
        task: String,
        depends_on: String,
        /// Chain of task ids from `depends_on` back to `task`.
        path: Vec<String>,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Sprint {sprint} has incomplete tasks: {}", .task_ids.join(", "))]
    IncompleteTasks {
        sprint: String,
        task_ids: Vec<String>,
    },

    #[error("Sprint {sprint} already failed after exceeding {max_iterations} iterations")]
    MaxIterationsExceeded { sprint: String, max_iterations: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
