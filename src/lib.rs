//! Task and sprint coordination for automated agents with a QA review
//! loop and a feedback-learning store.

pub mod auth;
pub mod board;
pub mod engine;
pub mod errors;
pub mod events;
pub mod health;
pub mod learning;
pub mod snapshot;
pub mod sprint;

pub use auth::{Caller, Role};
pub use board::{
    FeedbackSeverity, NewTask, Priority, Task, TaskColumn, TaskState, TaskUpdate,
};
pub use engine::{Board, BoardService, RejectionRecord};
pub use errors::{BoardError, Result};
pub use events::{BoardEvent, EventKind, Notifier, NullNotifier};
pub use health::{HealthReport, HealthStatus, HealthThresholds};
pub use learning::{AgentContext, PromotionPolicy};
pub use snapshot::{BoardSnapshot, JsonSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use sprint::{NewSprint, Sprint, SprintAdvance, SprintStatus};
