//! The notification collaborator contract.
//!
//! Events are published fire-and-forget after a mutation has been applied
//! and persisted; the board never waits on or retries a publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of board event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskMoved,
    TaskAssigned,
    TaskDeleted,
    DependencyAdded,
    DependencyRemoved,
    IterationStarted,
    IterationSubmitted,
    IterationApproved,
    IterationRejected,
    SprintCreated,
    SprintTaskAdded,
    SprintTaskRemoved,
    SprintStarted,
    SprintReviewStarted,
    SprintAdvanced,
    SprintCompleted,
    SprintFailed,
    LessonRecorded,
    ConventionRecorded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskMoved => "task_moved",
            Self::TaskAssigned => "task_assigned",
            Self::TaskDeleted => "task_deleted",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::IterationStarted => "iteration_started",
            Self::IterationSubmitted => "iteration_submitted",
            Self::IterationApproved => "iteration_approved",
            Self::IterationRejected => "iteration_rejected",
            Self::SprintCreated => "sprint_created",
            Self::SprintTaskAdded => "sprint_task_added",
            Self::SprintTaskRemoved => "sprint_task_removed",
            Self::SprintStarted => "sprint_started",
            Self::SprintReviewStarted => "sprint_review_started",
            Self::SprintAdvanced => "sprint_advanced",
            Self::SprintCompleted => "sprint_completed",
            Self::SprintFailed => "sprint_failed",
            Self::LessonRecorded => "lesson_recorded",
            Self::ConventionRecorded => "convention_recorded",
        }
    }
}

/// A published event with the ids it concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl BoardEvent {
    pub fn new(kind: EventKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            task_id: None,
            sprint_id: None,
            agent: None,
            detail: None,
            occurred_at,
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_sprint(mut self, sprint_id: &str) -> Self {
        self.sprint_id = Some(sprint_id.to_string());
        self
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Observer fan-out seam. Implementations must not block.
pub trait Notifier {
    fn publish(&self, event: &BoardEvent);
}

impl<N: Notifier> Notifier for std::sync::Arc<N> {
    fn publish(&self, event: &BoardEvent) {
        self.as_ref().publish(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn publish(&self, _event: &BoardEvent) {}
}

/// Collects events for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: std::sync::Mutex<Vec<BoardEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BoardEvent> {
        self.events
            .lock()
            .map(|events| events.to_vec())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, event: &BoardEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
