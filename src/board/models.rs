//! Task records and the closed vocabularies they are built from.
//!
//! The task lifecycle is one exhaustive enum, [`TaskState`]. The four-column
//! board view and the pending-QA flag are derived from it, so the invariant
//! "pending QA implies column done" cannot be violated by construction.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Lifecycle state of a task.
///
/// `AwaitingReview` is work a worker declared done that QA has not yet
/// approved; on the column view it sits in `done` with pending QA set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Backlog,
    InProgress,
    Blocked,
    AwaitingReview,
    Done,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::AwaitingReview => "awaiting_review",
            Self::Done => "done",
        }
    }

    /// The board column this state renders into.
    pub fn column(&self) -> TaskColumn {
        match self {
            Self::Backlog => TaskColumn::Backlog,
            Self::InProgress => TaskColumn::InProgress,
            Self::Blocked => TaskColumn::Blocked,
            Self::AwaitingReview | Self::Done => TaskColumn::Done,
        }
    }

    /// True while the task sits in `done` awaiting QA.
    pub fn pending_qa(&self) -> bool {
        matches!(self, Self::AwaitingReview)
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "awaiting_review" => Ok(Self::AwaitingReview),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid task state: {}", s)),
        }
    }
}

/// One of the four board columns a caller can move a task to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskColumn {
    Backlog,
    InProgress,
    Blocked,
    Done,
}

impl TaskColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid column: {}", s)),
        }
    }
}

/// Severity attached to QA rejection feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSeverity {
    Minor,
    #[default]
    Major,
    Critical,
}

impl FeedbackSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for FeedbackSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minor" => Ok(Self::Minor),
            "major" => Ok(Self::Major),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid feedback severity: {}", s)),
        }
    }
}

/// Outcome of one attempt in the iteration ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    InProgress,
    Submitted,
    Approved,
    Rejected,
}

impl IterationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Approved and rejected entries are closed; nothing transitions out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// What "done" means for a task or sprint: a description, an ordered
/// checklist, and optionally a command that verifies it mechanically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    pub description: String,
    #[serde(default)]
    pub verification_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_command: Option<String>,
}

/// One attempt cycle recorded in a task's ledger.
///
/// Created by starting an iteration; transitions
/// `in_progress -> submitted -> approved | rejected`. A rejection closes the
/// entry and the task's iteration counter advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationLogEntry {
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: IterationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_severity: Option<FeedbackSeverity>,
}

impl IterationLogEntry {
    pub fn open(iteration: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            iteration,
            started_at,
            completed_at: None,
            outcome: IterationOutcome::InProgress,
            notes: None,
            files_changed: Vec::new(),
            feedback: None,
            feedback_category: None,
            feedback_severity: None,
        }
    }
}

/// Parameters for creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default = "NewTask::default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub acceptance_criteria: Option<AcceptanceCriteria>,
}

impl NewTask {
    fn default_max_iterations() -> u32 {
        3
    }
}

impl Default for NewTask {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            priority: Priority::default(),
            assignee: None,
            max_iterations: Self::default_max_iterations(),
            acceptance_criteria: None,
        }
    }
}

/// A work item on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub state: TaskState,
    pub assignee: Option<String>,
    /// Tasks this one waits on. Kept symmetric with `blocks`.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Tasks waiting on this one.
    #[serde(default)]
    pub blocks: BTreeSet<String>,
    /// Most recent QA rejection feedback, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_feedback: Option<String>,
    /// Current attempt number, starting at 1. Only rejection advances it.
    pub iteration: u32,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<AcceptanceCriteria>,
    #[serde(default)]
    pub iteration_log: Vec<IterationLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a task record from creation parameters. Schema validation is
    /// the store's job; this only fills in the fields.
    pub fn create(new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            priority: new.priority,
            state: TaskState::Backlog,
            assignee: new.assignee,
            depends_on: BTreeSet::new(),
            blocks: BTreeSet::new(),
            qa_feedback: None,
            iteration: 1,
            max_iterations: new.max_iterations,
            acceptance_criteria: new.acceptance_criteria,
            iteration_log: Vec::new(),
            sprint_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn column(&self) -> TaskColumn {
        self.state.column()
    }

    pub fn pending_qa(&self) -> bool {
        self.state.pending_qa()
    }

    /// The ledger entry currently open (not approved or rejected), if any.
    pub fn active_entry(&self) -> Option<&IterationLogEntry> {
        self.iteration_log
            .iter()
            .rev()
            .find(|e| !e.outcome.is_terminal())
    }

    pub(crate) fn active_entry_mut(&mut self) -> Option<&mut IterationLogEntry> {
        self.iteration_log
            .iter_mut()
            .rev()
            .find(|e| !e.outcome.is_terminal())
    }

    /// A task whose attempt count passed its budget without reaching `done`.
    pub fn escalated(&self) -> bool {
        self.iteration > self.max_iterations && self.column() != TaskColumn::Done
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
