//! Sprint records and their closed vocabularies.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::board::models::AcceptanceCriteria;

/// Sprint lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    #[default]
    Planning,
    Executing,
    Reviewing,
    Complete,
    Failed,
}

impl SprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Reviewing => "reviewing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SprintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "executing" => Ok(Self::Executing),
            "reviewing" => Ok(Self::Reviewing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid sprint status: {}", s)),
        }
    }
}

/// One execution round of a sprint, closed when the review loops back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintIterationRecord {
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub tasks_completed: u32,
    pub tasks_rejected: u32,
    #[serde(default)]
    pub lessons_learned: Vec<String>,
}

impl SprintIterationRecord {
    pub fn open(iteration: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            iteration,
            started_at,
            completed_at: None,
            tasks_completed: 0,
            tasks_rejected: 0,
            lessons_learned: Vec::new(),
        }
    }
}

/// Parameters for creating a sprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSprint {
    pub goal: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub success_criteria: Option<AcceptanceCriteria>,
    #[serde(default = "NewSprint::default_max_iterations")]
    pub max_iterations: u32,
}

impl NewSprint {
    fn default_max_iterations() -> u32 {
        3
    }
}

impl Default for NewSprint {
    fn default() -> Self {
        Self {
            goal: String::new(),
            description: String::new(),
            success_criteria: None,
            max_iterations: Self::default_max_iterations(),
        }
    }
}

/// A goal-scoped, iteration-bounded collection of tasks.
///
/// A sprint holds task ids only, never task records; tasks carry the
/// back-reference in `sprint_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    pub goal: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<AcceptanceCriteria>,
    pub status: SprintStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub iteration_history: Vec<SprintIterationRecord>,
    /// Reason recorded when completion was forced by a privileged caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sprint {
    pub fn create(new: NewSprint, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: new.goal,
            description: new.description,
            success_criteria: new.success_criteria,
            status: SprintStatus::Planning,
            current_iteration: 1,
            max_iterations: new.max_iterations,
            task_ids: Vec::new(),
            iteration_history: Vec::new(),
            completion_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The history entry still open (not yet stamped complete), if any.
    pub(crate) fn open_record_mut(&mut self) -> Option<&mut SprintIterationRecord> {
        self.iteration_history
            .iter_mut()
            .rev()
            .find(|r| r.completed_at.is_none())
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
