//! Caller roles and the centralized authorization policy.
//!
//! Every mutating operation carries a [`Caller`]. The policy rules live here
//! rather than at individual call sites:
//! - workers may only mutate tasks assigned to themselves
//! - only reviewers may approve or reject submitted work
//! - sprint administration, task deletion, and direct lesson/convention
//!   writes require the privileged role

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::board::models::{Task, TaskColumn};
use crate::errors::{BoardError, Result};

/// Closed set of caller roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access: sprint administration, deletion, forced completion.
    Privileged,
    /// An automated agent; limited to tasks assigned to it.
    Worker,
    /// QA; approves and rejects submitted iterations.
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Privileged => "privileged",
            Self::Worker => "worker",
            Self::Reviewer => "reviewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "privileged" => Ok(Self::Privileged),
            "worker" => Ok(Self::Worker),
            "reviewer" => Ok(Self::Reviewer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Identity attached to a mutating call.
///
/// Worker callers carry the agent id they act as. The board does not
/// authenticate identities, it only checks the assignment match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub role: Role,
    pub agent: Option<String>,
}

impl Caller {
    pub fn privileged() -> Self {
        Self {
            role: Role::Privileged,
            agent: None,
        }
    }

    pub fn worker(agent: &str) -> Self {
        Self {
            role: Role::Worker,
            agent: Some(agent.to_string()),
        }
    }

    pub fn reviewer() -> Self {
        Self {
            role: Role::Reviewer,
            agent: None,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent.as_deref()
    }
}

/// Column moves the state machine permits, independent of role.
///
/// `backlog -> in_progress`, `in_progress <-> blocked`,
/// `in_progress -> done`, and rework moves out of `done`.
pub fn legal_move(from: TaskColumn, to: TaskColumn) -> bool {
    use TaskColumn::*;
    matches!(
        (from, to),
        (Backlog, InProgress)
            | (InProgress, Blocked)
            | (Blocked, InProgress)
            | (InProgress, Done)
            | (Done, InProgress)
            | (Done, Backlog)
    )
}

/// Check that `caller` may mutate `task` (moves, iteration work, edits).
pub fn ensure_can_mutate(caller: &Caller, task: &Task) -> Result<()> {
    match caller.role {
        Role::Privileged => Ok(()),
        Role::Reviewer => Err(BoardError::Forbidden(
            "reviewers act through approve/reject, not direct task mutation".into(),
        )),
        Role::Worker => {
            let agent = caller.agent_id().ok_or_else(|| {
                BoardError::Forbidden("worker caller is missing an agent id".into())
            })?;
            if task.assignee.as_deref() == Some(agent) {
                Ok(())
            } else {
                Err(BoardError::Forbidden(format!(
                    "task {} is not assigned to agent {}",
                    task.id, agent
                )))
            }
        }
    }
}

/// Check that `caller` may approve or reject submitted work.
pub fn ensure_reviewer(caller: &Caller) -> Result<()> {
    if caller.role == Role::Reviewer {
        Ok(())
    } else {
        Err(BoardError::Forbidden(format!(
            "role {} may not approve or reject work",
            caller.role
        )))
    }
}

/// Check that `caller` holds the privileged role.
pub fn ensure_privileged(caller: &Caller) -> Result<()> {
    if caller.role == Role::Privileged {
        Ok(())
    } else {
        Err(BoardError::Forbidden(format!(
            "role {} may not perform this operation",
            caller.role
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{NewTask, Task};
    use chrono::Utc;

    fn task_assigned_to(agent: Option<&str>) -> Task {
        let mut task = Task::create(
            NewTask {
                title: "write parser".into(),
                ..NewTask::default()
            },
            Utc::now(),
        );
        task.assignee = agent.map(String::from);
        task
    }

    #[test]
    fn role_roundtrip() {
        for s in &["privileged", "worker", "reviewer"] {
            let parsed: Role = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("architect".parse::<Role>().is_err());
    }

    #[test]
    fn worker_may_mutate_own_task_only() {
        let task = task_assigned_to(Some("agent-1"));
        assert!(ensure_can_mutate(&Caller::worker("agent-1"), &task).is_ok());
        assert!(matches!(
            ensure_can_mutate(&Caller::worker("agent-2"), &task),
            Err(BoardError::Forbidden(_))
        ));
    }

    #[test]
    fn worker_may_not_mutate_unassigned_task() {
        let task = task_assigned_to(None);
        assert!(matches!(
            ensure_can_mutate(&Caller::worker("agent-1"), &task),
            Err(BoardError::Forbidden(_))
        ));
    }

    #[test]
    fn reviewer_may_not_mutate_directly() {
        let task = task_assigned_to(Some("agent-1"));
        assert!(matches!(
            ensure_can_mutate(&Caller::reviewer(), &task),
            Err(BoardError::Forbidden(_))
        ));
    }

    #[test]
    fn privileged_may_mutate_anything() {
        let task = task_assigned_to(None);
        assert!(ensure_can_mutate(&Caller::privileged(), &task).is_ok());
    }

    #[test]
    fn only_reviewer_reviews() {
        assert!(ensure_reviewer(&Caller::reviewer()).is_ok());
        assert!(ensure_reviewer(&Caller::privileged()).is_err());
        assert!(ensure_reviewer(&Caller::worker("a")).is_err());
    }

    #[test]
    fn legal_moves_follow_the_state_machine() {
        use TaskColumn::*;
        assert!(legal_move(Backlog, InProgress));
        assert!(legal_move(InProgress, Blocked));
        assert!(legal_move(Blocked, InProgress));
        assert!(legal_move(InProgress, Done));
        assert!(legal_move(Done, InProgress));
        assert!(legal_move(Done, Backlog));

        assert!(!legal_move(Backlog, Done));
        assert!(!legal_move(Backlog, Blocked));
        assert!(!legal_move(Blocked, Done));
        assert!(!legal_move(Blocked, Backlog));
    }
}
