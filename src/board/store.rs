//! Task records and the board column state machine.
//!
//! The store owns every [`Task`] and is the only place column transitions
//! are applied. All checks run before any field is written, so a returned
//! error means the task is untouched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{self, Caller, Role};
use crate::board::models::{NewTask, Task, TaskColumn, TaskState};
use crate::errors::{BoardError, Result};

/// Partial update for task metadata. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<crate::board::models::Priority>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub acceptance_criteria: Option<crate::board::models::AcceptanceCriteria>,
}

/// In-memory owner of all task records.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<String, Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from snapshot records.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| BoardError::TaskNotFound { id: id.to_string() })
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| BoardError::TaskNotFound { id: id.to_string() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// All tasks, oldest first. Stable output for views and snapshots.
    pub fn all(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Tasks currently in the given column, oldest first.
    pub fn in_column(&self, column: TaskColumn) -> Vec<&Task> {
        self.all()
            .into_iter()
            .filter(|t| t.column() == column)
            .collect()
    }

    /// Validate and insert a new task. Returns the generated id.
    pub fn create(&mut self, new: NewTask, now: DateTime<Utc>) -> Result<String> {
        if new.title.trim().is_empty() {
            return Err(BoardError::Validation("task title must not be empty".into()));
        }
        if new.max_iterations == 0 {
            return Err(BoardError::Validation(
                "max_iterations must be at least 1".into(),
            ));
        }
        let task = Task::create(new, now);
        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        Ok(id)
    }

    /// Apply a metadata update.
    pub fn update(
        &mut self,
        caller: &Caller,
        id: &str,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(BoardError::Validation("task title must not be empty".into()));
            }
        }
        if update.max_iterations == Some(0) {
            return Err(BoardError::Validation(
                "max_iterations must be at least 1".into(),
            ));
        }
        let task = self.get(id)?;
        auth::ensure_can_mutate(caller, task)?;

        let task = self.get_mut(id)?;
        if let Some(title) = update.title {
            task.title = title;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(max_iterations) = update.max_iterations {
            task.max_iterations = max_iterations;
        }
        if let Some(criteria) = update.acceptance_criteria {
            task.acceptance_criteria = Some(criteria);
        }
        task.touch(now);
        Ok(())
    }

    /// Assign or release a task.
    ///
    /// Privileged callers assign freely. A worker may claim an unassigned
    /// task for itself or release its own; anything else is forbidden.
    pub fn assign(
        &mut self,
        caller: &Caller,
        id: &str,
        assignee: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let task = self.get(id)?;
        match caller.role {
            Role::Privileged => {}
            Role::Reviewer => {
                return Err(BoardError::Forbidden(
                    "reviewers may not assign tasks".into(),
                ));
            }
            Role::Worker => {
                let agent = caller.agent_id().ok_or_else(|| {
                    BoardError::Forbidden("worker caller is missing an agent id".into())
                })?;
                let claiming_free = task.assignee.is_none() && assignee == Some(agent);
                let releasing_own = task.assignee.as_deref() == Some(agent) && assignee.is_none();
                if !claiming_free && !releasing_own {
                    return Err(BoardError::Forbidden(format!(
                        "agent {} may only claim an unassigned task or release its own",
                        agent
                    )));
                }
            }
        }
        let task = self.get_mut(id)?;
        task.assignee = assignee.map(String::from);
        task.touch(now);
        Ok(())
    }

    /// Move a task to another column.
    ///
    /// A worker moving to `done` lands in `AwaitingReview`; a privileged
    /// move to `done` completes the task outright. Moving out of `done`
    /// clears the pending-QA state by construction.
    pub fn move_task(
        &mut self,
        caller: &Caller,
        id: &str,
        to: TaskColumn,
        now: DateTime<Utc>,
    ) -> Result<TaskState> {
        let task = self.get(id)?;
        auth::ensure_can_mutate(caller, task)?;

        let from = task.column();
        if from == to {
            return Err(BoardError::InvalidTransition(format!(
                "task {} is already in {}",
                id, to
            )));
        }
        if !auth::legal_move(from, to) {
            return Err(BoardError::InvalidTransition(format!(
                "task {} may not move from {} to {}",
                id, from, to
            )));
        }

        let next = match to {
            TaskColumn::Backlog => TaskState::Backlog,
            TaskColumn::InProgress => TaskState::InProgress,
            TaskColumn::Blocked => TaskState::Blocked,
            TaskColumn::Done => {
                if caller.role == Role::Privileged {
                    TaskState::Done
                } else {
                    TaskState::AwaitingReview
                }
            }
        };

        let task = self.get_mut(id)?;
        task.state = next;
        if next == TaskState::AwaitingReview {
            task.qa_feedback = None;
        }
        task.touch(now);
        Ok(next)
    }

    /// Remove a task, detaching its dependency edges from both sides.
    /// Sprint membership pruning is the board facade's job.
    pub fn remove(&mut self, id: &str) -> Result<Task> {
        let task = self
            .tasks
            .remove(id)
            .ok_or_else(|| BoardError::TaskNotFound { id: id.to_string() })?;
        for dep in &task.depends_on {
            if let Some(other) = self.tasks.get_mut(dep) {
                other.blocks.remove(id);
            }
        }
        for blocked in &task.blocks {
            if let Some(other) = self.tasks.get_mut(blocked) {
                other.depends_on.remove(id);
            }
        }
        Ok(task)
    }

    /// Snapshot view of all tasks, oldest first.
    pub fn to_records(&self) -> Vec<Task> {
        self.all().into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::Priority;

    fn store_with_task(assignee: Option<&str>) -> (TaskStore, String) {
        let mut store = TaskStore::new();
        let id = store
            .create(
                NewTask {
                    title: "implement codec".into(),
                    assignee: assignee.map(String::from),
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap();
        (store, id)
    }

    #[test]
    fn create_rejects_empty_title() {
        let mut store = TaskStore::new();
        let err = store
            .create(
                NewTask {
                    title: "   ".into(),
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn create_rejects_zero_iteration_budget() {
        let mut store = TaskStore::new();
        let err = store
            .create(
                NewTask {
                    title: "t".into(),
                    max_iterations: 0,
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
    }

    #[test]
    fn worker_path_to_done_awaits_review() {
        let (mut store, id) = store_with_task(Some("agent-1"));
        let caller = Caller::worker("agent-1");
        store
            .move_task(&caller, &id, TaskColumn::InProgress, Utc::now())
            .unwrap();
        let state = store
            .move_task(&caller, &id, TaskColumn::Done, Utc::now())
            .unwrap();
        assert_eq!(state, TaskState::AwaitingReview);
        let task = store.get(&id).unwrap();
        assert!(task.pending_qa());
        assert_eq!(task.column(), TaskColumn::Done);
        assert!(task.qa_feedback.is_none());
    }

    #[test]
    fn privileged_move_to_done_completes_directly() {
        let (mut store, id) = store_with_task(None);
        let caller = Caller::privileged();
        store
            .move_task(&caller, &id, TaskColumn::InProgress, Utc::now())
            .unwrap();
        let state = store
            .move_task(&caller, &id, TaskColumn::Done, Utc::now())
            .unwrap();
        assert_eq!(state, TaskState::Done);
        assert!(!store.get(&id).unwrap().pending_qa());
    }

    #[test]
    fn moving_out_of_done_clears_pending_qa() {
        let (mut store, id) = store_with_task(Some("agent-1"));
        let worker = Caller::worker("agent-1");
        store
            .move_task(&worker, &id, TaskColumn::InProgress, Utc::now())
            .unwrap();
        store
            .move_task(&worker, &id, TaskColumn::Done, Utc::now())
            .unwrap();
        assert!(store.get(&id).unwrap().pending_qa());

        store
            .move_task(&worker, &id, TaskColumn::InProgress, Utc::now())
            .unwrap();
        let task = store.get(&id).unwrap();
        assert!(!task.pending_qa());
        assert_eq!(task.state, TaskState::InProgress);
    }

    #[test]
    fn no_op_move_is_invalid() {
        let (mut store, id) = store_with_task(None);
        let err = store
            .move_task(&Caller::privileged(), &id, TaskColumn::Backlog, Utc::now())
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition(_)));
    }

    #[test]
    fn illegal_move_is_rejected_without_mutation() {
        let (mut store, id) = store_with_task(None);
        let before = store.get(&id).unwrap().clone();
        let err = store
            .move_task(&Caller::privileged(), &id, TaskColumn::Done, Utc::now())
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition(_)));
        assert_eq!(store.get(&id).unwrap(), &before);
    }

    #[test]
    fn wrong_worker_cannot_move() {
        let (mut store, id) = store_with_task(Some("agent-1"));
        let err = store
            .move_task(
                &Caller::worker("agent-2"),
                &id,
                TaskColumn::InProgress,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, BoardError::Forbidden(_)));
    }

    #[test]
    fn worker_claims_unassigned_and_releases_own() {
        let (mut store, id) = store_with_task(None);
        let caller = Caller::worker("agent-1");
        store
            .assign(&caller, &id, Some("agent-1"), Utc::now())
            .unwrap();
        assert_eq!(store.get(&id).unwrap().assignee.as_deref(), Some("agent-1"));

        // Cannot hand a claimed task to someone else.
        let err = store
            .assign(&caller, &id, Some("agent-2"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, BoardError::Forbidden(_)));

        store.assign(&caller, &id, None, Utc::now()).unwrap();
        assert!(store.get(&id).unwrap().assignee.is_none());
    }

    #[test]
    fn update_edits_only_provided_fields() {
        let (mut store, id) = store_with_task(None);
        store
            .update(
                &Caller::privileged(),
                &id,
                TaskUpdate {
                    priority: Some(Priority::Critical),
                    ..TaskUpdate::default()
                },
                Utc::now(),
            )
            .unwrap();
        let task = store.get(&id).unwrap();
        assert_eq!(task.priority, Priority::Critical);
        assert_eq!(task.title, "implement codec");
    }

    #[test]
    fn remove_detaches_edges_on_both_sides() {
        let mut store = TaskStore::new();
        let now = Utc::now();
        let a = store
            .create(
                NewTask {
                    title: "a".into(),
                    ..NewTask::default()
                },
                now,
            )
            .unwrap();
        let b = store
            .create(
                NewTask {
                    title: "b".into(),
                    ..NewTask::default()
                },
                now,
            )
            .unwrap();
        crate::board::graph::add_dependency(&mut store, &a, &b, now).unwrap();

        store.remove(&b).unwrap();
        assert!(store.get(&a).unwrap().depends_on.is_empty());
    }

    #[test]
    fn in_column_filters() {
        let (mut store, id) = store_with_task(None);
        store
            .create(
                NewTask {
                    title: "second".into(),
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap();
        store
            .move_task(&Caller::privileged(), &id, TaskColumn::InProgress, Utc::now())
            .unwrap();
        assert_eq!(store.in_column(TaskColumn::Backlog).len(), 1);
        assert_eq!(store.in_column(TaskColumn::InProgress).len(), 1);
    }
}
