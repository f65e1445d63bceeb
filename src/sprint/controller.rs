//! Sprint lifecycle: planning -> executing -> reviewing -> complete/failed.
//!
//! The review-to-executing loop closes the current iteration record,
//! tallies member-task outcomes, and fails the sprint once the loop would
//! pass its iteration budget. Completion is hard-gated on every member task
//! being done and through QA.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::models::{IterationOutcome, TaskState};
use crate::board::store::TaskStore;
use crate::errors::{BoardError, Result};
use crate::sprint::models::{NewSprint, Sprint, SprintIterationRecord, SprintStatus};

/// Outcome of the `reviewing -> executing` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SprintAdvance {
    /// A new iteration was opened.
    Continued { iteration: u32 },
    /// The next iteration would exceed the budget; the sprint is failed.
    Failed { iteration: u32 },
}

/// In-memory owner of all sprint records.
#[derive(Debug, Default)]
pub struct SprintController {
    sprints: HashMap<String, Sprint>,
}

impl SprintController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sprints(sprints: Vec<Sprint>) -> Self {
        Self {
            sprints: sprints.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sprints.is_empty()
    }

    pub fn get(&self, id: &str) -> Result<&Sprint> {
        self.sprints
            .get(id)
            .ok_or_else(|| BoardError::SprintNotFound { id: id.to_string() })
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Sprint> {
        self.sprints
            .get_mut(id)
            .ok_or_else(|| BoardError::SprintNotFound { id: id.to_string() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sprint> {
        self.sprints.values()
    }

    /// All sprints, oldest first.
    pub fn all(&self) -> Vec<&Sprint> {
        let mut sprints: Vec<&Sprint> = self.sprints.values().collect();
        sprints.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sprints
    }

    pub fn to_records(&self) -> Vec<Sprint> {
        self.all().into_iter().cloned().collect()
    }

    pub fn create(&mut self, new: NewSprint, now: DateTime<Utc>) -> Result<String> {
        if new.goal.trim().is_empty() {
            return Err(BoardError::Validation("sprint goal must not be empty".into()));
        }
        if new.max_iterations == 0 {
            return Err(BoardError::Validation(
                "max_iterations must be at least 1".into(),
            ));
        }
        let sprint = Sprint::create(new, now);
        let id = sprint.id.clone();
        self.sprints.insert(id.clone(), sprint);
        Ok(id)
    }

    /// Add a task id to the sprint's ordered member list.
    pub fn add_task(&mut self, sprint_id: &str, task_id: &str, now: DateTime<Utc>) -> Result<()> {
        let sprint = self.get_mut(sprint_id)?;
        if sprint.status.is_terminal() {
            return Err(BoardError::InvalidTransition(format!(
                "sprint {} is {} and no longer accepts tasks",
                sprint_id, sprint.status
            )));
        }
        if !sprint.task_ids.iter().any(|t| t == task_id) {
            sprint.task_ids.push(task_id.to_string());
            sprint.touch(now);
        }
        Ok(())
    }

    pub fn remove_task(&mut self, sprint_id: &str, task_id: &str, now: DateTime<Utc>) -> Result<()> {
        let sprint = self.get_mut(sprint_id)?;
        sprint.task_ids.retain(|t| t != task_id);
        sprint.touch(now);
        Ok(())
    }

    /// Drop `task_id` from every sprint that references it. Used by the
    /// task-deletion cascade.
    pub fn prune_task(&mut self, task_id: &str, now: DateTime<Utc>) {
        for sprint in self.sprints.values_mut() {
            if sprint.task_ids.iter().any(|t| t == task_id) {
                sprint.task_ids.retain(|t| t != task_id);
                sprint.touch(now);
            }
        }
    }

    /// `planning -> executing`; opens iteration record 1.
    pub fn start(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let sprint = self.get_mut(id)?;
        if sprint.status != SprintStatus::Planning {
            return Err(BoardError::InvalidTransition(format!(
                "sprint {} is {}, expected planning",
                id, sprint.status
            )));
        }
        sprint.status = SprintStatus::Executing;
        sprint.current_iteration = 1;
        sprint
            .iteration_history
            .push(SprintIterationRecord::open(1, now));
        sprint.touch(now);
        Ok(())
    }

    /// `executing -> reviewing`.
    pub fn begin_review(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let sprint = self.get_mut(id)?;
        if sprint.status != SprintStatus::Executing {
            return Err(BoardError::InvalidTransition(format!(
                "sprint {} is {}, expected executing",
                id, sprint.status
            )));
        }
        sprint.status = SprintStatus::Reviewing;
        sprint.touch(now);
        Ok(())
    }

    /// `reviewing -> executing`, or `reviewing -> failed` once the next
    /// iteration would exceed the budget.
    ///
    /// Closes the current iteration record with completed/rejected tallies
    /// from the sprint's current members before deciding.
    pub fn advance(
        &mut self,
        id: &str,
        tasks: &TaskStore,
        now: DateTime<Utc>,
    ) -> Result<SprintAdvance> {
        let sprint = self.get(id)?;
        match sprint.status {
            SprintStatus::Reviewing => {}
            SprintStatus::Failed => {
                return Err(BoardError::MaxIterationsExceeded {
                    sprint: id.to_string(),
                    max_iterations: sprint.max_iterations,
                });
            }
            other => {
                return Err(BoardError::InvalidTransition(format!(
                    "sprint {} is {}, expected reviewing",
                    id, other
                )));
            }
        }

        let (completed, rejected) = tally(sprint, tasks);
        let sprint = self.get_mut(id)?;
        if let Some(record) = sprint.open_record_mut() {
            record.completed_at = Some(now);
            record.tasks_completed = completed;
            record.tasks_rejected = rejected;
        }

        let next = sprint.current_iteration + 1;
        if next > sprint.max_iterations {
            sprint.status = SprintStatus::Failed;
            sprint.touch(now);
            return Ok(SprintAdvance::Failed {
                iteration: sprint.current_iteration,
            });
        }
        sprint.current_iteration = next;
        sprint.status = SprintStatus::Executing;
        sprint
            .iteration_history
            .push(SprintIterationRecord::open(next, now));
        sprint.touch(now);
        Ok(SprintAdvance::Continued { iteration: next })
    }

    /// Mark the sprint complete. Fails with the offending ids unless every
    /// member task is done and through QA.
    pub fn complete(&mut self, id: &str, tasks: &TaskStore, now: DateTime<Utc>) -> Result<()> {
        let sprint = self.get(id)?;
        if sprint.status.is_terminal() {
            return Err(BoardError::InvalidTransition(format!(
                "sprint {} is already {}",
                id, sprint.status
            )));
        }
        let incomplete: Vec<String> = sprint
            .task_ids
            .iter()
            .filter(|tid| {
                tasks
                    .get(tid)
                    .map(|t| t.state != TaskState::Done)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !incomplete.is_empty() {
            return Err(BoardError::IncompleteTasks {
                sprint: id.to_string(),
                task_ids: incomplete,
            });
        }

        let (completed, rejected) = tally(sprint, tasks);
        let sprint = self.get_mut(id)?;
        if let Some(record) = sprint.open_record_mut() {
            record.completed_at = Some(now);
            record.tasks_completed = completed;
            record.tasks_rejected = rejected;
        }
        sprint.status = SprintStatus::Complete;
        sprint.touch(now);
        Ok(())
    }

    /// Privileged escape hatch: mark the sprint complete regardless of task
    /// state, recording the reason. Returns the member ids for the caller
    /// to stamp done.
    pub fn force_complete(
        &mut self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let sprint = self.get_mut(id)?;
        if sprint.status.is_terminal() {
            return Err(BoardError::InvalidTransition(format!(
                "sprint {} is already {}",
                id, sprint.status
            )));
        }
        if let Some(record) = sprint.open_record_mut() {
            record.completed_at = Some(now);
        }
        sprint.status = SprintStatus::Complete;
        sprint.completion_note = Some(reason.to_string());
        sprint.touch(now);
        Ok(sprint.task_ids.clone())
    }

    /// Append a promoted lesson to the sprint's open iteration record.
    pub fn note_lesson(&mut self, id: &str, lesson: &str) {
        if let Some(sprint) = self.sprints.get_mut(id) {
            if let Some(record) = sprint.open_record_mut() {
                record.lessons_learned.push(lesson.to_string());
            }
        }
    }
}

/// Count member tasks that are done, and those whose latest ledger entry
/// was rejected. Deleted members are skipped.
fn tally(sprint: &Sprint, tasks: &TaskStore) -> (u32, u32) {
    let mut completed = 0;
    let mut rejected = 0;
    for tid in &sprint.task_ids {
        let Ok(task) = tasks.get(tid) else { continue };
        if task.state == TaskState::Done {
            completed += 1;
        }
        if task
            .iteration_log
            .last()
            .is_some_and(|e| e.outcome == IterationOutcome::Rejected)
        {
            rejected += 1;
        }
    }
    (completed, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Caller;
    use crate::board::models::{NewTask, TaskColumn};

    fn controller_with_sprint(max_iterations: u32) -> (SprintController, String) {
        let mut ctl = SprintController::new();
        let id = ctl
            .create(
                NewSprint {
                    goal: "stabilize the release".into(),
                    max_iterations,
                    ..NewSprint::default()
                },
                Utc::now(),
            )
            .unwrap();
        (ctl, id)
    }

    fn store_with_done_task() -> (TaskStore, String) {
        let mut store = TaskStore::new();
        let id = store
            .create(
                NewTask {
                    title: "member".into(),
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap();
        let caller = Caller::privileged();
        store
            .move_task(&caller, &id, TaskColumn::InProgress, Utc::now())
            .unwrap();
        store
            .move_task(&caller, &id, TaskColumn::Done, Utc::now())
            .unwrap();
        (store, id)
    }

    #[test]
    fn create_validates_goal_and_budget() {
        let mut ctl = SprintController::new();
        assert!(matches!(
            ctl.create(NewSprint::default(), Utc::now()),
            Err(BoardError::Validation(_))
        ));
        assert!(matches!(
            ctl.create(
                NewSprint {
                    goal: "g".into(),
                    max_iterations: 0,
                    ..NewSprint::default()
                },
                Utc::now()
            ),
            Err(BoardError::Validation(_))
        ));
    }

    #[test]
    fn lifecycle_happy_path() {
        let (mut ctl, id) = controller_with_sprint(3);
        ctl.start(&id, Utc::now()).unwrap();
        assert_eq!(ctl.get(&id).unwrap().status, SprintStatus::Executing);
        assert_eq!(ctl.get(&id).unwrap().iteration_history.len(), 1);

        ctl.begin_review(&id, Utc::now()).unwrap();
        assert_eq!(ctl.get(&id).unwrap().status, SprintStatus::Reviewing);

        let tasks = TaskStore::new();
        let advance = ctl.advance(&id, &tasks, Utc::now()).unwrap();
        assert_eq!(advance, SprintAdvance::Continued { iteration: 2 });
        let sprint = ctl.get(&id).unwrap();
        assert_eq!(sprint.status, SprintStatus::Executing);
        assert_eq!(sprint.current_iteration, 2);
        assert_eq!(sprint.iteration_history.len(), 2);
        assert!(sprint.iteration_history[0].completed_at.is_some());
    }

    #[test]
    fn advance_past_budget_fails_the_sprint() {
        let (mut ctl, id) = controller_with_sprint(1);
        ctl.start(&id, Utc::now()).unwrap();
        ctl.begin_review(&id, Utc::now()).unwrap();

        let tasks = TaskStore::new();
        let advance = ctl.advance(&id, &tasks, Utc::now()).unwrap();
        assert_eq!(advance, SprintAdvance::Failed { iteration: 1 });
        assert_eq!(ctl.get(&id).unwrap().status, SprintStatus::Failed);

        // A second attempt reports the exceeded budget.
        let err = ctl.advance(&id, &tasks, Utc::now()).unwrap_err();
        assert!(matches!(err, BoardError::MaxIterationsExceeded { .. }));
    }

    #[test]
    fn advance_requires_reviewing() {
        let (mut ctl, id) = controller_with_sprint(3);
        let tasks = TaskStore::new();
        let err = ctl.advance(&id, &tasks, Utc::now()).unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition(_)));
    }

    #[test]
    fn advance_tallies_member_outcomes() {
        let (mut ctl, id) = controller_with_sprint(3);
        let (tasks, task_id) = store_with_done_task();
        ctl.add_task(&id, &task_id, Utc::now()).unwrap();
        ctl.start(&id, Utc::now()).unwrap();
        ctl.begin_review(&id, Utc::now()).unwrap();
        ctl.advance(&id, &tasks, Utc::now()).unwrap();

        let record = &ctl.get(&id).unwrap().iteration_history[0];
        assert_eq!(record.tasks_completed, 1);
        assert_eq!(record.tasks_rejected, 0);
    }

    #[test]
    fn complete_gates_on_member_state() {
        let (mut ctl, id) = controller_with_sprint(3);
        let mut tasks = TaskStore::new();
        let pending = tasks
            .create(
                NewTask {
                    title: "unfinished".into(),
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap();
        ctl.add_task(&id, &pending, Utc::now()).unwrap();
        ctl.start(&id, Utc::now()).unwrap();

        let err = ctl.complete(&id, &tasks, Utc::now()).unwrap_err();
        match err {
            BoardError::IncompleteTasks { task_ids, .. } => {
                assert_eq!(task_ids, vec![pending.clone()]);
            }
            other => panic!("Expected IncompleteTasks, got {:?}", other),
        }
        assert_eq!(ctl.get(&id).unwrap().status, SprintStatus::Executing);

        // Complete the member and the gate opens.
        let caller = Caller::privileged();
        tasks
            .move_task(&caller, &pending, TaskColumn::InProgress, Utc::now())
            .unwrap();
        tasks
            .move_task(&caller, &pending, TaskColumn::Done, Utc::now())
            .unwrap();
        ctl.complete(&id, &tasks, Utc::now()).unwrap();
        assert_eq!(ctl.get(&id).unwrap().status, SprintStatus::Complete);
    }

    #[test]
    fn awaiting_review_blocks_completion() {
        let (mut ctl, id) = controller_with_sprint(3);
        let mut tasks = TaskStore::new();
        let tid = tasks
            .create(
                NewTask {
                    title: "reviewed".into(),
                    assignee: Some("agent-1".into()),
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap();
        let worker = Caller::worker("agent-1");
        tasks
            .move_task(&worker, &tid, TaskColumn::InProgress, Utc::now())
            .unwrap();
        tasks
            .move_task(&worker, &tid, TaskColumn::Done, Utc::now())
            .unwrap();
        assert!(tasks.get(&tid).unwrap().pending_qa());

        ctl.add_task(&id, &tid, Utc::now()).unwrap();
        ctl.start(&id, Utc::now()).unwrap();
        let err = ctl.complete(&id, &tasks, Utc::now()).unwrap_err();
        assert!(matches!(err, BoardError::IncompleteTasks { .. }));
    }

    #[test]
    fn force_complete_records_reason_and_returns_members() {
        let (mut ctl, id) = controller_with_sprint(3);
        ctl.add_task(&id, "t-1", Utc::now()).unwrap();
        ctl.start(&id, Utc::now()).unwrap();

        let members = ctl
            .force_complete(&id, "descoped at release cut", Utc::now())
            .unwrap();
        assert_eq!(members, vec!["t-1".to_string()]);
        let sprint = ctl.get(&id).unwrap();
        assert_eq!(sprint.status, SprintStatus::Complete);
        assert_eq!(
            sprint.completion_note.as_deref(),
            Some("descoped at release cut")
        );
    }

    #[test]
    fn prune_task_drops_membership_everywhere() {
        let (mut ctl, id) = controller_with_sprint(3);
        ctl.add_task(&id, "t-1", Utc::now()).unwrap();
        ctl.add_task(&id, "t-2", Utc::now()).unwrap();
        ctl.prune_task("t-1", Utc::now());
        assert_eq!(ctl.get(&id).unwrap().task_ids, vec!["t-2".to_string()]);
    }

    #[test]
    fn note_lesson_lands_in_open_record() {
        let (mut ctl, id) = controller_with_sprint(3);
        ctl.start(&id, Utc::now()).unwrap();
        ctl.note_lesson(&id, "always run the integration suite before submit");
        assert_eq!(
            ctl.get(&id).unwrap().iteration_history[0].lessons_learned,
            vec!["always run the integration suite before submit".to_string()]
        );
    }
}
