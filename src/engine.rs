//! The single-writer board engine.
//!
//! [`Board`] owns all in-memory state (tasks, sprints, learning) and applies
//! every transition atomically: each operation validates first and either
//! fully applies or returns with state untouched. [`BoardService`] wraps a
//! board with its two collaborators and enforces the control flow
//! "mutate, then persist a snapshot, then notify observers". Failed
//! operations never persist or publish.
//!
//! Both types are plain values passed by handle; hosting processes that
//! admit concurrent callers must serialize access (one owner task or an
//! exclusive lock), because every transition reads state before writing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::{self, Caller, Role};
use crate::board::models::{FeedbackSeverity, NewTask, Task, TaskColumn, TaskState};
use crate::board::store::{TaskStore, TaskUpdate};
use crate::board::{graph, iteration};
use crate::errors::{BoardError, Result};
use crate::events::{BoardEvent, EventKind, Notifier};
use crate::health::{self, HealthReport, HealthThresholds};
use crate::learning::engine::{LearningEngine, PromotionPolicy};
use crate::learning::models::AgentContext;
use crate::snapshot::{BoardSnapshot, SnapshotStore};
use crate::sprint::controller::{SprintAdvance, SprintController};
use crate::sprint::models::NewSprint;

/// Outcome of a QA rejection as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    /// The task's iteration counter after the increment.
    pub iteration: u32,
    /// True once the counter has passed the task's budget.
    pub max_reached: bool,
    /// Lesson text promoted by this rejection, if the recurrence threshold
    /// was crossed.
    pub promoted_lesson: Option<String>,
}

/// In-memory owner of all board state. No globals: construct one per board
/// and pass it by handle.
#[derive(Debug, Default)]
pub struct Board {
    tasks: TaskStore,
    sprints: SprintController,
    learning: LearningEngine,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: PromotionPolicy) -> Self {
        Self {
            learning: LearningEngine::with_policy(policy),
            ..Self::default()
        }
    }

    /// Rebuild a board from a persisted snapshot.
    pub fn from_snapshot(snapshot: BoardSnapshot, policy: PromotionPolicy) -> Self {
        Self {
            tasks: TaskStore::from_tasks(snapshot.tasks),
            sprints: SprintController::from_sprints(snapshot.sprints),
            learning: LearningEngine::from_records(
                snapshot.profiles,
                snapshot.lessons,
                snapshot.conventions,
                policy,
            ),
        }
    }

    /// Serialize the full board state.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            tasks: self.tasks.to_records(),
            sprints: self.sprints.to_records(),
            profiles: self.learning.profile_records(),
            lessons: self.learning.lesson_records(),
            conventions: self.learning.convention_records(),
            saved_at: Utc::now(),
        }
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn sprints(&self) -> &SprintController {
        &self.sprints
    }

    pub fn learning(&self) -> &LearningEngine {
        &self.learning
    }

    // ----- task operations -------------------------------------------------

    pub fn create_task(&mut self, caller: &Caller, new: NewTask, now: DateTime<Utc>) -> Result<String> {
        match caller.role {
            Role::Reviewer => {
                return Err(BoardError::Forbidden("reviewers may not create tasks".into()));
            }
            Role::Worker => {
                // A worker may seed work for itself, but not assign others.
                if new.assignee.is_some() && new.assignee.as_deref() != caller.agent_id() {
                    return Err(BoardError::Forbidden(
                        "workers may not create tasks assigned to other agents".into(),
                    ));
                }
            }
            Role::Privileged => {}
        }
        self.tasks.create(new, now)
    }

    pub fn update_task(
        &mut self,
        caller: &Caller,
        id: &str,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.tasks.update(caller, id, update, now)
    }

    pub fn assign_task(
        &mut self,
        caller: &Caller,
        id: &str,
        assignee: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.tasks.assign(caller, id, assignee, now)
    }

    pub fn move_task(
        &mut self,
        caller: &Caller,
        id: &str,
        to: TaskColumn,
        now: DateTime<Utc>,
    ) -> Result<TaskState> {
        self.tasks.move_task(caller, id, to, now)
    }

    /// Delete a task. Cascades: dependency edges are detached from both
    /// sides and the id is pruned from every sprint's member list.
    pub fn delete_task(&mut self, caller: &Caller, id: &str, now: DateTime<Utc>) -> Result<Task> {
        auth::ensure_privileged(caller)?;
        let task = self.tasks.remove(id)?;
        self.sprints.prune_task(id, now);
        Ok(task)
    }

    pub fn add_dependency(
        &mut self,
        caller: &Caller,
        task_id: &str,
        depends_on_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth::ensure_can_mutate(caller, self.tasks.get(task_id)?)?;
        graph::add_dependency(&mut self.tasks, task_id, depends_on_id, now)
    }

    pub fn remove_dependency(
        &mut self,
        caller: &Caller,
        task_id: &str,
        depends_on_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth::ensure_can_mutate(caller, self.tasks.get(task_id)?)?;
        graph::remove_dependency(&mut self.tasks, task_id, depends_on_id, now)
    }

    // ----- iteration operations --------------------------------------------

    pub fn start_iteration(&mut self, caller: &Caller, id: &str, now: DateTime<Utc>) -> Result<u32> {
        let agent = match (caller.role, caller.agent_id()) {
            (Role::Worker, Some(agent)) => agent.to_string(),
            _ => {
                return Err(BoardError::Forbidden(
                    "only worker callers start iterations".into(),
                ));
            }
        };
        iteration::start_iteration(self.tasks.get_mut(id)?, &agent, now)
    }

    pub fn submit_iteration(
        &mut self,
        caller: &Caller,
        id: &str,
        notes: Option<String>,
        files_changed: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        auth::ensure_can_mutate(caller, self.tasks.get(id)?)?;
        iteration::submit_iteration(self.tasks.get_mut(id)?, notes, files_changed, now)
    }

    pub fn approve_task(
        &mut self,
        caller: &Caller,
        id: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth::ensure_reviewer(caller)?;
        let task = self.tasks.get_mut(id)?;
        iteration::record_approval(task, notes, now)?;
        let assignee = task.assignee.clone();
        let iterations_used = task.iteration;
        if let Some(agent) = assignee {
            self.learning.record_completion(&agent, iterations_used);
        }
        Ok(())
    }

    /// Record a QA rejection: closes the submitted ledger entry, advances
    /// the iteration counter, feeds the learning store, and surfaces any
    /// lesson the recurrence promoted.
    pub fn reject_task(
        &mut self,
        caller: &Caller,
        id: &str,
        feedback: &str,
        category: &str,
        severity: FeedbackSeverity,
        now: DateTime<Utc>,
    ) -> Result<RejectionRecord> {
        auth::ensure_reviewer(caller)?;
        let task = self.tasks.get_mut(id)?;
        let outcome = iteration::record_rejection(task, feedback, category, severity, now)?;
        let assignee = task.assignee.clone();
        let sprint_id = task.sprint_id.clone();

        let promoted_lesson = assignee.and_then(|agent| {
            self.learning
                .record_rejection(&agent, id, feedback, category, severity, now)
        });
        if let (Some(lesson), Some(sid)) = (&promoted_lesson, &sprint_id) {
            self.sprints.note_lesson(sid, lesson);
        }
        Ok(RejectionRecord {
            iteration: outcome.iteration,
            max_reached: outcome.max_reached,
            promoted_lesson,
        })
    }

    // ----- sprint operations -----------------------------------------------

    pub fn create_sprint(&mut self, caller: &Caller, new: NewSprint, now: DateTime<Utc>) -> Result<String> {
        auth::ensure_privileged(caller)?;
        self.sprints.create(new, now)
    }

    pub fn add_task_to_sprint(
        &mut self,
        caller: &Caller,
        sprint_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth::ensure_privileged(caller)?;
        let previous = self.tasks.get(task_id)?.sprint_id.clone();
        self.sprints.get(sprint_id)?;
        if let Some(prev) = previous {
            if prev != sprint_id {
                self.sprints.remove_task(&prev, task_id, now)?;
            }
        }
        self.sprints.add_task(sprint_id, task_id, now)?;
        let task = self.tasks.get_mut(task_id)?;
        task.sprint_id = Some(sprint_id.to_string());
        task.touch(now);
        Ok(())
    }

    pub fn remove_task_from_sprint(
        &mut self,
        caller: &Caller,
        sprint_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth::ensure_privileged(caller)?;
        self.sprints.get(sprint_id)?;
        self.sprints.remove_task(sprint_id, task_id, now)?;
        if let Ok(task) = self.tasks.get_mut(task_id) {
            if task.sprint_id.as_deref() == Some(sprint_id) {
                task.sprint_id = None;
                task.touch(now);
            }
        }
        Ok(())
    }

    pub fn start_sprint(&mut self, caller: &Caller, id: &str, now: DateTime<Utc>) -> Result<()> {
        auth::ensure_privileged(caller)?;
        self.sprints.start(id, now)
    }

    pub fn begin_sprint_review(&mut self, caller: &Caller, id: &str, now: DateTime<Utc>) -> Result<()> {
        auth::ensure_privileged(caller)?;
        self.sprints.begin_review(id, now)
    }

    pub fn advance_sprint(&mut self, caller: &Caller, id: &str, now: DateTime<Utc>) -> Result<SprintAdvance> {
        auth::ensure_privileged(caller)?;
        self.sprints.advance(id, &self.tasks, now)
    }

    pub fn complete_sprint(&mut self, caller: &Caller, id: &str, now: DateTime<Utc>) -> Result<()> {
        auth::ensure_privileged(caller)?;
        self.sprints.complete(id, &self.tasks, now)
    }

    /// Privileged escape hatch: complete the sprint regardless of member
    /// state, stamping every member task done and recording the reason.
    pub fn force_complete_sprint(
        &mut self,
        caller: &Caller,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth::ensure_privileged(caller)?;
        let members = self.sprints.force_complete(id, reason, now)?;
        for member in members {
            if let Ok(task) = self.tasks.get_mut(&member) {
                task.state = TaskState::Done;
                task.touch(now);
            }
        }
        Ok(())
    }

    // ----- learning and health ---------------------------------------------

    pub fn add_lesson(
        &mut self,
        caller: &Caller,
        category: &str,
        lesson: &str,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        auth::ensure_privileged(caller)?;
        self.learning.add_lesson(category, lesson, "manual", tags, now)
    }

    pub fn add_convention(
        &mut self,
        caller: &Caller,
        pattern: &str,
        description: &str,
        examples: Vec<String>,
    ) -> Result<()> {
        auth::ensure_privileged(caller)?;
        self.learning.add_convention(pattern, description, examples)
    }

    pub fn agent_context(&self, agent: &str) -> AgentContext {
        self.learning.agent_context(agent)
    }

    pub fn health(&self, now: DateTime<Utc>, thresholds: &HealthThresholds) -> HealthReport {
        health::check(&self.tasks, now, thresholds)
    }
}

/// A board wired to its persistence and notification collaborators.
///
/// Every mutating call runs the in-memory transition first; only on success
/// is the snapshot saved and the event published, in that order.
pub struct BoardService<S: SnapshotStore, N: Notifier> {
    board: Board,
    store: S,
    notifier: N,
}

impl<S: SnapshotStore, N: Notifier> BoardService<S, N> {
    pub fn new(board: Board, store: S, notifier: N) -> Self {
        Self {
            board,
            store,
            notifier,
        }
    }

    /// Load the last snapshot from `store`, or start an empty board.
    pub fn open(store: S, notifier: N, policy: PromotionPolicy) -> Result<Self> {
        let board = match store.load()? {
            Some(snapshot) => {
                info!(tasks = snapshot.tasks.len(), sprints = snapshot.sprints.len(), "loaded board snapshot");
                Board::from_snapshot(snapshot, policy)
            }
            None => Board::with_policy(policy),
        };
        Ok(Self::new(board, store, notifier))
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    fn commit(&mut self, event: BoardEvent) -> Result<()> {
        self.store.save(&self.board.snapshot())?;
        debug!(kind = event.kind.as_str(), task = ?event.task_id, sprint = ?event.sprint_id, "published board event");
        self.notifier.publish(&event);
        Ok(())
    }

    pub fn create_task(&mut self, caller: &Caller, new: NewTask) -> Result<String> {
        let now = Utc::now();
        let id = self.board.create_task(caller, new, now)?;
        info!(task = %id, "task created");
        self.commit(BoardEvent::new(EventKind::TaskCreated, now).with_task(&id))?;
        Ok(id)
    }

    pub fn update_task(&mut self, caller: &Caller, id: &str, update: TaskUpdate) -> Result<()> {
        let now = Utc::now();
        self.board.update_task(caller, id, update, now)?;
        self.commit(BoardEvent::new(EventKind::TaskUpdated, now).with_task(id))
    }

    pub fn assign_task(&mut self, caller: &Caller, id: &str, assignee: Option<&str>) -> Result<()> {
        let now = Utc::now();
        self.board.assign_task(caller, id, assignee, now)?;
        let mut event = BoardEvent::new(EventKind::TaskAssigned, now).with_task(id);
        if let Some(agent) = assignee {
            event = event.with_agent(agent);
        }
        self.commit(event)
    }

    pub fn move_task(&mut self, caller: &Caller, id: &str, to: TaskColumn) -> Result<TaskState> {
        let now = Utc::now();
        let from = self.board.tasks().get(id)?.column();
        let state = self.board.move_task(caller, id, to, now)?;
        info!(task = %id, %from, %to, "task moved");
        self.commit(
            BoardEvent::new(EventKind::TaskMoved, now)
                .with_task(id)
                .with_detail(&format!("{} -> {}", from, to)),
        )?;
        Ok(state)
    }

    pub fn delete_task(&mut self, caller: &Caller, id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.delete_task(caller, id, now)?;
        self.commit(BoardEvent::new(EventKind::TaskDeleted, now).with_task(id))
    }

    pub fn add_dependency(&mut self, caller: &Caller, task_id: &str, depends_on_id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.add_dependency(caller, task_id, depends_on_id, now)?;
        self.commit(
            BoardEvent::new(EventKind::DependencyAdded, now)
                .with_task(task_id)
                .with_detail(&format!("depends on {}", depends_on_id)),
        )
    }

    pub fn remove_dependency(&mut self, caller: &Caller, task_id: &str, depends_on_id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.remove_dependency(caller, task_id, depends_on_id, now)?;
        self.commit(
            BoardEvent::new(EventKind::DependencyRemoved, now)
                .with_task(task_id)
                .with_detail(&format!("no longer depends on {}", depends_on_id)),
        )
    }

    pub fn start_iteration(&mut self, caller: &Caller, id: &str) -> Result<u32> {
        let now = Utc::now();
        let iteration = self.board.start_iteration(caller, id, now)?;
        let mut event = BoardEvent::new(EventKind::IterationStarted, now)
            .with_task(id)
            .with_detail(&format!("iteration {}", iteration));
        if let Some(agent) = caller.agent_id() {
            event = event.with_agent(agent);
        }
        self.commit(event)?;
        Ok(iteration)
    }

    pub fn submit_iteration(
        &mut self,
        caller: &Caller,
        id: &str,
        notes: Option<String>,
        files_changed: Vec<String>,
    ) -> Result<u32> {
        let now = Utc::now();
        let iteration = self.board.submit_iteration(caller, id, notes, files_changed, now)?;
        self.commit(
            BoardEvent::new(EventKind::IterationSubmitted, now)
                .with_task(id)
                .with_detail(&format!("iteration {}", iteration)),
        )?;
        Ok(iteration)
    }

    pub fn approve_task(&mut self, caller: &Caller, id: &str, notes: Option<String>) -> Result<()> {
        let now = Utc::now();
        self.board.approve_task(caller, id, notes, now)?;
        info!(task = %id, "iteration approved");
        self.commit(BoardEvent::new(EventKind::IterationApproved, now).with_task(id))
    }

    pub fn reject_task(
        &mut self,
        caller: &Caller,
        id: &str,
        feedback: &str,
        category: &str,
        severity: FeedbackSeverity,
    ) -> Result<RejectionRecord> {
        let now = Utc::now();
        let record = self.board.reject_task(caller, id, feedback, category, severity, now)?;
        info!(
            task = %id,
            iteration = record.iteration,
            max_reached = record.max_reached,
            category,
            "iteration rejected"
        );
        self.commit(
            BoardEvent::new(EventKind::IterationRejected, now)
                .with_task(id)
                .with_detail(category),
        )?;
        if let Some(lesson) = &record.promoted_lesson {
            self.commit(BoardEvent::new(EventKind::LessonRecorded, now).with_detail(lesson))?;
        }
        Ok(record)
    }

    pub fn create_sprint(&mut self, caller: &Caller, new: NewSprint) -> Result<String> {
        let now = Utc::now();
        let id = self.board.create_sprint(caller, new, now)?;
        self.commit(BoardEvent::new(EventKind::SprintCreated, now).with_sprint(&id))?;
        Ok(id)
    }

    pub fn add_task_to_sprint(&mut self, caller: &Caller, sprint_id: &str, task_id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.add_task_to_sprint(caller, sprint_id, task_id, now)?;
        self.commit(
            BoardEvent::new(EventKind::SprintTaskAdded, now)
                .with_sprint(sprint_id)
                .with_task(task_id),
        )
    }

    pub fn remove_task_from_sprint(&mut self, caller: &Caller, sprint_id: &str, task_id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.remove_task_from_sprint(caller, sprint_id, task_id, now)?;
        self.commit(
            BoardEvent::new(EventKind::SprintTaskRemoved, now)
                .with_sprint(sprint_id)
                .with_task(task_id),
        )
    }

    pub fn start_sprint(&mut self, caller: &Caller, id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.start_sprint(caller, id, now)?;
        self.commit(BoardEvent::new(EventKind::SprintStarted, now).with_sprint(id))
    }

    pub fn begin_sprint_review(&mut self, caller: &Caller, id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.begin_sprint_review(caller, id, now)?;
        self.commit(BoardEvent::new(EventKind::SprintReviewStarted, now).with_sprint(id))
    }

    pub fn advance_sprint(&mut self, caller: &Caller, id: &str) -> Result<SprintAdvance> {
        let now = Utc::now();
        let advance = self.board.advance_sprint(caller, id, now)?;
        let kind = match advance {
            SprintAdvance::Continued { .. } => EventKind::SprintAdvanced,
            SprintAdvance::Failed { .. } => EventKind::SprintFailed,
        };
        info!(sprint = %id, ?advance, "sprint advanced");
        self.commit(BoardEvent::new(kind, now).with_sprint(id))?;
        Ok(advance)
    }

    pub fn complete_sprint(&mut self, caller: &Caller, id: &str) -> Result<()> {
        let now = Utc::now();
        self.board.complete_sprint(caller, id, now)?;
        self.commit(BoardEvent::new(EventKind::SprintCompleted, now).with_sprint(id))
    }

    pub fn force_complete_sprint(&mut self, caller: &Caller, id: &str, reason: &str) -> Result<()> {
        let now = Utc::now();
        self.board.force_complete_sprint(caller, id, reason, now)?;
        self.commit(
            BoardEvent::new(EventKind::SprintCompleted, now)
                .with_sprint(id)
                .with_detail(reason),
        )
    }

    pub fn add_lesson(&mut self, caller: &Caller, category: &str, lesson: &str, tags: Vec<String>) -> Result<String> {
        let now = Utc::now();
        let id = self.board.add_lesson(caller, category, lesson, tags, now)?;
        self.commit(BoardEvent::new(EventKind::LessonRecorded, now).with_detail(lesson))?;
        Ok(id)
    }

    pub fn add_convention(
        &mut self,
        caller: &Caller,
        pattern: &str,
        description: &str,
        examples: Vec<String>,
    ) -> Result<()> {
        let now = Utc::now();
        self.board.add_convention(caller, pattern, description, examples)?;
        self.commit(BoardEvent::new(EventKind::ConventionRecorded, now).with_detail(pattern))
    }

    pub fn agent_context(&self, agent: &str) -> AgentContext {
        self.board.agent_context(agent)
    }

    pub fn health(&self, thresholds: &HealthThresholds) -> HealthReport {
        self.board.health(Utc::now(), thresholds)
    }
}
