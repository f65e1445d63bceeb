//! The per-task attempt ledger.
//!
//! One entry is active at a time. Start opens an entry at the task's current
//! iteration number, submit hands it to QA, and approval or rejection closes
//! it. The rejection path is the only place a task's iteration counter
//! advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::models::{
    FeedbackSeverity, IterationLogEntry, IterationOutcome, Task, TaskState,
};
use crate::errors::{BoardError, Result};

/// Result of recording a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionOutcome {
    /// The task's iteration counter after the increment.
    pub iteration: u32,
    /// True once the counter has passed the task's budget.
    pub max_reached: bool,
}

/// Open a new ledger entry for `agent` at the task's current iteration.
pub fn start_iteration(task: &mut Task, agent: &str, now: DateTime<Utc>) -> Result<u32> {
    if task.assignee.as_deref() != Some(agent) {
        return Err(BoardError::Forbidden(format!(
            "task {} is not assigned to agent {}",
            task.id, agent
        )));
    }
    if let Some(active) = task.active_entry() {
        return Err(BoardError::InvalidTransition(format!(
            "task {} already has iteration {} {}",
            task.id,
            active.iteration,
            active.outcome.as_str()
        )));
    }
    match task.state {
        TaskState::Backlog | TaskState::InProgress => {}
        other => {
            return Err(BoardError::InvalidTransition(format!(
                "cannot start an iteration on task {} in state {}",
                task.id,
                other.as_str()
            )));
        }
    }

    task.state = TaskState::InProgress;
    task.iteration_log
        .push(IterationLogEntry::open(task.iteration, now));
    task.touch(now);
    Ok(task.iteration)
}

/// Hand the active entry to QA and park the task in `AwaitingReview`.
///
/// With no active entry one is opened on the spot, so an agent that skipped
/// the explicit start still gets a complete ledger.
pub fn submit_iteration(
    task: &mut Task,
    notes: Option<String>,
    files_changed: Vec<String>,
    now: DateTime<Utc>,
) -> Result<u32> {
    let needs_entry = match task.active_entry() {
        Some(entry) if entry.outcome == IterationOutcome::Submitted => {
            return Err(BoardError::InvalidTransition(format!(
                "iteration {} of task {} is already submitted",
                entry.iteration, task.id
            )));
        }
        Some(_) => false,
        None => true,
    };
    if needs_entry {
        task.iteration_log
            .push(IterationLogEntry::open(task.iteration, now));
    }

    // An active entry is guaranteed present after the match above.
    if let Some(entry) = task.active_entry_mut() {
        entry.outcome = IterationOutcome::Submitted;
        entry.notes = notes;
        entry.files_changed = files_changed;
    }
    task.state = TaskState::AwaitingReview;
    task.qa_feedback = None;
    task.touch(now);
    Ok(task.iteration)
}

/// Approve the submitted entry and complete the task.
pub fn record_approval(task: &mut Task, notes: Option<String>, now: DateTime<Utc>) -> Result<()> {
    ensure_submitted(task)?;
    if let Some(entry) = task.active_entry_mut() {
        entry.outcome = IterationOutcome::Approved;
        entry.completed_at = Some(now);
        entry.feedback = notes;
    }
    task.state = TaskState::Done;
    task.qa_feedback = None;
    task.touch(now);
    Ok(())
}

/// Reject the submitted entry, advance the iteration counter, and put the
/// task back in progress. Returns whether the budget is now exceeded.
pub fn record_rejection(
    task: &mut Task,
    feedback: &str,
    category: &str,
    severity: FeedbackSeverity,
    now: DateTime<Utc>,
) -> Result<RejectionOutcome> {
    ensure_submitted(task)?;
    if let Some(entry) = task.active_entry_mut() {
        entry.outcome = IterationOutcome::Rejected;
        entry.completed_at = Some(now);
        entry.feedback = Some(feedback.to_string());
        entry.feedback_category = Some(category.to_string());
        entry.feedback_severity = Some(severity);
    }
    task.iteration += 1;
    task.state = TaskState::InProgress;
    task.qa_feedback = Some(feedback.to_string());
    task.touch(now);
    Ok(RejectionOutcome {
        iteration: task.iteration,
        max_reached: task.iteration > task.max_iterations,
    })
}

fn ensure_submitted(task: &Task) -> Result<()> {
    match task.active_entry() {
        Some(entry) if entry.outcome == IterationOutcome::Submitted => Ok(()),
        Some(entry) => Err(BoardError::InvalidTransition(format!(
            "iteration {} of task {} is {}, not submitted",
            entry.iteration,
            task.id,
            entry.outcome.as_str()
        ))),
        None => Err(BoardError::InvalidTransition(format!(
            "task {} has no submitted iteration to review",
            task.id
        ))),
    }
}
