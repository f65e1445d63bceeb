//! Derived board-health signals.
//!
//! Everything here is a pure function of current task state and a point in
//! time; nothing is persisted. Thresholds are tunable with defaults
//! matching the operational rules of thumb.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::board::models::{Priority, TaskColumn, TaskState};
use crate::board::store::TaskStore;

/// Tunable limits for the health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Hours an in-progress task may go untouched before it is stale.
    pub stale_hours: i64,
    /// Fewer backlog tasks than this is a low-backlog warning.
    pub low_backlog: usize,
    /// More in-progress tasks than this per agent is an overload.
    pub overload_wip: usize,
    /// Above this the overload is high severity.
    pub overload_high: usize,
    /// More pending-QA tasks than this is a review backlog.
    pub qa_backlog: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            stale_hours: 24,
            low_backlog: 3,
            overload_wip: 5,
            overload_high: 8,
            qa_backlog: 3,
        }
    }
}

/// Severity of one health issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Overall board status derived from the worst issue present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid health status: {}", s)),
        }
    }
}

/// Kind of board-health signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssueKind {
    StaleTasks,
    UnassignedBlocked,
    LowBacklog,
    OverloadedAgent,
    QaBacklog,
    CriticalNotStarted,
}

/// One detected issue with the records that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub kind: HealthIssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Output of a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub generated_at: DateTime<Utc>,
}

/// Run every health check against the current task set.
pub fn check(tasks: &TaskStore, now: DateTime<Utc>, thresholds: &HealthThresholds) -> HealthReport {
    let mut issues = Vec::new();

    let stale: Vec<String> = tasks
        .all()
        .into_iter()
        .filter(|t| {
            t.state == TaskState::InProgress
                && now.signed_duration_since(t.updated_at) > Duration::hours(thresholds.stale_hours)
        })
        .map(|t| t.id.clone())
        .collect();
    if !stale.is_empty() {
        issues.push(HealthIssue {
            kind: HealthIssueKind::StaleTasks,
            severity: IssueSeverity::Medium,
            message: format!(
                "{} in-progress task(s) untouched for over {}h",
                stale.len(),
                thresholds.stale_hours
            ),
            task_ids: stale,
            agent: None,
        });
    }

    let unassigned_blocked: Vec<String> = tasks
        .all()
        .into_iter()
        .filter(|t| t.state == TaskState::Blocked && t.assignee.is_none())
        .map(|t| t.id.clone())
        .collect();
    if !unassigned_blocked.is_empty() {
        issues.push(HealthIssue {
            kind: HealthIssueKind::UnassignedBlocked,
            severity: IssueSeverity::Medium,
            message: format!(
                "{} blocked task(s) with nobody assigned",
                unassigned_blocked.len()
            ),
            task_ids: unassigned_blocked,
            agent: None,
        });
    }

    let backlog_count = tasks.in_column(TaskColumn::Backlog).len();
    if backlog_count < thresholds.low_backlog {
        issues.push(HealthIssue {
            kind: HealthIssueKind::LowBacklog,
            severity: if backlog_count == 0 {
                IssueSeverity::Critical
            } else {
                IssueSeverity::Medium
            },
            message: format!("only {} task(s) left in the backlog", backlog_count),
            task_ids: Vec::new(),
            agent: None,
        });
    }

    let mut wip_by_agent: HashMap<&str, Vec<String>> = HashMap::new();
    for task in tasks.iter() {
        if task.state == TaskState::InProgress {
            if let Some(agent) = task.assignee.as_deref() {
                wip_by_agent.entry(agent).or_default().push(task.id.clone());
            }
        }
    }
    let mut overloaded: Vec<(&str, Vec<String>)> = wip_by_agent
        .into_iter()
        .filter(|(_, ids)| ids.len() > thresholds.overload_wip)
        .collect();
    overloaded.sort_by(|a, b| a.0.cmp(b.0));
    for (agent, mut ids) in overloaded {
        ids.sort();
        issues.push(HealthIssue {
            kind: HealthIssueKind::OverloadedAgent,
            severity: if ids.len() > thresholds.overload_high {
                IssueSeverity::High
            } else {
                IssueSeverity::Medium
            },
            message: format!("agent {} has {} tasks in progress", agent, ids.len()),
            task_ids: ids,
            agent: Some(agent.to_string()),
        });
    }

    let pending_qa: Vec<String> = tasks
        .all()
        .into_iter()
        .filter(|t| t.pending_qa())
        .map(|t| t.id.clone())
        .collect();
    if pending_qa.len() > thresholds.qa_backlog {
        issues.push(HealthIssue {
            kind: HealthIssueKind::QaBacklog,
            severity: IssueSeverity::Medium,
            message: format!("{} task(s) waiting on QA review", pending_qa.len()),
            task_ids: pending_qa,
            agent: None,
        });
    }

    let critical_waiting: Vec<String> = tasks
        .all()
        .into_iter()
        .filter(|t| t.priority == Priority::Critical && t.state == TaskState::Backlog)
        .map(|t| t.id.clone())
        .collect();
    if !critical_waiting.is_empty() {
        issues.push(HealthIssue {
            kind: HealthIssueKind::CriticalNotStarted,
            severity: IssueSeverity::High,
            message: format!(
                "{} critical-priority task(s) still in the backlog",
                critical_waiting.len()
            ),
            task_ids: critical_waiting,
            agent: None,
        });
    }

    let status = if issues.iter().any(|i| i.severity == IssueSeverity::Critical) {
        HealthStatus::Critical
    } else if issues.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Warning
    };

    HealthReport {
        status,
        issues,
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Caller;
    use crate::board::models::NewTask;

    fn create(store: &mut TaskStore, title: &str, priority: Priority, assignee: Option<&str>) -> String {
        store
            .create(
                NewTask {
                    title: title.into(),
                    priority,
                    assignee: assignee.map(String::from),
                    ..NewTask::default()
                },
                Utc::now(),
            )
            .unwrap()
    }

    fn backlog_padding(store: &mut TaskStore) {
        for i in 0..3 {
            create(store, &format!("padding-{}", i), Priority::Low, None);
        }
    }

    #[test]
    fn empty_board_reports_critical_low_backlog() {
        let tasks = TaskStore::new();
        let report = check(&tasks, Utc::now(), &HealthThresholds::default());
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, HealthIssueKind::LowBacklog);
        assert_eq!(report.issues[0].severity, IssueSeverity::Critical);
    }

    #[test]
    fn padded_backlog_is_healthy() {
        let mut tasks = TaskStore::new();
        backlog_padding(&mut tasks);
        let report = check(&tasks, Utc::now(), &HealthThresholds::default());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn stale_in_progress_task_is_flagged() {
        let mut tasks = TaskStore::new();
        backlog_padding(&mut tasks);
        let id = create(&mut tasks, "old work", Priority::Medium, None);
        tasks
            .move_task(&Caller::privileged(), &id, TaskColumn::InProgress, Utc::now())
            .unwrap();

        let later = Utc::now() + Duration::hours(25);
        let report = check(&tasks, later, &HealthThresholds::default());
        assert_eq!(report.status, HealthStatus::Warning);
        let issue = report
            .issues
            .iter()
            .find(|i| i.kind == HealthIssueKind::StaleTasks)
            .unwrap();
        assert_eq!(issue.task_ids, vec![id]);

        // Inside the window nothing fires.
        let report = check(&tasks, Utc::now() + Duration::hours(23), &HealthThresholds::default());
        assert!(report.issues.is_empty());
    }

    #[test]
    fn overloaded_agent_escalates_by_count() {
        let mut tasks = TaskStore::new();
        backlog_padding(&mut tasks);
        for i in 0..6 {
            let id = create(&mut tasks, &format!("wip-{}", i), Priority::Medium, Some("agent-1"));
            tasks
                .move_task(&Caller::privileged(), &id, TaskColumn::InProgress, Utc::now())
                .unwrap();
        }
        let report = check(&tasks, Utc::now(), &HealthThresholds::default());
        let issue = report
            .issues
            .iter()
            .find(|i| i.kind == HealthIssueKind::OverloadedAgent)
            .unwrap();
        assert_eq!(issue.severity, IssueSeverity::Medium);
        assert_eq!(issue.agent.as_deref(), Some("agent-1"));

        for i in 6..9 {
            let id = create(&mut tasks, &format!("wip-{}", i), Priority::Medium, Some("agent-1"));
            tasks
                .move_task(&Caller::privileged(), &id, TaskColumn::InProgress, Utc::now())
                .unwrap();
        }
        let report = check(&tasks, Utc::now(), &HealthThresholds::default());
        let issue = report
            .issues
            .iter()
            .find(|i| i.kind == HealthIssueKind::OverloadedAgent)
            .unwrap();
        assert_eq!(issue.severity, IssueSeverity::High);
        assert_eq!(issue.task_ids.len(), 9);
    }

    #[test]
    fn qa_backlog_fires_above_threshold() {
        let mut tasks = TaskStore::new();
        backlog_padding(&mut tasks);
        let worker = Caller::worker("agent-1");
        for i in 0..4 {
            let id = create(&mut tasks, &format!("review-{}", i), Priority::Medium, Some("agent-1"));
            tasks
                .move_task(&worker, &id, TaskColumn::InProgress, Utc::now())
                .unwrap();
            tasks
                .move_task(&worker, &id, TaskColumn::Done, Utc::now())
                .unwrap();
        }
        let report = check(&tasks, Utc::now(), &HealthThresholds::default());
        let issue = report
            .issues
            .iter()
            .find(|i| i.kind == HealthIssueKind::QaBacklog)
            .unwrap();
        assert_eq!(issue.task_ids.len(), 4);
    }

    #[test]
    fn critical_backlog_task_is_high_severity() {
        let mut tasks = TaskStore::new();
        backlog_padding(&mut tasks);
        let id = create(&mut tasks, "urgent", Priority::Critical, None);
        let report = check(&tasks, Utc::now(), &HealthThresholds::default());
        assert_eq!(report.status, HealthStatus::Warning);
        let issue = report
            .issues
            .iter()
            .find(|i| i.kind == HealthIssueKind::CriticalNotStarted)
            .unwrap();
        assert_eq!(issue.severity, IssueSeverity::High);
        assert_eq!(issue.task_ids, vec![id]);
    }

    #[test]
    fn unassigned_blocked_is_flagged() {
        let mut tasks = TaskStore::new();
        backlog_padding(&mut tasks);
        let id = create(&mut tasks, "stuck", Priority::Medium, Some("agent-1"));
        let caller = Caller::privileged();
        tasks
            .move_task(&caller, &id, TaskColumn::InProgress, Utc::now())
            .unwrap();
        tasks
            .move_task(&caller, &id, TaskColumn::Blocked, Utc::now())
            .unwrap();
        tasks.assign(&caller, &id, None, Utc::now()).unwrap();

        let report = check(&tasks, Utc::now(), &HealthThresholds::default());
        let issue = report
            .issues
            .iter()
            .find(|i| i.kind == HealthIssueKind::UnassignedBlocked)
            .unwrap();
        assert_eq!(issue.task_ids, vec![id]);
    }
}
