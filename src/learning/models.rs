//! Learning records: per-agent profiles, project lessons, and conventions.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::models::FeedbackSeverity;

/// Aggregated rejection count for one feedback category of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MistakePattern {
    pub category: String,
    pub occurrences: u32,
    pub last_seen: DateTime<Utc>,
    /// Example task ids, capped by the engine.
    #[serde(default)]
    pub example_tasks: Vec<String>,
}

/// One rejection as seen by the agent it was addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub task_id: String,
    pub category: String,
    pub severity: FeedbackSeverity,
    pub feedback: String,
    pub recorded_at: DateTime<Utc>,
}

/// Everything the board has learned about one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLearningProfile {
    pub agent_id: String,
    pub tasks_completed: u32,
    pub total_iterations: u32,
    /// Sorted by occurrences, most frequent first.
    #[serde(default)]
    pub mistake_patterns: Vec<MistakePattern>,
    /// Newest first, capped by the engine.
    #[serde(default)]
    pub recent_feedback: Vec<FeedbackRecord>,
}

impl AgentLearningProfile {
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            tasks_completed: 0,
            total_iterations: 0,
            mistake_patterns: Vec::new(),
            recent_feedback: Vec::new(),
        }
    }

    /// Average attempts per completed task; 0 until the first completion.
    pub fn average_iterations(&self) -> f64 {
        if self.tasks_completed == 0 {
            return 0.0;
        }
        self.total_iterations as f64 / self.tasks_completed as f64
    }

    pub fn pattern(&self, category: &str) -> Option<&MistakePattern> {
        self.mistake_patterns.iter().find(|p| p.category == category)
    }
}

/// A generalized, confidence-scored statement promoted from recurring
/// rejection feedback, or written directly by a privileged caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLesson {
    pub id: String,
    pub category: String,
    pub lesson: String,
    /// Where the lesson came from, e.g. `qa-feedback` or `manual`.
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 0.0 to 1.0; repeats nudge it upward.
    pub confidence: f64,
    pub occurrences: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectLesson {
    /// Ranking weight used for the context read: confidence scaled by how
    /// often the lesson recurred.
    pub fn weight(&self) -> f64 {
        self.confidence * self.occurrences as f64
    }
}

/// A named codebase pattern agents are expected to follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebaseConvention {
    pub pattern: String,
    pub description: String,
    /// File or snippet references; grows by set union.
    #[serde(default)]
    pub examples: BTreeSet<String>,
}

/// The read contract an agent consumes when it begins an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: String,
    pub mistake_patterns: Vec<MistakePattern>,
    pub recent_feedback: Vec<FeedbackRecord>,
    pub top_lessons: Vec<ProjectLesson>,
    pub conventions: Vec<CodebaseConvention>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_iterations_handles_zero_completions() {
        let profile = AgentLearningProfile::new("agent-1");
        assert_eq!(profile.average_iterations(), 0.0);
    }

    #[test]
    fn average_iterations_divides() {
        let mut profile = AgentLearningProfile::new("agent-1");
        profile.tasks_completed = 4;
        profile.total_iterations = 10;
        assert_eq!(profile.average_iterations(), 2.5);
    }

    #[test]
    fn lesson_weight_scales_with_occurrences() {
        let now = Utc::now();
        let lesson = ProjectLesson {
            id: "l-1".into(),
            category: "testing".into(),
            lesson: "run the suite before submitting".into(),
            source: "qa-feedback".into(),
            tags: vec![],
            confidence: 0.6,
            occurrences: 3,
            created_at: now,
            updated_at: now,
        };
        assert!((lesson.weight() - 1.8).abs() < f64::EPSILON);
    }
}
