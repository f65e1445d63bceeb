//! Rejection aggregation and lesson promotion.
//!
//! Rejections feed per-agent mistake patterns. Once the same category has
//! recurred across enough distinct agents, the feedback text is distilled
//! into a project lesson shared with every agent. Extraction is a shallow
//! string heuristic, not language understanding.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::board::models::FeedbackSeverity;
use crate::errors::{BoardError, Result};
use crate::learning::models::{
    AgentContext, AgentLearningProfile, CodebaseConvention, FeedbackRecord, MistakePattern,
    ProjectLesson,
};

/// Cap on per-agent recent feedback entries.
const MAX_RECENT_FEEDBACK: usize = 10;

/// Cap on example task ids kept per mistake pattern.
const MAX_PATTERN_EXAMPLES: usize = 5;

/// Cap on lessons returned by the context read.
const MAX_CONTEXT_LESSONS: usize = 10;

/// Cap on mistake patterns returned by the context read.
const MAX_CONTEXT_PATTERNS: usize = 5;

/// Confidence assigned to a freshly promoted lesson.
const LESSON_BASE_CONFIDENCE: f64 = 0.5;

/// Confidence added each time a lesson recurs, capped at 1.0.
const LESSON_CONFIDENCE_STEP: f64 = 0.1;

/// Accepted length range for an extracted lesson, in characters.
const LESSON_MIN_CHARS: usize = 10;
const LESSON_MAX_CHARS: usize = 200;

/// Source recorded on lessons promoted from rejection feedback.
const SOURCE_QA_FEEDBACK: &str = "qa-feedback";

/// When a recurring mistake category graduates into a project lesson.
///
/// Tunable policy, not a contract: the defaults promote once two distinct
/// agents have each hit the same category at least twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    pub min_agents: usize,
    pub min_occurrences: u32,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            min_agents: 2,
            min_occurrences: 2,
        }
    }
}

/// Owner of all learning state. Written only through this API.
#[derive(Debug, Default)]
pub struct LearningEngine {
    profiles: HashMap<String, AgentLearningProfile>,
    lessons: Vec<ProjectLesson>,
    conventions: BTreeMap<String, CodebaseConvention>,
    policy: PromotionPolicy,
}

impl LearningEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: PromotionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Rebuild from snapshot records.
    pub fn from_records(
        profiles: Vec<AgentLearningProfile>,
        lessons: Vec<ProjectLesson>,
        conventions: Vec<CodebaseConvention>,
        policy: PromotionPolicy,
    ) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.agent_id.clone(), p))
                .collect(),
            lessons,
            conventions: conventions
                .into_iter()
                .map(|c| (c.pattern.clone(), c))
                .collect(),
            policy,
        }
    }

    pub fn profile(&self, agent: &str) -> Option<&AgentLearningProfile> {
        self.profiles.get(agent)
    }

    pub fn lessons(&self) -> &[ProjectLesson] {
        &self.lessons
    }

    pub fn conventions(&self) -> Vec<&CodebaseConvention> {
        self.conventions.values().collect()
    }

    /// Profiles sorted by agent id, for snapshots.
    pub fn profile_records(&self) -> Vec<AgentLearningProfile> {
        let mut profiles: Vec<AgentLearningProfile> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        profiles
    }

    pub fn lesson_records(&self) -> Vec<ProjectLesson> {
        self.lessons.clone()
    }

    pub fn convention_records(&self) -> Vec<CodebaseConvention> {
        self.conventions.values().cloned().collect()
    }

    /// Fold a QA rejection into the agent's profile and, when the category
    /// has recurred across enough agents, promote a lesson. Returns the
    /// promoted lesson text, if any.
    pub fn record_rejection(
        &mut self,
        agent: &str,
        task_id: &str,
        feedback: &str,
        category: &str,
        severity: FeedbackSeverity,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let profile = self
            .profiles
            .entry(agent.to_string())
            .or_insert_with(|| AgentLearningProfile::new(agent));

        profile.recent_feedback.insert(
            0,
            FeedbackRecord {
                task_id: task_id.to_string(),
                category: category.to_string(),
                severity,
                feedback: feedback.to_string(),
                recorded_at: now,
            },
        );
        profile.recent_feedback.truncate(MAX_RECENT_FEEDBACK);

        match profile
            .mistake_patterns
            .iter_mut()
            .find(|p| p.category == category)
        {
            Some(pattern) => {
                pattern.occurrences += 1;
                pattern.last_seen = now;
                if pattern.example_tasks.len() < MAX_PATTERN_EXAMPLES
                    && !pattern.example_tasks.iter().any(|t| t == task_id)
                {
                    pattern.example_tasks.push(task_id.to_string());
                }
            }
            None => profile.mistake_patterns.push(MistakePattern {
                category: category.to_string(),
                occurrences: 1,
                last_seen: now,
                example_tasks: vec![task_id.to_string()],
            }),
        }
        profile
            .mistake_patterns
            .sort_by(|a, b| b.occurrences.cmp(&a.occurrences));

        if !self.category_recurs_across_agents(category) {
            return None;
        }
        let text = extract_lesson(feedback)?;
        self.upsert_lesson(category, &text, SOURCE_QA_FEEDBACK, Vec::new(), now);
        Some(text)
    }

    /// Fold an approved task into the agent's throughput stats.
    pub fn record_completion(&mut self, agent: &str, iterations: u32) {
        let profile = self
            .profiles
            .entry(agent.to_string())
            .or_insert_with(|| AgentLearningProfile::new(agent));
        profile.tasks_completed += 1;
        profile.total_iterations += iterations;
    }

    /// Direct lesson write, independent of the promotion heuristic.
    pub fn add_lesson(
        &mut self,
        category: &str,
        lesson: &str,
        source: &str,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let text = collapse_whitespace(lesson);
        if text.is_empty() {
            return Err(BoardError::Validation("lesson text must not be empty".into()));
        }
        Ok(self.upsert_lesson(category, &text, source, tags, now))
    }

    /// Direct convention write. Examples merge by set union.
    pub fn add_convention(
        &mut self,
        pattern: &str,
        description: &str,
        examples: Vec<String>,
    ) -> Result<()> {
        if pattern.trim().is_empty() {
            return Err(BoardError::Validation(
                "convention pattern must not be empty".into(),
            ));
        }
        match self.conventions.get_mut(pattern) {
            Some(existing) => {
                existing.description = description.to_string();
                existing.examples.extend(examples);
            }
            None => {
                self.conventions.insert(
                    pattern.to_string(),
                    CodebaseConvention {
                        pattern: pattern.to_string(),
                        description: description.to_string(),
                        examples: examples.into_iter().collect(),
                    },
                );
            }
        }
        Ok(())
    }

    /// The read contract consumed when an agent begins an iteration: its
    /// own patterns and feedback, the highest-weight lessons, and every
    /// convention.
    pub fn agent_context(&self, agent: &str) -> AgentContext {
        let (mut mistake_patterns, recent_feedback) = self
            .profiles
            .get(agent)
            .map(|p| (p.mistake_patterns.clone(), p.recent_feedback.clone()))
            .unwrap_or_default();
        mistake_patterns.truncate(MAX_CONTEXT_PATTERNS);

        let mut top_lessons = self.lessons.clone();
        top_lessons.sort_by(|a, b| {
            b.weight()
                .partial_cmp(&a.weight())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        top_lessons.truncate(MAX_CONTEXT_LESSONS);

        AgentContext {
            agent_id: agent.to_string(),
            mistake_patterns,
            recent_feedback,
            top_lessons,
            conventions: self.convention_records(),
        }
    }

    fn category_recurs_across_agents(&self, category: &str) -> bool {
        let agents_over_threshold = self
            .profiles
            .values()
            .filter(|p| {
                p.pattern(category)
                    .is_some_and(|m| m.occurrences >= self.policy.min_occurrences)
            })
            .count();
        agents_over_threshold >= self.policy.min_agents
    }

    /// Insert or bump a lesson, matching on category plus case-insensitive
    /// text. Returns the lesson id.
    fn upsert_lesson(
        &mut self,
        category: &str,
        text: &str,
        source: &str,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> String {
        if let Some(existing) = self
            .lessons
            .iter_mut()
            .find(|l| l.category == category && l.lesson.eq_ignore_ascii_case(text))
        {
            existing.occurrences += 1;
            existing.confidence = (existing.confidence + LESSON_CONFIDENCE_STEP).min(1.0);
            existing.updated_at = now;
            for tag in tags {
                if !existing.tags.contains(&tag) {
                    existing.tags.push(tag);
                }
            }
            return existing.id.clone();
        }
        let lesson = ProjectLesson {
            id: Uuid::new_v4().to_string(),
            category: category.to_string(),
            lesson: text.to_string(),
            source: source.to_string(),
            tags,
            confidence: LESSON_BASE_CONFIDENCE,
            occurrences: 1,
            created_at: now,
            updated_at: now,
        };
        let id = lesson.id.clone();
        self.lessons.push(lesson);
        id
    }
}

/// Distill rejection feedback into lesson text: drop the `REJECTED:`
/// marker, collapse whitespace, and keep it only when the remainder is a
/// sentence-sized statement.
fn extract_lesson(feedback: &str) -> Option<String> {
    let trimmed = feedback.trim();
    let trimmed = trimmed.strip_prefix("REJECTED:").unwrap_or(trimmed);
    let collapsed = collapse_whitespace(trimmed);
    let len = collapsed.chars().count();
    if (LESSON_MIN_CHARS..=LESSON_MAX_CHARS).contains(&len) {
        Some(collapsed)
    } else {
        None
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
