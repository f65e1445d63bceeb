//! The three-tier learning store: per-agent mistake patterns, project
//! lessons, and codebase conventions.

pub mod engine;
pub mod models;

pub use engine::{LearningEngine, PromotionPolicy};
pub use models::{
    AgentContext, AgentLearningProfile, CodebaseConvention, FeedbackRecord, MistakePattern,
    ProjectLesson,
};
