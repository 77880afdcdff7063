//! Background knowledge-optimization orchestrator.
//!
//! `sleep-core` watches a foreground agent's interactions and improves its
//! knowledge base in the background:
//!
//! - **Intake**: [`Sleep::observe`] queues every observation and analyzes
//!   failures, slow calls and token-heavy calls inline.
//! - **Batching**: queued observations are written to the history store in
//!   batches, followed by one pattern-detection pass.
//! - **Periodic analysis**: pattern mining, context optimization and
//!   knowledge consolidation produce scored [`Insight`]s.
//! - **Application**: cached insights become pattern and preference records.
//! - **Roles**: the active behavioral role is tracked and used to shape prompts.
//! - **World model**: proposals, proposal feedback and a summary of what the
//!   model currently believes.
//!
//! LLM backends plug in as [`CapabilityProvider`]s routed by [`LogicalRole`];
//! storage, role scoring and world-model inference plug in through the traits
//! in [`collab`].

mod analysis;
mod applicator;
mod batch;
pub mod collab;
pub mod config;
mod engine;
pub mod error;
mod feedback;
pub mod insight;
mod intake;
mod prompt;
pub mod provider;
mod role;
mod sleep;
pub mod types;

#[cfg(test)]
mod testing;

pub use collab::Collaborators;
pub use config::{ConfigValidationError, CriticalThresholds, SleepConfig};
pub use engine::StatsSnapshot;
pub use error::{SleepError, SleepResult};
pub use feedback::{
    ActiveUnderstanding, DomainSummary, EntitiesSummary, EntitySummary, GoalsSummary,
    LearningProgress, Proposal, RelationPattern, RelationsSummary, WorldMetrics,
    WorldUnderstanding,
};
pub use intake::Criticality;
pub use prompt::PromptRecommendation;
pub use provider::{CapabilityProvider, LogicalRole, ProviderOptions, ProviderRouter, ProviderSelection};
pub use role::{RoleBasedPrompt, RoleSlot};
pub use sleep::Sleep;
pub use types::{AnalysisKind, Insight, Observation, Role, RoleContext};
