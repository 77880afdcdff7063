//! Collaborator interfaces consumed by the engine.
//!
//! The engine owns scheduling, routing and application semantics only. Storage,
//! pattern detection, role scoring and world-model inference live behind these
//! traits. In-memory implementations are provided for embedding and tests:
//!
//! - [`MemoryStore`]: history, patterns, preferences and a frequency detector
//! - [`TriggerRoleManager`]: regex-trigger role selection with usage counters
//! - [`InMemoryWorldModel`]: interaction-derived entities, goals and constraints

mod memory;
mod roles;
mod world;

pub use memory::MemoryStore;
pub use roles::TriggerRoleManager;
pub use world::InMemoryWorldModel;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{
    InteractionDetails, PatternRecord, PreferenceRecord, RecentContext, Role, RoleContext,
};
use crate::SleepResult;

/// Interaction history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn log_interaction(
        &self,
        action: &str,
        file_path: Option<&str>,
        details: InteractionDetails,
    ) -> SleepResult<()>;

    /// Summary of the `limit` most recent interactions.
    async fn get_recent_context(&self, limit: usize) -> SleepResult<RecentContext>;
}

/// Pattern and preference knowledge store.
#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn get_all_patterns(&self) -> SleepResult<Vec<PatternRecord>>;

    async fn add_pattern(&self, pattern: PatternRecord) -> SleepResult<()>;

    async fn add_preference(&self, preference: PreferenceRecord) -> SleepResult<()>;

    async fn get_preferences(&self) -> SleepResult<Vec<PreferenceRecord>>;
}

/// Mines stored history for new patterns.
#[async_trait]
pub trait PatternDetector: Send + Sync {
    /// Run detection and return only patterns not reported before.
    async fn check_for_patterns(&self) -> SleepResult<Vec<PatternRecord>>;
}

/// Usage counters for one role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleUsage {
    pub uses: u64,
    pub successes: u64,
}

impl RoleUsage {
    pub fn success_rate(&self) -> f64 {
        if self.uses == 0 {
            0.0
        } else {
            self.successes as f64 / self.uses as f64
        }
    }
}

/// Role usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleStatistics {
    pub total_roles: usize,
    pub usage: BTreeMap<String, RoleUsage>,
}

/// A role ranked against a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecommendation {
    pub role: String,
    pub score: f64,
    pub description: String,
}

/// Selects the behavioral role that fits the current context.
#[async_trait]
pub trait RoleManager: Send + Sync {
    /// Called once when the orchestrator starts.
    async fn initialize(&self) -> SleepResult<()> {
        Ok(())
    }

    async fn get_active_role(&self, context: &RoleContext) -> SleepResult<Option<Arc<Role>>>;

    async fn update_role_performance(&self, role: &str, success: bool) -> SleepResult<()>;

    fn get_role_statistics(&self) -> RoleStatistics;

    async fn get_role_recommendations(
        &self,
        context: &RoleContext,
    ) -> SleepResult<Vec<RoleRecommendation>>;
}

/// A goal the world model believes the user pursued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub description: String,
    #[serde(default)]
    pub achieved: bool,
}

/// Aggregate view produced by the world model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldInsights {
    pub domain: String,
    pub domain_confidence: f64,
    pub recent_goals: Vec<Goal>,
    pub success_rate: f64,
    pub discovered_entity_types: Vec<String>,
    pub discovered_relation_types: Vec<String>,
    pub total_entities: usize,
    pub total_relations: usize,
    pub interaction_count: u64,
    pub entity_type_diversity: usize,
    pub relation_type_diversity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    pub properties: Map<String, Value>,
}

impl Entity {
    pub fn interaction_count(&self) -> u64 {
        self.properties
            .get("interaction_count")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub relation_type: String,
    pub source_id: String,
    pub target_id: String,
    pub confidence: f64,
    pub observed_count: u64,
}

/// Lesson recorded after a rejected proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub lesson: String,
    pub constraint: String,
    pub adjustment: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time copy of the world model's live state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub domain_confidence: f64,
    pub interaction_count: u64,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub constraints: BTreeMap<String, Constraint>,
}

/// Structured belief state inferred from interactions.
#[async_trait]
pub trait WorldModel: Send + Sync {
    async fn infer_from_interaction(&self, interaction: &Value) -> SleepResult<()>;

    fn get_insights(&self) -> SleepResult<WorldInsights>;

    /// Live state, or `None` before anything has been inferred.
    fn snapshot(&self) -> Option<WorldSnapshot>;

    /// Store a named constraint in the live state; false if there is no live state.
    fn record_constraint(&self, name: &str, constraint: Constraint) -> bool;
}

/// The set of collaborators an engine runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub history: Arc<dyn HistoryStore>,
    pub patterns: Arc<dyn PatternStore>,
    pub detector: Arc<dyn PatternDetector>,
    pub roles: Arc<dyn RoleManager>,
    /// Optional; world-model features degrade to empty results without it
    pub world: Option<Arc<dyn WorldModel>>,
}

impl Collaborators {
    /// In-memory store, trigger role manager and world model.
    pub fn in_memory(roles: Vec<Role>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            history: store.clone(),
            patterns: store.clone(),
            detector: store,
            roles: Arc::new(TriggerRoleManager::new(roles)),
            world: Some(Arc::new(InMemoryWorldModel::new())),
        }
    }

    pub fn with_world(mut self, world: Option<Arc<dyn WorldModel>>) -> Self {
        self.world = world;
        self
    }
}
