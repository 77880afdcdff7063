//! Fixtures and test doubles shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::collab::{
    Collaborators, Constraint, HistoryStore, InMemoryWorldModel, MemoryStore, PatternDetector,
    PatternStore, RoleManager, RoleRecommendation, RoleStatistics, TriggerRoleManager,
    WorldInsights, WorldModel, WorldSnapshot,
};
use crate::config::SleepConfig;
use crate::engine::Engine;
use crate::provider::{CapabilityProvider, MockProvider, ProviderOptions, ProviderRouter};
use crate::types::{
    InteractionDetails, PatternRecord, PreferenceRecord, RecentContext, Role, RoleContext,
};
use crate::{SleepError, SleepResult};

pub(crate) struct Fixture {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub world: Arc<InMemoryWorldModel>,
}

pub(crate) fn router(providers: Vec<(&str, Arc<MockProvider>)>) -> ProviderRouter {
    providers
        .into_iter()
        .fold(ProviderRouter::builder(&BTreeMap::new()), |builder, (id, mock)| {
            builder.register(id, mock)
        })
        .build()
}

fn build(
    config: SleepConfig,
    providers: Vec<(&str, Arc<MockProvider>)>,
    roles: Arc<dyn RoleManager>,
) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let world = Arc::new(InMemoryWorldModel::new());
    let collaborators = Collaborators {
        history: store.clone(),
        patterns: store.clone(),
        detector: store.clone(),
        roles,
        world: Some(world.clone()),
    };
    Fixture {
        engine: Arc::new(Engine::new(config, router(providers), collaborators)),
        store,
        world,
    }
}

/// Engine over an in-memory store and world model with no roles.
pub(crate) fn fixture(config: SleepConfig, providers: Vec<(&str, Arc<MockProvider>)>) -> Fixture {
    build(config, providers, Arc::new(TriggerRoleManager::new(Vec::new())))
}

pub(crate) fn fixture_with_roles(config: SleepConfig, roles: Arc<ScriptedRoleManager>) -> Fixture {
    build(config, Vec::new(), roles)
}

/// Engine whose history, pattern store and detector are all `store`.
pub(crate) fn fixture_with<S>(
    config: SleepConfig,
    providers: Vec<(&str, Arc<MockProvider>)>,
    store: Arc<S>,
) -> Arc<Engine>
where
    S: HistoryStore + PatternStore + PatternDetector + 'static,
{
    let collaborators = Collaborators {
        history: store.clone(),
        patterns: store.clone(),
        detector: store,
        roles: Arc::new(TriggerRoleManager::new(Vec::new())),
        world: None,
    };
    Arc::new(Engine::new(config, router(providers), collaborators))
}

/// Engine with in-memory collaborators and a single provider registered as `id`.
pub(crate) fn fixture_with_provider(
    config: SleepConfig,
    id: &str,
    provider: Arc<dyn CapabilityProvider>,
) -> Arc<Engine> {
    let router = ProviderRouter::builder(&BTreeMap::new())
        .register(id, provider)
        .build();
    Arc::new(Engine::new(config, router, Collaborators::in_memory(Vec::new())))
}

pub(crate) fn fixture_without_world(config: SleepConfig) -> Arc<Engine> {
    let collaborators = Collaborators::in_memory(Vec::new()).with_world(None);
    Arc::new(Engine::new(config, ProviderRouter::empty(), collaborators))
}

pub(crate) fn fixture_with_world(config: SleepConfig, world: Arc<dyn WorldModel>) -> Arc<Engine> {
    let collaborators = Collaborators::in_memory(Vec::new()).with_world(Some(world));
    Arc::new(Engine::new(config, ProviderRouter::empty(), collaborators))
}

/// Store whose every operation fails.
pub(crate) struct FailingStore;

fn offline<T>() -> SleepResult<T> {
    Err(SleepError::store("store offline"))
}

#[async_trait]
impl HistoryStore for FailingStore {
    async fn log_interaction(&self, _: &str, _: Option<&str>, _: InteractionDetails) -> SleepResult<()> {
        offline()
    }

    async fn get_recent_context(&self, _: usize) -> SleepResult<RecentContext> {
        offline()
    }
}

#[async_trait]
impl PatternStore for FailingStore {
    async fn get_all_patterns(&self) -> SleepResult<Vec<PatternRecord>> {
        offline()
    }

    async fn add_pattern(&self, _: PatternRecord) -> SleepResult<()> {
        offline()
    }

    async fn add_preference(&self, _: PreferenceRecord) -> SleepResult<()> {
        offline()
    }

    async fn get_preferences(&self) -> SleepResult<Vec<PreferenceRecord>> {
        offline()
    }
}

#[async_trait]
impl PatternDetector for FailingStore {
    async fn check_for_patterns(&self) -> SleepResult<Vec<PatternRecord>> {
        offline()
    }
}

/// Provider that panics on every call.
pub(crate) struct PanickingProvider;

#[async_trait]
impl CapabilityProvider for PanickingProvider {
    async fn analyze(&self, _: &str, _: &ProviderOptions) -> SleepResult<String> {
        panic!("analyzer crashed")
    }

    async fn generate(&self, _: &str, _: &ProviderOptions) -> SleepResult<String> {
        panic!("generator crashed")
    }
}

/// World model whose reads fail.
pub(crate) struct FailingWorld;

#[async_trait]
impl WorldModel for FailingWorld {
    async fn infer_from_interaction(&self, _: &Value) -> SleepResult<()> {
        Ok(())
    }

    fn get_insights(&self) -> SleepResult<WorldInsights> {
        Err(SleepError::world_model("graph offline"))
    }

    fn snapshot(&self) -> Option<WorldSnapshot> {
        None
    }

    fn record_constraint(&self, _: &str, _: Constraint) -> bool {
        false
    }
}

/// Role manager that returns whatever role the test set, and records what it saw.
#[derive(Default)]
pub(crate) struct ScriptedRoleManager {
    role: Mutex<Option<Arc<Role>>>,
    failure: Mutex<Option<String>>,
    panics: Mutex<bool>,
    contexts: Mutex<Vec<RoleContext>>,
    performance: Mutex<Vec<(String, bool)>>,
}

impl ScriptedRoleManager {
    pub fn set(&self, role: Option<Arc<Role>>) {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner) = role;
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    /// Make every role lookup panic.
    pub fn panic_on_lookup(&self) {
        *self.panics.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn contexts(&self) -> Vec<RoleContext> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn performance(&self) -> Vec<(String, bool)> {
        self.performance.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl RoleManager for ScriptedRoleManager {
    async fn get_active_role(&self, context: &RoleContext) -> SleepResult<Option<Arc<Role>>> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(context.clone());
        if *self.panics.lock().unwrap_or_else(PoisonError::into_inner) {
            panic!("role scorer crashed");
        }
        if let Some(message) = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(SleepError::role_manager(message));
        }
        Ok(self.role.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn update_role_performance(&self, role: &str, success: bool) -> SleepResult<()> {
        self.performance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((role.to_string(), success));
        Ok(())
    }

    fn get_role_statistics(&self) -> RoleStatistics {
        RoleStatistics::default()
    }

    async fn get_role_recommendations(&self, _: &RoleContext) -> SleepResult<Vec<RoleRecommendation>> {
        Ok(Vec::new())
    }
}
