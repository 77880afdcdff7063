//! Logical role -> provider routing with fallback.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use super::{CapabilityProvider, LogicalRole, ProviderOptions, ProviderSelection};
use crate::SleepResult;

/// Provider id reserved for canned test doubles; never picked by default routes.
const MOCK_PROVIDER_ID: &str = "mock";

/// A provider resolved for one call, tagged with its registry id.
#[derive(Clone)]
pub struct ProviderHandle {
    pub id: String,
    provider: Arc<dyn CapabilityProvider>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle").field("id", &self.id).finish()
    }
}

impl ProviderHandle {
    pub async fn analyze(&self, prompt: &str) -> SleepResult<String> {
        self.provider.analyze(prompt, &ProviderOptions::default()).await
    }

    pub async fn generate(&self, prompt: &str) -> SleepResult<String> {
        self.provider.generate(prompt, &ProviderOptions::default()).await
    }
}

/// Routing table from logical roles to registered providers.
///
/// The table is computed once by [`ProviderRouter::build`]; afterwards every
/// lookup filters it against the live registry, so deregistered providers
/// drop out without rebuilding.
pub struct ProviderRouter {
    registry: RwLock<Vec<(String, Arc<dyn CapabilityProvider>)>>,
    routes: BTreeMap<LogicalRole, Vec<String>>,
}

/// Collects providers before the routing table is frozen.
pub struct ProviderRouterBuilder {
    selections: BTreeMap<LogicalRole, ProviderSelection>,
    providers: Vec<(String, Arc<dyn CapabilityProvider>)>,
}

impl ProviderRouterBuilder {
    /// Register a provider under `id`. Re-registering an id replaces it in place.
    pub fn register(mut self, id: impl Into<String>, provider: Arc<dyn CapabilityProvider>) -> Self {
        let id = id.into();
        match self.providers.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = provider,
            None => self.providers.push((id, provider)),
        }
        self
    }

    /// Freeze the routing table.
    pub fn build(self) -> ProviderRouter {
        let registered = |id: &String| self.providers.iter().any(|(p, _)| p == id);

        let mut routes: BTreeMap<LogicalRole, Vec<String>> = BTreeMap::new();
        for (role, selection) in &self.selections {
            let ids: Vec<String> = selection.ids().into_iter().filter(|id| registered(id)).collect();
            routes.insert(*role, ids);
        }

        // Defaults chain analyzer -> generator -> enhancer, analyzer -> optimizer
        if !routes.contains_key(&LogicalRole::Analyzer) {
            let all: Vec<String> = self
                .providers
                .iter()
                .map(|(id, _)| id.clone())
                .filter(|id| id != MOCK_PROVIDER_ID)
                .collect();
            routes.insert(LogicalRole::Analyzer, all);
        }
        if !routes.contains_key(&LogicalRole::Generator) {
            let analyzers = routes[&LogicalRole::Analyzer].clone();
            routes.insert(LogicalRole::Generator, analyzers);
        }
        if !routes.contains_key(&LogicalRole::Optimizer) {
            let analyzers = routes[&LogicalRole::Analyzer].clone();
            routes.insert(LogicalRole::Optimizer, analyzers);
        }
        if !routes.contains_key(&LogicalRole::Enhancer) {
            let generators = routes[&LogicalRole::Generator].clone();
            routes.insert(LogicalRole::Enhancer, generators);
        }

        for (role, ids) in &routes {
            debug!(role = %role, providers = ?ids, "Provider route");
        }
        info!(providers = self.providers.len(), "Provider routing table built");

        ProviderRouter {
            registry: RwLock::new(self.providers),
            routes,
        }
    }
}

impl ProviderRouter {
    /// Start a router from configured role selections.
    pub fn builder(selections: &BTreeMap<LogicalRole, ProviderSelection>) -> ProviderRouterBuilder {
        ProviderRouterBuilder {
            selections: selections.clone(),
            providers: Vec::new(),
        }
    }

    /// A router with no providers at all; every lookup is empty.
    pub fn empty() -> Self {
        Self::builder(&BTreeMap::new()).build()
    }

    /// Providers able to serve `role`, in configured order.
    ///
    /// Falls back to a single registered provider when none of the configured
    /// ones remain; empty only when nothing is registered.
    pub fn providers_for(&self, role: LogicalRole) -> Vec<ProviderHandle> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);

        let mut available: Vec<ProviderHandle> = self
            .routes
            .get(&role)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                registry.iter().find(|(p, _)| p == id).map(|(p, provider)| ProviderHandle {
                    id: p.clone(),
                    provider: Arc::clone(provider),
                })
            })
            .collect();

        if available.is_empty() {
            if let Some((id, provider)) = registry.first() {
                available.push(ProviderHandle {
                    id: id.clone(),
                    provider: Arc::clone(provider),
                });
            }
        }

        available
    }

    /// First provider for `role`, if any.
    pub fn primary(&self, role: LogicalRole) -> Option<ProviderHandle> {
        self.providers_for(role).into_iter().next()
    }

    /// Configured route for `role` before registry filtering.
    pub fn route(&self, role: LogicalRole) -> &[String] {
        self.routes.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Register (or replace) a provider after startup.
    ///
    /// Routes are not rebuilt: a new id only serves roles that already name it,
    /// or the fallback.
    pub fn register(&self, id: impl Into<String>, provider: Arc<dyn CapabilityProvider>) {
        let id = id.into();
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = provider,
            None => registry.push((id.clone(), provider)),
        }
        info!(provider = %id, "Provider registered");
    }

    /// Remove a provider; returns whether it was registered.
    pub fn deregister(&self, id: &str) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let before = registry.len();
        registry.retain(|(existing, _)| existing != id);
        let removed = registry.len() != before;
        if removed {
            info!(provider = %id, "Provider deregistered");
        }
        removed
    }

    /// Registered provider ids in registration order.
    pub fn provider_ids(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.iter().map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn ids(handles: &[ProviderHandle]) -> Vec<&str> {
        handles.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn test_no_providers_yields_empty() {
        let router = ProviderRouter::empty();
        for role in LogicalRole::ALL {
            assert!(router.providers_for(role).is_empty());
        }
    }

    #[test]
    fn test_defaults_exclude_mock_and_chain() {
        let router = ProviderRouter::builder(&BTreeMap::new())
            .register("mock", Arc::new(MockProvider::new()))
            .register("claude", Arc::new(MockProvider::new()))
            .register("codex", Arc::new(MockProvider::new()))
            .build();

        assert_eq!(router.route(LogicalRole::Analyzer), ["claude", "codex"]);
        assert_eq!(router.route(LogicalRole::Generator), ["claude", "codex"]);
        assert_eq!(router.route(LogicalRole::Optimizer), ["claude", "codex"]);
        assert_eq!(router.route(LogicalRole::Enhancer), ["claude", "codex"]);
    }

    #[test]
    fn test_configured_routes_filter_unregistered() {
        let mut selections = BTreeMap::new();
        selections.insert(LogicalRole::Analyzer, ProviderSelection::from(vec!["gemini", "claude"]));
        selections.insert(LogicalRole::Enhancer, ProviderSelection::from("codex"));

        let router = ProviderRouter::builder(&selections)
            .register("claude", Arc::new(MockProvider::new()))
            .register("codex", Arc::new(MockProvider::new()))
            .build();

        assert_eq!(ids(&router.providers_for(LogicalRole::Analyzer)), vec!["claude"]);
        assert_eq!(ids(&router.providers_for(LogicalRole::Enhancer)), vec!["codex"]);
        // generator defaults to the analyzer route
        assert_eq!(ids(&router.providers_for(LogicalRole::Generator)), vec!["claude"]);
    }

    #[test]
    fn test_fallback_when_only_mock_registered() {
        let router = ProviderRouter::builder(&BTreeMap::new())
            .register("mock", Arc::new(MockProvider::new()))
            .build();

        assert!(router.route(LogicalRole::Analyzer).is_empty());
        for role in LogicalRole::ALL {
            assert_eq!(ids(&router.providers_for(role)), vec!["mock"]);
        }
    }

    #[test]
    fn test_deregister_refreshes_lookups() {
        let router = ProviderRouter::builder(&BTreeMap::new())
            .register("claude", Arc::new(MockProvider::new()))
            .register("codex", Arc::new(MockProvider::new()))
            .build();

        assert!(router.deregister("claude"));
        assert!(!router.deregister("claude"));
        assert_eq!(ids(&router.providers_for(LogicalRole::Analyzer)), vec!["codex"]);

        assert!(router.deregister("codex"));
        assert!(router.providers_for(LogicalRole::Analyzer).is_empty());

        // a late registration is only reachable through the fallback
        router.register("gemini", Arc::new(MockProvider::new()));
        assert_eq!(ids(&router.providers_for(LogicalRole::Optimizer)), vec!["gemini"]);
    }

    #[tokio::test]
    async fn test_handle_dispatches_to_provider() {
        let mock = Arc::new(MockProvider::new().with_analysis("analysis").with_generation("text"));
        let router = ProviderRouter::builder(&BTreeMap::new())
            .register("claude", mock.clone())
            .build();

        let handle = router.primary(LogicalRole::Analyzer).unwrap();
        assert_eq!(handle.analyze("why?").await.unwrap(), "analysis");
        assert_eq!(handle.generate("write").await.unwrap(), "text");
        assert_eq!(mock.calls().len(), 2);
    }
}
