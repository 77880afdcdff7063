//! Shared engine state used by the background loops and the public API.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::collab::{
    Collaborators, HistoryStore, PatternDetector, PatternStore, RoleManager, WorldModel,
};
use crate::config::SleepConfig;
use crate::insight::InsightCache;
use crate::provider::ProviderRouter;
use crate::role::RoleSlot;
use crate::types::{Insight, Observation};

/// Running counters, updated lock-free.
#[derive(Default)]
pub(crate) struct EngineStats {
    pub observations: AtomicU64,
    pub critical_observations: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub insights_cached: AtomicU64,
    pub insights_discarded: AtomicU64,
    pub insights_evicted: AtomicU64,
    pub insights_applied: AtomicU64,
    pub insights_failed: AtomicU64,
}

impl EngineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending_insights: usize) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            observations: load(&self.observations),
            critical_observations: load(&self.critical_observations),
            batches_flushed: load(&self.batches_flushed),
            batches_failed: load(&self.batches_failed),
            insights_cached: load(&self.insights_cached),
            insights_discarded: load(&self.insights_discarded),
            insights_evicted: load(&self.insights_evicted),
            insights_applied: load(&self.insights_applied),
            insights_failed: load(&self.insights_failed),
            pending_insights,
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub observations: u64,
    pub critical_observations: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub insights_cached: u64,
    /// Dropped for falling below the minimum confidence
    pub insights_discarded: u64,
    /// Dropped because the cache was full
    pub insights_evicted: u64,
    pub insights_applied: u64,
    pub insights_failed: u64,
    pub pending_insights: usize,
}

pub(crate) struct Engine {
    pub config: SleepConfig,
    pub router: ProviderRouter,
    pub history: Arc<dyn HistoryStore>,
    pub patterns: Arc<dyn PatternStore>,
    pub detector: Arc<dyn PatternDetector>,
    pub roles: Arc<dyn RoleManager>,
    pub world: Option<Arc<dyn WorldModel>>,
    pub cache: InsightCache,
    pub current_role: RoleSlot,
    pub stats: EngineStats,
    queue_tx: mpsc::UnboundedSender<Observation>,
    /// Held by the batch loop for its whole lifetime; reacquired after a restart
    pub queue_rx: Mutex<mpsc::UnboundedReceiver<Observation>>,
}

impl Engine {
    pub fn new(config: SleepConfig, router: ProviderRouter, collaborators: Collaborators) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            cache: InsightCache::new(config.insight_cache_capacity),
            config,
            router,
            history: collaborators.history,
            patterns: collaborators.patterns,
            detector: collaborators.detector,
            roles: collaborators.roles,
            world: collaborators.world,
            current_role: RoleSlot::default(),
            stats: EngineStats::default(),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
        }
    }

    /// Hand an observation to the batch processor.
    pub fn enqueue(&self, observation: Observation) {
        if self.queue_tx.send(observation).is_err() {
            warn!("Observation queue closed; dropping observation");
        }
    }

    /// Confidence gate shared by every insight producer; counts what it rejects.
    pub fn admit_insight(&self, insight: &Insight) -> bool {
        if insight.is_confident(self.config.min_confidence) {
            return true;
        }
        EngineStats::bump(&self.stats.insights_discarded);
        debug!(
            kind = %insight.kind,
            confidence = insight.confidence,
            "Discarding low-confidence insight"
        );
        false
    }

    /// Cache an insight if it clears the confidence bar. Returns whether it was cached.
    pub fn cache_insight(&self, insight: Insight) -> bool {
        if !self.admit_insight(&insight) {
            return false;
        }

        if let Some(evicted) = self.cache.push(insight) {
            EngineStats::bump(&self.stats.insights_evicted);
            warn!(
                kind = %evicted.kind,
                capacity = self.config.insight_cache_capacity,
                "Insight cache full; evicted oldest insight"
            );
        }
        EngineStats::bump(&self.stats.insights_cached);
        true
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.cache.len())
    }
}

/// Run one step, turning a panic into a log line and its message.
pub(crate) async fn guarded<F, T>(task: &'static str, step: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(step).catch_unwind().await.map_err(|panic| {
        let message = panic_message(panic.as_ref());
        error!(task, panic = %message, "Step panicked");
        message
    })
}

/// Run one step of a background loop; a panic is logged and yields `None`.
pub(crate) async fn contained<F, T>(task: &'static str, step: F) -> Option<T>
where
    F: Future<Output = T>,
{
    guarded(task, step).await.ok()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
