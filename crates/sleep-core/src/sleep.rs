//! Public orchestrator handle and lifecycle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collab::{Collaborators, RoleRecommendation, RoleStatistics};
use crate::config::SleepConfig;
use crate::engine::{Engine, StatsSnapshot};
use crate::feedback::{Proposal, WorldUnderstanding};
use crate::prompt::PromptRecommendation;
use crate::provider::ProviderRouter;
use crate::role::RoleBasedPrompt;
use crate::types::{Insight, Observation, Role, RoleContext};
use crate::SleepResult;

/// Background knowledge-optimization orchestrator.
///
/// Owns four loops once started: the batch processor, the periodic analyzer,
/// the insight applicator and the role monitor. All public operations are
/// safe to call concurrently with the loops and with each other.
pub struct Sleep {
    engine: Arc<Engine>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Sleep {
    /// Validate `config` and wire the engine. Nothing runs until [`Sleep::start`].
    pub fn new(
        config: SleepConfig,
        router: ProviderRouter,
        collaborators: Collaborators,
    ) -> SleepResult<Self> {
        config.validate()?;
        Ok(Self {
            engine: Arc::new(Engine::new(config, router, collaborators)),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Initialize the role manager and spawn the background loops.
    ///
    /// Starting an already running orchestrator is a no-op.
    pub async fn start(&self) -> SleepResult<()> {
        let mut tasks = self.tasks.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.engine.roles.initialize().await?;

        let engine = &self.engine;
        tasks.push(spawn_loop("batch_processor", Arc::clone(engine).run_batch_processor()));
        tasks.push(spawn_loop("periodic_analyzer", Arc::clone(engine).run_periodic_analyzer()));
        tasks.push(spawn_loop("insight_applicator", Arc::clone(engine).run_insight_applicator()));
        tasks.push(spawn_loop("role_monitor", Arc::clone(engine).run_role_monitor()));
        self.running.store(true, Ordering::SeqCst);

        info!(
            providers = ?self.engine.router.provider_ids(),
            batch_size = self.engine.config.batch_size,
            analysis_interval_secs = self.engine.config.analysis_interval_secs,
            "Sleep started with role management"
        );
        Ok(())
    }

    /// Cancel the loops and wait for them to finish. Queued observations and
    /// cached insights are kept; the current role is cleared.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        self.running.store(false, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = tasks.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        }

        self.engine.current_role.replace(None);
        info!("Sleep stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Record an observation. Critical ones are analyzed before this returns.
    pub async fn observe(&self, observation: Observation) {
        self.engine.observe(observation).await;
    }

    pub async fn get_prompt_recommendation(
        &self,
        query: &str,
        context: &RoleContext,
    ) -> PromptRecommendation {
        self.engine.prompt_recommendation(query, context).await
    }

    pub async fn get_role_based_prompt(&self, query: &str, context: &RoleContext) -> RoleBasedPrompt {
        self.engine.role_based_prompt(query, context).await
    }

    pub fn get_role_statistics(&self) -> RoleStatistics {
        self.engine.roles.get_role_statistics()
    }

    pub async fn get_role_recommendations(
        &self,
        context: &RoleContext,
    ) -> SleepResult<Vec<RoleRecommendation>> {
        self.engine.roles.get_role_recommendations(context).await
    }

    pub async fn get_world_model_proposals(&self, recent_interactions: &[Value]) -> Vec<Proposal> {
        self.engine.world_model_proposals(recent_interactions).await
    }

    pub async fn update_world_model_from_feedback(
        &self,
        proposal_id: &str,
        feedback: &str,
        success: bool,
    ) {
        self.engine
            .update_world_model_from_feedback(proposal_id, feedback, success)
            .await;
    }

    pub fn get_current_world_understanding(&self) -> WorldUnderstanding {
        self.engine.current_world_understanding()
    }

    pub fn current_role(&self) -> Option<Arc<Role>> {
        self.engine.current_role.get()
    }

    /// Insights waiting for the applicator, oldest first.
    pub fn pending_insights(&self) -> Vec<Insight> {
        self.engine.cache.pending()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats_snapshot()
    }

    pub fn providers(&self) -> &ProviderRouter {
        &self.engine.router
    }

    pub fn config(&self) -> &SleepConfig {
        &self.engine.config
    }
}

fn spawn_loop<F>(task: &'static str, body: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task, "Background task started");
        body.await;
    })
}
