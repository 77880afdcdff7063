//! Observation intake and inline analysis of critical observations.

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::CriticalThresholds;
use crate::engine::{contained, Engine, EngineStats};
use crate::provider::LogicalRole;
use crate::types::{AnalysisKind, Insight, Observation, META_ACTIVE_ROLE, META_ROLE_CONFIDENCE};

const FAILURE_CONFIDENCE: f64 = 0.85;
const LATENCY_CONFIDENCE: f64 = 0.75;
const TOKEN_CONFIDENCE: f64 = 0.7;

/// Why an observation bypasses the queue for inline analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Failure,
    HighLatency,
    HighTokenUsage,
}

impl Criticality {
    /// Classify an observation; failure outranks latency, which outranks tokens.
    pub fn classify(observation: &Observation, thresholds: &CriticalThresholds) -> Option<Self> {
        if !observation.success {
            Some(Criticality::Failure)
        } else if observation.latency > thresholds.latency_secs {
            Some(Criticality::HighLatency)
        } else if observation.tokens_used > thresholds.tokens {
            Some(Criticality::HighTokenUsage)
        } else {
            None
        }
    }
}

fn performance_insight(observation: &Observation) -> Insight {
    Insight::new(
        AnalysisKind::ContextOptimization,
        LATENCY_CONFIDENCE,
        format!("High latency detected: {:?}s", observation.latency),
        vec![
            "Reduce context size".to_string(),
            "Pre-compute common queries".to_string(),
            "Cache frequent responses".to_string(),
        ],
        json!({
            "latency": observation.latency,
            "query_type": observation.interaction_type,
        }),
    )
}

fn resource_insight(observation: &Observation) -> Insight {
    Insight::new(
        AnalysisKind::ContextOptimization,
        TOKEN_CONFIDENCE,
        format!("High token usage: {}", observation.tokens_used),
        vec![
            "Compress context".to_string(),
            "Use more specific queries".to_string(),
            "Remove redundant information".to_string(),
        ],
        json!({
            "tokens": observation.tokens_used,
            "query_type": observation.interaction_type,
        }),
    )
}

impl Engine {
    /// Accept an observation: tag it with the active role, queue it, and
    /// analyze it inline if it is critical.
    pub async fn observe(&self, mut observation: Observation) {
        if let Some(role) = self.current_role.get() {
            observation
                .metadata
                .insert(META_ACTIVE_ROLE.to_string(), Value::from(role.name.clone()));
            observation.metadata.insert(
                META_ROLE_CONFIDENCE.to_string(),
                json!(role.confidence_threshold),
            );
        }
        EngineStats::bump(&self.stats.observations);

        let critical = Criticality::classify(&observation, &self.config.thresholds)
            .map(|criticality| (criticality, observation.clone()));
        self.enqueue(observation);

        if let Some((criticality, observation)) = critical {
            EngineStats::bump(&self.stats.critical_observations);
            debug!(?criticality, interaction_type = %observation.interaction_type, "Critical observation");
            contained("immediate_analysis", self.analyze_immediately(criticality, &observation)).await;
        }
    }

    async fn analyze_immediately(&self, criticality: Criticality, observation: &Observation) {
        let insight = match criticality {
            Criticality::Failure => self.analyze_failure(observation).await,
            Criticality::HighLatency => Some(performance_insight(observation)),
            Criticality::HighTokenUsage => Some(resource_insight(observation)),
        };
        let Some(insight) = insight else {
            return;
        };

        // applied directly: never enters the cache, so it cannot evict or be drained twice
        if self.admit_insight(&insight) {
            self.apply_and_record(&insight).await;
        }
    }

    async fn analyze_failure(&self, observation: &Observation) -> Option<Insight> {
        let Some(analyzer) = self.router.primary(LogicalRole::Analyzer) else {
            warn!("No analyzer provider available; skipping failure analysis");
            return None;
        };

        let context = serde_json::to_string_pretty(&observation.context_used).unwrap_or_default();
        let prompt = format!(
            "Analyze this failed interaction:\n\n\
             Query: {}\n\
             Context used: {}\n\
             Error/Response: {}\n\n\
             Identify:\n\
             1. Root cause of failure\n\
             2. Missing context or knowledge\n\
             3. How to prevent similar failures\n\n\
             Provide specific recommendations.",
            observation.query, context, observation.response
        );

        match analyzer.analyze(&prompt).await {
            Ok(analysis) => {
                info!(provider = %analyzer.id, "Failure analyzed");
                Some(Insight::new(
                    AnalysisKind::ErrorAnalysis,
                    FAILURE_CONFIDENCE,
                    "Failure analysis",
                    vec![analysis.clone()],
                    json!({
                        "observation": observation,
                        "analysis": analysis,
                    }),
                ))
            }
            Err(e) => {
                error!(provider = %analyzer.id, error = %e, "Failure analysis error");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::PatternStore;
    use crate::config::SleepConfig;
    use crate::provider::{MockCall, MockProvider};
    use crate::testing::{fixture, fixture_with_provider, Fixture, PanickingProvider};
    use std::sync::Arc;

    #[test]
    fn test_classification_priority() {
        let thresholds = CriticalThresholds::default();
        let classify = |o: &Observation| Criticality::classify(o, &thresholds);

        let failed_and_slow = Observation::new("edit", "q").with_success(false).with_latency(30.0);
        assert_eq!(classify(&failed_and_slow), Some(Criticality::Failure));

        let slow_and_big = Observation::new("edit", "q").with_latency(15.0).with_tokens(20_000);
        assert_eq!(classify(&slow_and_big), Some(Criticality::HighLatency));

        let big = Observation::new("edit", "q").with_tokens(20_000);
        assert_eq!(classify(&big), Some(Criticality::HighTokenUsage));

        // thresholds are strict
        let edge = Observation::new("edit", "q").with_latency(10.0).with_tokens(10_000);
        assert_eq!(classify(&edge), None);
    }

    #[test]
    fn test_latency_description() {
        let insight = performance_insight(&Observation::new("search", "q").with_latency(15.0));
        assert_eq!(insight.description, "High latency detected: 15.0s");
        assert_eq!(insight.confidence, 0.75);
        assert_eq!(insight.data["query_type"], "search");

        // exact value, no rounding
        let barely = performance_insight(&Observation::new("search", "q").with_latency(10.04));
        assert_eq!(barely.description, "High latency detected: 10.04s");
    }

    #[tokio::test]
    async fn test_slow_call_below_min_confidence_is_discarded() {
        let config = SleepConfig::default().with_min_confidence(0.8);
        let Fixture { engine, .. } = fixture(config, vec![]);

        engine
            .observe(Observation::new("search", "q").with_latency(15.0).with_tokens(500))
            .await;

        let stats = engine.stats_snapshot();
        assert_eq!(stats.critical_observations, 1);
        assert_eq!(stats.insights_discarded, 1);
        assert_eq!(stats.insights_applied, 0);
        assert!(engine.cache.is_empty());
    }

    #[tokio::test]
    async fn test_slow_call_applied_at_default_confidence() {
        let Fixture { engine, .. } = fixture(SleepConfig::default(), vec![]);
        let observation = Observation::new("search", "q").with_latency(15.0).with_tokens(500);
        assert!(performance_insight(&observation).description.contains("15.0"));

        engine.observe(observation).await;

        let stats = engine.stats_snapshot();
        assert_eq!(stats.insights_discarded, 0);
        assert_eq!(stats.insights_applied, 1);
        assert!(engine.cache.is_empty());
    }

    #[tokio::test]
    async fn test_inline_insight_does_not_evict_cached_ones() {
        let mut config = SleepConfig::default();
        config.insight_cache_capacity = 1;
        let Fixture { engine, .. } = fixture(config, vec![]);
        engine.cache_insight(Insight::new(
            AnalysisKind::KnowledgeConsolidation,
            0.9,
            "Found 2 similar patterns that can be merged",
            vec![],
            json!({}),
        ));

        engine.observe(Observation::new("search", "q").with_latency(15.0)).await;

        let stats = engine.stats_snapshot();
        assert_eq!(stats.insights_evicted, 0);
        assert_eq!(stats.insights_applied, 1);
        let pending = engine.cache.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, AnalysisKind::KnowledgeConsolidation);
    }

    #[tokio::test]
    async fn test_panicking_analyzer_does_not_reach_caller() {
        let engine = fixture_with_provider(SleepConfig::default(), "claude", Arc::new(PanickingProvider));

        let observer = engine.clone();
        let result = tokio::spawn(async move {
            observer
                .observe(Observation::new("edit", "q").with_success(false))
                .await;
        })
        .await;

        assert!(result.is_ok());
        let stats = engine.stats_snapshot();
        assert_eq!(stats.observations, 1);
        assert_eq!(stats.insights_applied, 0);
        // still queued for the batch processor
        assert!(engine.queue_rx.lock().await.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_failure_analyzed_and_applied_inline() {
        let mock = Arc::new(MockProvider::new().with_analysis("missing import"));
        let Fixture { engine, store, .. } = fixture(SleepConfig::default(), vec![("claude", mock.clone())]);

        engine
            .observe(Observation::new("edit", "add feature").with_success(false))
            .await;

        assert!(matches!(&mock.calls()[0], MockCall::Analyze(p) if p.contains("add feature")));
        let patterns = store.get_all_patterns().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].name, "Error pattern");
        assert_eq!(patterns[0].pattern_type.as_deref(), Some("error"));

        // applied exactly once and never left behind for the applicator
        assert!(engine.cache.is_empty());
        let stats = engine.stats_snapshot();
        assert_eq!(stats.insights_applied, 1);
        assert_eq!(stats.critical_observations, 1);
    }

    #[tokio::test]
    async fn test_failure_without_analyzer_still_queued() {
        let Fixture { engine, .. } = fixture(SleepConfig::default(), vec![]);

        engine
            .observe(Observation::new("edit", "q").with_success(false))
            .await;

        let queued = engine.queue_rx.lock().await.try_recv().unwrap();
        assert!(!queued.success);
        assert_eq!(engine.stats_snapshot().insights_cached, 0);
    }

    #[tokio::test]
    async fn test_provider_error_is_swallowed() {
        let mock = Arc::new(MockProvider::new().failing("timeout"));
        let Fixture { engine, .. } = fixture(SleepConfig::default(), vec![("claude", mock)]);

        engine
            .observe(Observation::new("edit", "q").with_success(false))
            .await;
        assert_eq!(engine.stats_snapshot().insights_cached, 0);
    }

    #[tokio::test]
    async fn test_token_insight_respects_min_confidence() {
        let config = SleepConfig::default().with_min_confidence(0.72);
        let Fixture { engine, .. } = fixture(config, vec![]);

        engine.observe(Observation::new("search", "q").with_tokens(50_000)).await;
        let stats = engine.stats_snapshot();
        assert_eq!(stats.insights_discarded, 1);
        assert_eq!(stats.insights_applied, 0);
    }

    #[tokio::test]
    async fn test_role_tagged_on_intake() {
        let Fixture { engine, .. } = fixture(SleepConfig::default(), vec![]);
        engine
            .current_role
            .replace(Some(Arc::new(crate::types::Role::new("tester", "Writes tests"))));

        engine.observe(Observation::new("edit", "q")).await;
        let queued = engine.queue_rx.lock().await.try_recv().unwrap();
        assert_eq!(queued.metadata[META_ACTIVE_ROLE], "tester");
        assert_eq!(queued.metadata[META_ROLE_CONFIDENCE], 0.5);
    }
}
