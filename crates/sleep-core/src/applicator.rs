//! Turns cached insights into pattern and preference records.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::engine::{contained, Engine, EngineStats};
use crate::types::{truncate_chars, AnalysisKind, Insight, PatternRecord, PreferenceRecord};
use crate::SleepResult;

const ALWAYS_INCLUDE_PREFIX: &str = "Always include:";
const PATTERN_NAME_LIMIT: usize = 50;

impl Engine {
    pub(crate) async fn run_insight_applicator(self: Arc<Self>) {
        let period = self.config.application_interval();
        loop {
            tokio::time::sleep(period).await;
            let applied = self.drain_insights().await;
            if applied > 0 {
                info!(count = applied, "Drained insight cache");
            }
        }
    }

    /// Pop and apply cached insights oldest first until the cache is empty.
    ///
    /// Each insight leaves the cache before it is applied; a failed
    /// application is logged and the insight is not re-queued.
    pub(crate) async fn drain_insights(&self) -> usize {
        let mut drained = 0;
        while let Some(insight) = self.cache.pop_front() {
            drained += 1;
            self.apply_and_record(&insight).await;
        }
        drained
    }

    pub(crate) async fn apply_and_record(&self, insight: &Insight) {
        match contained("insight_applicator", self.apply_insight(insight)).await {
            Some(Ok(())) => {
                EngineStats::bump(&self.stats.insights_applied);
                info!(kind = %insight.kind, id = %insight.id, "Applied insight");
            }
            Some(Err(e)) => {
                EngineStats::bump(&self.stats.insights_failed);
                error!(kind = %insight.kind, id = %insight.id, error = %e, "Failed to apply insight");
            }
            None => EngineStats::bump(&self.stats.insights_failed),
        }
    }

    async fn apply_insight(&self, insight: &Insight) -> SleepResult<()> {
        match insight.kind {
            AnalysisKind::PatternMining => {
                let pattern_type = insight.data.get("type").and_then(Value::as_str);
                let description = insight.data.get("description").and_then(Value::as_str);
                if let (Some(pattern_type), Some(description)) = (pattern_type, description) {
                    self.patterns
                        .add_pattern(PatternRecord {
                            name: format!("Sleep: {}", truncate_chars(description, PATTERN_NAME_LIMIT)),
                            pattern_type: Some(pattern_type.to_string()),
                            description: description.to_string(),
                            sequence: Vec::new(),
                            confidence: insight.confidence,
                            source: Some("sleep_analysis".to_string()),
                            metadata: None,
                        })
                        .await?;
                }
            }
            AnalysisKind::ContextOptimization => {
                for recommendation in &insight.recommendations {
                    let Some(rest) = recommendation.strip_prefix(ALWAYS_INCLUDE_PREFIX) else {
                        continue;
                    };
                    let files = rest.trim();
                    if files.is_empty() {
                        debug!("Skipping empty always-include recommendation");
                        continue;
                    }
                    self.patterns
                        .add_preference(PreferenceRecord {
                            key: "always_include_files".to_string(),
                            value: files.to_string(),
                            category: "context".to_string(),
                            confidence: insight.confidence,
                            source: "sleep".to_string(),
                        })
                        .await?;
                }
            }
            AnalysisKind::ErrorAnalysis => {
                self.patterns
                    .add_pattern(PatternRecord {
                        name: "Error pattern".to_string(),
                        pattern_type: Some("error".to_string()),
                        description: insight.description.clone(),
                        sequence: Vec::new(),
                        confidence: insight.confidence,
                        source: None,
                        metadata: Some(insight.data.clone()),
                    })
                    .await?;
            }
            AnalysisKind::PromptEnhancement | AnalysisKind::KnowledgeConsolidation => {
                debug!(kind = %insight.kind, "No application for insight kind");
            }
        }
        Ok(())
    }
}
