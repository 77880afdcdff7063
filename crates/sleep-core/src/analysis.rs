//! Periodic deep analysis: pattern mining, context optimization and
//! knowledge consolidation over recent history.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::engine::{contained, Engine};
use crate::provider::LogicalRole;
use crate::types::{AnalysisKind, Insight, PatternRecord, RecentContext};
use crate::{SleepError, SleepResult};

/// Interactions summarized for each periodic cycle.
const PERIODIC_HISTORY_LIMIT: usize = 100;
/// Patterns shown to the analyzer per mining prompt.
const MINING_PATTERN_LIMIT: usize = 10;

const VALUABLE_PATTERN_CONFIDENCE: f64 = 0.8;
const AUTOMATION_CONFIDENCE: f64 = 0.9;
const CONTEXT_CONFIDENCE: f64 = 0.8;
const CONSOLIDATION_CONFIDENCE: f64 = 0.9;

/// Group patterns sharing a type, keeping first-seen order. Only groups with
/// more than one member are returned.
pub(crate) fn group_similar_patterns(patterns: &[PatternRecord]) -> Vec<Vec<&PatternRecord>> {
    let mut groups: Vec<(&str, Vec<&PatternRecord>)> = Vec::new();
    for pattern in patterns {
        let key = pattern.type_key();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(pattern),
            None => groups.push((key, vec![pattern])),
        }
    }
    groups
        .into_iter()
        .map(|(_, members)| members)
        .filter(|members| members.len() > 1)
        .collect()
}

/// Field of a mining entry, or the entry itself when the analyzer sent a bare string.
fn entry_text<'a>(entry: &'a Value, field: &str) -> Option<&'a str> {
    entry
        .get(field)
        .and_then(Value::as_str)
        .or_else(|| entry.as_str())
}

impl Engine {
    /// A full interval elapses between the end of one cycle and the start of the next.
    pub(crate) async fn run_periodic_analyzer(self: Arc<Self>) {
        let period = self.config.analysis_interval();
        loop {
            tokio::time::sleep(period).await;
            match contained("periodic_analyzer", self.run_analysis_cycle()).await {
                Some(Ok(generated)) => {
                    info!(insights = generated, "Periodic analysis generated insights")
                }
                Some(Err(e)) => error!(error = %e, "Periodic analysis error"),
                None => {}
            }
        }
    }

    /// One analysis cycle. Each step fails independently; the cycle only
    /// errors when recent history cannot be read.
    pub(crate) async fn run_analysis_cycle(&self) -> SleepResult<usize> {
        let recent = self.history.get_recent_context(PERIODIC_HISTORY_LIMIT).await?;
        let mut insights = Vec::new();

        match self.mine_patterns(&recent).await {
            Ok(found) => insights.extend(found),
            Err(e) => error!(error = %e, "Pattern mining error"),
        }
        match self.optimize_context(&recent).await {
            Ok(found) => insights.extend(found),
            Err(e) => error!(error = %e, "Context optimization error"),
        }
        match self.consolidate_knowledge().await {
            Ok(found) => insights.extend(found),
            Err(e) => error!(error = %e, "Knowledge consolidation error"),
        }

        let generated = insights.len();
        let mut cached = 0;
        for insight in insights {
            if self.cache_insight(insight) {
                cached += 1;
            }
        }
        debug!(generated, cached, "Analysis cycle complete");
        Ok(generated)
    }

    /// Ask the analyzer which stored patterns matter.
    ///
    /// A reply that is not JSON is a provider contract violation and fails
    /// the step with [`SleepError::MalformedReply`].
    pub(crate) async fn mine_patterns(&self, recent: &RecentContext) -> SleepResult<Vec<Insight>> {
        let Some(analyzer) = self.router.primary(LogicalRole::Analyzer) else {
            debug!("No analyzer provider; skipping pattern mining");
            return Ok(Vec::new());
        };

        let patterns = self.patterns.get_all_patterns().await?;
        let shown = &patterns[..patterns.len().min(MINING_PATTERN_LIMIT)];
        let prompt = format!(
            "Analyze the following patterns detected in the system:\n\n\
             Patterns:\n{}\n\n\
             Recent Context:\n{}\n\n\
             Provide insights about:\n\
             1. Which patterns are most valuable\n\
             2. Which patterns might be problematic\n\
             3. Opportunities for automation\n\
             4. Potential improvements\n\n\
             Return as JSON with structure:\n\
             {{\n    \"valuable_patterns\": [...],\n    \"problematic_patterns\": [...],\n    \
             \"automation_opportunities\": [...],\n    \"improvements\": [...]\n}}",
            serde_json::to_string_pretty(shown)?,
            serde_json::to_string_pretty(recent)?,
        );

        let response = analyzer.analyze(&prompt).await?;
        let analysis: Value = serde_json::from_str(&response)
            .map_err(|e| SleepError::malformed("pattern_mining", e))?;

        let mut insights = Vec::new();
        let entries = |key: &str| -> Vec<Value> {
            analysis
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };

        for pattern in entries("valuable_patterns") {
            let name = entry_text(&pattern, "name").unwrap_or("Unknown").to_string();
            let recommendation = pattern
                .get("recommendation")
                .and_then(Value::as_str)
                .unwrap_or("Continue using this pattern")
                .to_string();
            insights.push(Insight::new(
                AnalysisKind::PatternMining,
                VALUABLE_PATTERN_CONFIDENCE,
                format!("Valuable pattern identified: {name}"),
                vec![recommendation],
                pattern,
            ));
        }

        for opportunity in entries("automation_opportunities") {
            let description = entry_text(&opportunity, "description")
                .unwrap_or("Unknown")
                .to_string();
            let steps: Vec<String> = opportunity
                .get("steps")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            insights.push(Insight::new(
                AnalysisKind::PatternMining,
                AUTOMATION_CONFIDENCE,
                format!("Automation opportunity: {description}"),
                steps,
                opportunity,
            ));
        }

        info!(provider = %analyzer.id, insights = insights.len(), "Pattern mining complete");
        Ok(insights)
    }

    pub(crate) async fn optimize_context(&self, recent: &RecentContext) -> SleepResult<Vec<Insight>> {
        let Some(optimizer) = self.router.primary(LogicalRole::Optimizer) else {
            debug!("No optimizer provider; skipping context optimization");
            return Ok(Vec::new());
        };

        let prompt = format!(
            "Analyze context usage patterns:\n\n\
             Most accessed files:\n{}\n\n\
             Total interactions: {}\n\n\
             Provide optimization suggestions:\n\
             1. Which files should always be in context?\n\
             2. Which files are accessed together?\n\
             3. What context is missing?\n\
             4. How to organize context better?\n\n\
             Format as JSON with confidence scores.",
            serde_json::to_string_pretty(&recent.top_files)?,
            recent.total_interactions,
        );

        let response = optimizer.analyze(&prompt).await?;
        let files: Vec<&str> = recent.top_files.iter().take(3).map(|f| f.file.as_str()).collect();

        Ok(vec![Insight::new(
            AnalysisKind::ContextOptimization,
            CONTEXT_CONFIDENCE,
            "Context usage analysis",
            vec![format!("Always include: {}", files.join(", "))],
            json!({ "analysis": response }),
        )])
    }

    pub(crate) async fn consolidate_knowledge(&self) -> SleepResult<Vec<Insight>> {
        let patterns = self.patterns.get_all_patterns().await?;

        let mut insights = Vec::new();
        for group in group_similar_patterns(&patterns) {
            let names: Vec<&str> = group.iter().take(3).map(|p| p.name.as_str()).collect();
            let members = serde_json::to_value(&group)?;
            insights.push(Insight::new(
                AnalysisKind::KnowledgeConsolidation,
                CONSOLIDATION_CONFIDENCE,
                format!("Found {} similar patterns that can be merged", group.len()),
                vec![format!("Merge patterns: {}", names.join(", "))],
                json!({ "patterns": members }),
            ));
        }
        Ok(insights)
    }
}
