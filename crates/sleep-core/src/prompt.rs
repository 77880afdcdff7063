//! Prompt enhancement through the enhancer provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::engine::{guarded, Engine};
use crate::provider::LogicalRole;
use crate::types::RoleContext;
use crate::SleepResult;

/// Enhanced query plus supporting suggestions.
///
/// Degraded results keep `enhanced` equal to the original query and explain
/// why in `reasoning`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptRecommendation {
    pub original: String,
    pub enhanced: String,
    pub context_suggestions: Vec<Value>,
    pub examples: Vec<Value>,
    pub format: String,
    pub reasoning: String,
}

impl PromptRecommendation {
    fn degraded(query: &str, reasoning: impl Into<String>) -> Self {
        Self {
            original: query.to_string(),
            enhanced: query.to_string(),
            reasoning: reasoning.into(),
            ..Default::default()
        }
    }
}

fn array_field(reply: &Value, key: &str) -> Vec<Value> {
    reply
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn string_field<'a>(reply: &'a Value, key: &str) -> Option<&'a str> {
    reply.get(key).and_then(Value::as_str)
}

impl Engine {
    /// Never fails: provider or store errors, and panics, come back as a
    /// degraded recommendation.
    pub(crate) async fn prompt_recommendation(
        &self,
        query: &str,
        context: &RoleContext,
    ) -> PromptRecommendation {
        guarded("prompt_recommendation", self.enhance_prompt(query, context))
            .await
            .unwrap_or_else(|panic| PromptRecommendation::degraded(query, format!("Error: {panic}")))
    }

    async fn enhance_prompt(&self, query: &str, context: &RoleContext) -> PromptRecommendation {
        let Some(enhancer) = self.router.primary(LogicalRole::Enhancer) else {
            return PromptRecommendation::degraded(query, "No enhancer LLM available");
        };

        let response = match self.enhancement_request(&enhancer, query, context).await {
            Ok(response) => response,
            Err(e) => {
                error!(provider = %enhancer.id, error = %e, "Prompt recommendation error");
                return PromptRecommendation::degraded(query, format!("Error: {e}"));
            }
        };

        let reply: Value = match serde_json::from_str(&response) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(provider = %enhancer.id, error = %e, "Unparseable enhancement");
                return PromptRecommendation::degraded(query, "Failed to parse enhancement");
            }
        };
        debug!(provider = %enhancer.id, "Prompt enhanced");

        PromptRecommendation {
            original: query.to_string(),
            enhanced: string_field(&reply, "query").unwrap_or(query).to_string(),
            context_suggestions: array_field(&reply, "context"),
            examples: array_field(&reply, "examples"),
            format: string_field(&reply, "format").unwrap_or_default().to_string(),
            reasoning: string_field(&reply, "reasoning").unwrap_or_default().to_string(),
        }
    }

    async fn enhancement_request(
        &self,
        enhancer: &crate::provider::ProviderHandle,
        query: &str,
        context: &RoleContext,
    ) -> SleepResult<String> {
        let patterns = self.patterns.get_all_patterns().await?;
        let preferences = self.patterns.get_preferences().await?;

        let prompt = format!(
            "Enhance this query for better results:\n\n\
             Original query: {query}\n\
             Current context files: {:?}\n\
             Known patterns: {}\n\
             Preferences: {}\n\n\
             Provide:\n\
             1. Enhanced query with better specificity\n\
             2. Relevant context to include\n\
             3. Examples from similar past queries\n\
             4. Suggested output format\n\n\
             Return as JSON.",
            context.files,
            patterns.len(),
            serde_json::to_string_pretty(&preferences)?,
        );

        enhancer.generate(&prompt).await
    }
}
