//! Core data model shared by the engine and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata key injected by intake with the active role name
pub const META_ACTIVE_ROLE: &str = "active_role";
/// Metadata key injected by intake with the active role's confidence threshold
pub const META_ROLE_CONFIDENCE: &str = "role_confidence";
/// Metadata key read by the batch processor as the interaction's file path
pub const META_FILE_PATH: &str = "file_path";

/// Single observation of the foreground agent's behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub interaction_type: String,
    pub query: String,
    #[serde(default)]
    pub context_used: Map<String, Value>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub tokens_used: u64,
    /// Latency in seconds
    #[serde(default)]
    pub latency: f64,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_success() -> bool {
    true
}

impl Observation {
    /// Create a successful, zero-cost observation; adjust fields with the `with_*` helpers.
    pub fn new(interaction_type: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            interaction_type: interaction_type.into(),
            query: query.into(),
            context_used: Map::new(),
            response: String::new(),
            tokens_used: 0,
            latency: 0.0,
            success: true,
            metadata: Map::new(),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// File path the interaction touched, if the caller recorded one
    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get(META_FILE_PATH).and_then(Value::as_str)
    }
}

/// Kind of analysis that produced an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    PatternMining,
    ContextOptimization,
    PromptEnhancement,
    KnowledgeConsolidation,
    ErrorAnalysis,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::PatternMining => "pattern_mining",
            AnalysisKind::ContextOptimization => "context_optimization",
            AnalysisKind::PromptEnhancement => "prompt_enhancement",
            AnalysisKind::KnowledgeConsolidation => "knowledge_consolidation",
            AnalysisKind::ErrorAnalysis => "error_analysis",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insight derived from analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    /// Unique insight ID
    pub id: Uuid,
    pub kind: AnalysisKind,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,
    pub description: String,
    pub recommendations: Vec<String>,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn new(
        kind: AnalysisKind,
        confidence: f64,
        description: impl Into<String>,
        recommendations: Vec<String>,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            confidence,
            description: description.into(),
            recommendations,
            data,
            created_at: Utc::now(),
        }
    }

    /// Whether this insight clears the configured minimum confidence
    pub fn is_confident(&self, min_confidence: f64) -> bool {
        self.confidence >= min_confidence
    }
}

/// Pattern record held by the pattern store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub name: String,
    #[serde(default)]
    pub pattern_type: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sequence: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl PatternRecord {
    /// Grouping key used by knowledge consolidation
    pub fn type_key(&self) -> &str {
        self.pattern_type.as_deref().unwrap_or("unknown")
    }
}

/// Preference record held by the pattern store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub key: String,
    pub value: String,
    pub category: String,
    pub confidence: f64,
    pub source: String,
}

/// Details persisted with every logged interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionDetails {
    pub query: String,
    pub tokens: u64,
    pub latency: f64,
    pub success: bool,
}

/// One interaction as returned by the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub action: String,
    #[serde(default)]
    pub file_path: Option<String>,
    pub details: InteractionDetails,
    pub timestamp: DateTime<Utc>,
}

/// Access count for a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAccess {
    pub file: String,
    pub count: usize,
}

/// Summary of recent history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentContext {
    pub top_files: Vec<FileAccess>,
    pub total_interactions: usize,
    pub recent_interactions: Vec<InteractionRecord>,
}

/// A pattern that activates a role when it matches the current context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextTrigger {
    pub pattern: String,
    #[serde(default = "default_trigger_weight")]
    pub weight: f64,
}

fn default_trigger_weight() -> f64 {
    1.0
}

/// Named behavioral profile selected by the role manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_role_threshold")]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub tool_preferences: BTreeMap<String, f64>,
    #[serde(default)]
    pub context_triggers: Vec<ContextTrigger>,
}

fn default_role_threshold() -> f64 {
    0.5
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            confidence_threshold: default_role_threshold(),
            tool_preferences: BTreeMap::new(),
            context_triggers: Vec::new(),
        }
    }

    pub fn with_trigger(mut self, pattern: impl Into<String>) -> Self {
        self.context_triggers.push(ContextTrigger {
            pattern: pattern.into(),
            weight: default_trigger_weight(),
        });
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>, weight: f64) -> Self {
        self.tool_preferences.insert(tool.into(), weight);
        self
    }

    /// Trigger patterns in declaration order
    pub fn trigger_patterns(&self) -> Vec<String> {
        self.context_triggers.iter().map(|t| t.pattern.clone()).collect()
    }

    /// Up to `limit` preferred tools, highest weight first
    pub fn top_tools(&self, limit: usize) -> Vec<&str> {
        let mut tools: Vec<(&String, &f64)> = self.tool_preferences.iter().collect();
        tools.sort_by(|a, b| b.1.total_cmp(a.1));
        tools.into_iter().take(limit).map(|(name, _)| name.as_str()).collect()
    }

    /// Prompt preamble describing this role
    pub fn to_prompt_context(&self) -> String {
        let mut context = format!("Active role: {}\n{}", self.name, self.description);
        let tools = self.top_tools(5);
        if !tools.is_empty() {
            context.push_str(&format!("\nPreferred tools: {}", tools.join(", ")));
        }
        context
    }
}

/// Lightweight context snapshot handed to the role manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleContext {
    #[serde(default)]
    pub task_description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub recent_actions: Vec<String>,
}

impl RoleContext {
    pub fn from_recent(recent: &RecentContext) -> Self {
        Self {
            task_description: String::new(),
            files: recent.top_files.iter().map(|f| f.file.clone()).collect(),
            recent_actions: recent
                .recent_interactions
                .iter()
                .map(|i| i.action.clone())
                .collect(),
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
