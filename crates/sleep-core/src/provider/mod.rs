//! Capability providers and the logical-role routing table.
//!
//! A provider is anything that can `analyze` or `generate` text from a prompt
//! (an LLM endpoint, an agent CLI, a canned mock). The engine never talks to a
//! provider directly: it asks the [`ProviderRouter`] which providers currently
//! serve a [`LogicalRole`] and uses the first one.

mod mock;
mod router;

pub use mock::{MockCall, MockProvider};
pub use router::{ProviderHandle, ProviderRouter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::SleepResult;

/// Per-call options forwarded to providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Backend-specific extras
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// External capability endpoint.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Analyze content and return insights as text.
    async fn analyze(&self, prompt: &str, options: &ProviderOptions) -> SleepResult<String>;

    /// Generate content from a prompt.
    async fn generate(&self, prompt: &str, options: &ProviderOptions) -> SleepResult<String>;
}

/// Logical job a provider is selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalRole {
    Analyzer,
    Generator,
    Optimizer,
    Enhancer,
}

impl LogicalRole {
    pub const ALL: [LogicalRole; 4] = [
        LogicalRole::Analyzer,
        LogicalRole::Generator,
        LogicalRole::Optimizer,
        LogicalRole::Enhancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalRole::Analyzer => "analyzer",
            LogicalRole::Generator => "generator",
            LogicalRole::Optimizer => "optimizer",
            LogicalRole::Enhancer => "enhancer",
        }
    }
}

impl std::fmt::Display for LogicalRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider ids configured for a role: a single id or an ordered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderSelection {
    One(String),
    Many(Vec<String>),
}

impl ProviderSelection {
    pub fn ids(&self) -> Vec<String> {
        match self {
            ProviderSelection::One(id) => vec![id.clone()],
            ProviderSelection::Many(ids) => ids.clone(),
        }
    }
}

impl From<&str> for ProviderSelection {
    fn from(id: &str) -> Self {
        ProviderSelection::One(id.to_string())
    }
}

impl From<Vec<&str>> for ProviderSelection {
    fn from(ids: Vec<&str>) -> Self {
        ProviderSelection::Many(ids.into_iter().map(String::from).collect())
    }
}
