//! Current-role tracking and role-based prompt shaping.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::engine::{contained, guarded, Engine};
use crate::types::{AnalysisKind, Insight, Role, RoleContext};
use crate::SleepResult;

/// Interactions summarized for each role check.
const ROLE_HISTORY_LIMIT: usize = 20;
const ROLE_CHANGE_CONFIDENCE: f64 = 0.8;
const PROMPT_TOOL_LIMIT: usize = 3;

/// The single current-role reference.
///
/// Read by intake on every observation, swapped wholesale by the role
/// monitor and by role-based prompting; never mutated in place.
#[derive(Default)]
pub struct RoleSlot {
    current: RwLock<Option<Arc<Role>>>,
}

impl RoleSlot {
    pub fn get(&self) -> Option<Arc<Role>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `role` and return what it replaced.
    pub fn replace(&self, role: Option<Arc<Role>>) -> Option<Arc<Role>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, role)
    }
}

fn same_role(a: &Option<Arc<Role>>, b: &Option<Arc<Role>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.name == b.name,
        (None, None) => true,
        _ => false,
    }
}

/// Result of role-based prompt shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBasedPrompt {
    pub original: String,
    pub enhanced: String,
    pub role: Option<String>,
    pub role_context: String,
    pub reasoning: String,
}

impl RoleBasedPrompt {
    fn unchanged(query: &str) -> Self {
        Self {
            original: query.to_string(),
            enhanced: query.to_string(),
            role: None,
            role_context: String::new(),
            reasoning: String::new(),
        }
    }
}

impl Engine {
    pub(crate) async fn run_role_monitor(self: Arc<Self>) {
        let period = self.config.role_check_interval();
        loop {
            tokio::time::sleep(period).await;
            if let Some(Err(e)) = contained("role_monitor", self.check_active_role()).await {
                error!(error = %e, "Role monitoring error");
            }
        }
    }

    /// Re-evaluate the active role against recent history. Returns whether it changed.
    pub(crate) async fn check_active_role(&self) -> SleepResult<bool> {
        let recent = self.history.get_recent_context(ROLE_HISTORY_LIMIT).await?;
        let context = RoleContext::from_recent(&recent);
        let new_role = self.roles.get_active_role(&context).await?;

        let previous = self.current_role.replace(new_role.clone());
        if same_role(&previous, &new_role) {
            return Ok(false);
        }

        let name = new_role.as_ref().map_or("None", |r| r.name.as_str());
        info!(role = %name, "Active role changed");

        if let Some(role) = new_role {
            self.cache_insight(Insight::new(
                AnalysisKind::ContextOptimization,
                ROLE_CHANGE_CONFIDENCE,
                format!("Role activated: {}", role.name),
                vec![role.description.clone()],
                json!({
                    "role": role.name,
                    "triggers": role.trigger_patterns(),
                }),
            ));
        }
        Ok(true)
    }

    /// Shape a query with the role that fits `context`, making it current.
    ///
    /// A panicking role manager yields the unchanged query with an error reason.
    pub(crate) async fn role_based_prompt(&self, query: &str, context: &RoleContext) -> RoleBasedPrompt {
        guarded("role_based_prompt", self.apply_role(query, context))
            .await
            .unwrap_or_else(|panic| {
                let mut result = RoleBasedPrompt::unchanged(query);
                result.reasoning = format!("Error: {panic}");
                result
            })
    }

    async fn apply_role(&self, query: &str, context: &RoleContext) -> RoleBasedPrompt {
        let mut result = RoleBasedPrompt::unchanged(query);

        let role = match self.roles.get_active_role(context).await {
            Ok(role) => role,
            Err(e) => {
                error!(error = %e, "Role lookup failed");
                result.reasoning = format!("Error: {e}");
                return result;
            }
        };
        self.current_role.replace(role.clone());

        let Some(role) = role else {
            return result;
        };

        result.role = Some(role.name.clone());
        result.role_context = role.to_prompt_context();
        let tools = role.top_tools(PROMPT_TOOL_LIMIT);
        if !tools.is_empty() {
            result.enhanced = format!("{query} (Consider using: {})", tools.join(", "));
        }
        result.reasoning = format!("Applied '{}' role based on context", role.name);

        if let Err(e) = self.roles.update_role_performance(&role.name, true).await {
            warn!(role = %role.name, error = %e, "Failed to record role usage");
        }
        result
    }
}
