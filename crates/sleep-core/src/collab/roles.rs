//! Regex-trigger role selection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use super::{RoleManager, RoleRecommendation, RoleStatistics, RoleUsage};
use crate::types::{Role, RoleContext};
use crate::{SleepError, SleepResult};

struct CompiledRole {
    role: Arc<Role>,
    triggers: Vec<(Regex, f64)>,
}

impl CompiledRole {
    fn compile(role: Role) -> Self {
        let triggers = role
            .context_triggers
            .iter()
            .filter_map(|trigger| {
                let regex = Regex::new(&format!("(?i){}", trigger.pattern))
                    .or_else(|err| {
                        warn!(role = %role.name, pattern = %trigger.pattern, error = %err, "Invalid trigger; matching literally");
                        Regex::new(&format!("(?i){}", regex::escape(&trigger.pattern)))
                    })
                    .ok()?;
                Some((regex, trigger.weight))
            })
            .collect();
        Self {
            role: Arc::new(role),
            triggers,
        }
    }

    /// Matched trigger weight over total trigger weight.
    fn score(&self, context: &RoleContext) -> f64 {
        let total: f64 = self.triggers.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return 0.0;
        }

        let candidates = context
            .files
            .iter()
            .chain(context.recent_actions.iter())
            .map(String::as_str)
            .chain(std::iter::once(context.task_description.as_str()))
            .filter(|text| !text.is_empty());

        let texts: Vec<&str> = candidates.collect();
        let matched: f64 = self
            .triggers
            .iter()
            .filter(|(regex, _)| texts.iter().any(|text| regex.is_match(text)))
            .map(|(_, w)| w)
            .sum();
        matched / total
    }
}

/// Picks the best-scoring role whose score clears its own threshold.
///
/// Ties go to the role declared first.
pub struct TriggerRoleManager {
    roles: Vec<CompiledRole>,
    usage: Mutex<BTreeMap<String, RoleUsage>>,
}

impl TriggerRoleManager {
    pub fn new(roles: Vec<Role>) -> Self {
        Self {
            roles: roles.into_iter().map(CompiledRole::compile).collect(),
            usage: Mutex::new(BTreeMap::new()),
        }
    }

    fn scored(&self, context: &RoleContext) -> Vec<(f64, &CompiledRole)> {
        let mut scored: Vec<(f64, &CompiledRole)> = self
            .roles
            .iter()
            .map(|compiled| (compiled.score(context), compiled))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
    }
}

#[async_trait]
impl RoleManager for TriggerRoleManager {
    async fn initialize(&self) -> SleepResult<()> {
        debug!(roles = self.roles.len(), "Role manager initialized");
        Ok(())
    }

    async fn get_active_role(&self, context: &RoleContext) -> SleepResult<Option<Arc<Role>>> {
        Ok(self
            .scored(context)
            .into_iter()
            .find(|(score, compiled)| *score >= compiled.role.confidence_threshold)
            .map(|(_, compiled)| Arc::clone(&compiled.role)))
    }

    async fn update_role_performance(&self, role: &str, success: bool) -> SleepResult<()> {
        let mut usage = self
            .usage
            .lock()
            .map_err(|_| SleepError::LockPoisoned("role usage"))?;
        let entry = usage.entry(role.to_string()).or_default();
        entry.uses += 1;
        if success {
            entry.successes += 1;
        }
        Ok(())
    }

    fn get_role_statistics(&self) -> RoleStatistics {
        let usage = self
            .usage
            .lock()
            .map(|usage| usage.clone())
            .unwrap_or_default();
        RoleStatistics {
            total_roles: self.roles.len(),
            usage,
        }
    }

    async fn get_role_recommendations(
        &self,
        context: &RoleContext,
    ) -> SleepResult<Vec<RoleRecommendation>> {
        Ok(self
            .scored(context)
            .into_iter()
            .map(|(score, compiled)| RoleRecommendation {
                role: compiled.role.name.clone(),
                score,
                description: compiled.role.description.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TriggerRoleManager {
        TriggerRoleManager::new(vec![
            Role::new("tester", "Writes tests").with_trigger(r"test").with_trigger(r"_spec\.rs$"),
            Role::new("debugger", "Chases bugs").with_trigger("debug").with_trigger("[unclosed"),
        ])
    }

    fn context(files: &[&str], actions: &[&str]) -> RoleContext {
        RoleContext {
            task_description: String::new(),
            files: files.iter().map(|s| s.to_string()).collect(),
            recent_actions: actions.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_best_role_above_threshold() {
        let manager = manager();
        let role = manager
            .get_active_role(&context(&["src/lib.rs"], &["run_tests"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.name, "tester");

        let none = manager.get_active_role(&context(&["README.md"], &["read"])).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_invalid_trigger_matches_literally() {
        let manager = manager();
        let role = manager
            .get_active_role(&context(&[], &["debug", "open [unclosed"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.name, "debugger");
    }

    #[tokio::test]
    async fn test_usage_statistics() {
        let manager = manager();
        manager.update_role_performance("tester", true).await.unwrap();
        manager.update_role_performance("tester", false).await.unwrap();

        let stats = manager.get_role_statistics();
        assert_eq!(stats.total_roles, 2);
        assert_eq!(stats.usage["tester"].uses, 2);
        assert_eq!(stats.usage["tester"].success_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_recommendations_ranked() {
        let manager = manager();
        let recs = manager
            .get_role_recommendations(&context(&["a_spec.rs"], &["test", "debug"]))
            .await
            .unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].role, "tester");
        assert_eq!(recs[0].score, 1.0);
        assert_eq!(recs[1].score, 0.5);
    }
}
