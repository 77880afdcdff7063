//! Interaction-derived world model kept in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Constraint, Entity, Goal, Relation, WorldInsights, WorldModel, WorldSnapshot};
use crate::SleepResult;

const GOAL_HISTORY: usize = 20;
const RECENT_GOALS: usize = 10;
const DOMAIN_CONFIDENCE_STEP: f64 = 0.1;

#[derive(Default)]
struct WorldState {
    domain: String,
    domain_confidence: f64,
    interaction_count: u64,
    successes: u64,
    goals: Vec<Goal>,
    entities: BTreeMap<String, Entity>,
    relations: Vec<Relation>,
    constraints: BTreeMap<String, Constraint>,
}

impl WorldState {
    fn touch_entity(&mut self, id: String, entity_type: &str) {
        let entity = self.entities.entry(id.clone()).or_insert_with(|| Entity {
            id,
            entity_type: entity_type.to_string(),
            properties: Map::new(),
        });
        let count = entity.interaction_count() + 1;
        entity
            .properties
            .insert("interaction_count".to_string(), Value::from(count));
    }

    fn observe_relation(&mut self, relation_type: &str, source_id: &str, target_id: &str) {
        let existing = self.relations.iter().position(|r| {
            r.relation_type == relation_type && r.source_id == source_id && r.target_id == target_id
        });
        let index = match existing {
            Some(index) => index,
            None => {
                self.relations.push(Relation {
                    relation_type: relation_type.to_string(),
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    confidence: 0.0,
                    observed_count: 0,
                });
                self.relations.len() - 1
            }
        };
        let relation = &mut self.relations[index];
        relation.observed_count += 1;
        relation.confidence = 1.0 - 1.0 / (relation.observed_count as f64 + 1.0);
    }
}

/// Builds entities, relations and goals from interaction JSON.
///
/// Recognized keys: `domain`, `user_query`, `success`, `action`, `file_path`
/// and `actions_taken[].action`. Consecutive actions are linked with a
/// `followed_by` relation.
#[derive(Default)]
pub struct InMemoryWorldModel {
    state: Mutex<Option<WorldState>>,
}

impl InMemoryWorldModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<WorldState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn action_names(interaction: &Value) -> Vec<String> {
    let mut names: Vec<String> = interaction
        .get("actions_taken")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|a| a.get("action").and_then(Value::as_str))
        .map(String::from)
        .collect();
    if let Some(action) = interaction.get("action").and_then(Value::as_str) {
        names.push(action.to_string());
    }
    names
}

#[async_trait]
impl WorldModel for InMemoryWorldModel {
    async fn infer_from_interaction(&self, interaction: &Value) -> SleepResult<()> {
        let mut guard = self.lock();
        let state = guard.get_or_insert_with(WorldState::default);

        state.interaction_count += 1;
        let success = interaction
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if success {
            state.successes += 1;
        }

        if let Some(domain) = interaction.get("domain").and_then(Value::as_str) {
            if state.domain == domain {
                state.domain_confidence = (state.domain_confidence + DOMAIN_CONFIDENCE_STEP).min(1.0);
            } else {
                state.domain = domain.to_string();
                state.domain_confidence = DOMAIN_CONFIDENCE_STEP;
            }
        }

        if let Some(query) = interaction.get("user_query").and_then(Value::as_str) {
            state.goals.push(Goal {
                description: query.to_string(),
                achieved: success,
            });
            if state.goals.len() > GOAL_HISTORY {
                let excess = state.goals.len() - GOAL_HISTORY;
                state.goals.drain(..excess);
            }
        }

        if let Some(path) = interaction.get("file_path").and_then(Value::as_str) {
            state.touch_entity(format!("file:{path}"), "file");
        }

        let actions = action_names(interaction);
        for action in &actions {
            state.touch_entity(format!("action:{action}"), "action");
        }
        for pair in actions.windows(2) {
            state.observe_relation(
                "followed_by",
                &format!("action:{}", pair[0]),
                &format!("action:{}", pair[1]),
            );
        }

        Ok(())
    }

    fn get_insights(&self) -> SleepResult<WorldInsights> {
        let guard = self.lock();
        let Some(state) = guard.as_ref() else {
            return Ok(WorldInsights {
                success_rate: 1.0,
                ..Default::default()
            });
        };

        let entity_types: BTreeSet<&str> =
            state.entities.values().map(|e| e.entity_type.as_str()).collect();
        let relation_types: BTreeSet<&str> =
            state.relations.iter().map(|r| r.relation_type.as_str()).collect();
        let start = state.goals.len().saturating_sub(RECENT_GOALS);

        Ok(WorldInsights {
            domain: state.domain.clone(),
            domain_confidence: state.domain_confidence,
            recent_goals: state.goals[start..].to_vec(),
            success_rate: if state.interaction_count == 0 {
                1.0
            } else {
                state.successes as f64 / state.interaction_count as f64
            },
            entity_type_diversity: entity_types.len(),
            relation_type_diversity: relation_types.len(),
            discovered_entity_types: entity_types.into_iter().map(String::from).collect(),
            discovered_relation_types: relation_types.into_iter().map(String::from).collect(),
            total_entities: state.entities.len(),
            total_relations: state.relations.len(),
            interaction_count: state.interaction_count,
        })
    }

    fn snapshot(&self) -> Option<WorldSnapshot> {
        let guard = self.lock();
        guard.as_ref().map(|state| WorldSnapshot {
            domain_confidence: state.domain_confidence,
            interaction_count: state.interaction_count,
            entities: state.entities.values().cloned().collect(),
            relations: state.relations.clone(),
            constraints: state.constraints.clone(),
        })
    }

    fn record_constraint(&self, name: &str, constraint: Constraint) -> bool {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(state) => {
                state.constraints.insert(name.to_string(), constraint);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_model_has_no_snapshot() {
        let world = InMemoryWorldModel::new();
        assert!(world.snapshot().is_none());
        assert_eq!(world.get_insights().unwrap().success_rate, 1.0);

        let constraint = Constraint {
            lesson: "l".into(),
            constraint: "c".into(),
            adjustment: "a".into(),
            timestamp: Utc::now(),
        };
        assert!(!world.record_constraint("feedback_1", constraint));
    }

    #[tokio::test]
    async fn test_infers_entities_goals_and_relations() {
        let world = InMemoryWorldModel::new();
        world
            .infer_from_interaction(&json!({
                "domain": "coding",
                "user_query": "fix the parser",
                "success": true,
                "file_path": "src/parser.rs",
                "actions_taken": [{"action": "read"}, {"action": "edit"}],
            }))
            .await
            .unwrap();
        world
            .infer_from_interaction(&json!({"domain": "coding", "action": "read", "success": false}))
            .await
            .unwrap();

        let insights = world.get_insights().unwrap();
        assert_eq!(insights.domain, "coding");
        assert!((insights.domain_confidence - 0.2).abs() < 1e-9);
        assert_eq!(insights.interaction_count, 2);
        assert_eq!(insights.success_rate, 0.5);
        assert_eq!(insights.recent_goals.len(), 1);
        assert_eq!(insights.discovered_entity_types, vec!["action", "file"]);
        assert_eq!(insights.discovered_relation_types, vec!["followed_by"]);
        assert_eq!(insights.total_entities, 3);

        let snapshot = world.snapshot().unwrap();
        let read = snapshot.entities.iter().find(|e| e.id == "action:read").unwrap();
        assert_eq!(read.interaction_count(), 2);
    }
}
