//! World-model proposals, proposal feedback and the understanding summary.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collab::{Constraint, Goal, WorldInsights, WorldModel, WorldSnapshot};
use crate::engine::Engine;
use crate::provider::LogicalRole;
use crate::SleepResult;

const MAX_GENERATED_PROPOSALS: usize = 5;
const LOW_SUCCESS_RATE: f64 = 0.7;
const STRONG_RELATION_CONFIDENCE: f64 = 0.7;
/// Interactions after which domain understanding counts as settled.
const STABLE_INTERACTION_COUNT: f64 = 50.0;
const SUMMARY_LIMIT: usize = 5;

/// A goal-directed suggestion derived from the world model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub proposal_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

impl Proposal {
    fn new(proposal_type: &str, description: &str, confidence: f64, rationale: String) -> Self {
        Self {
            id: String::new(),
            timestamp: None,
            proposal_type: proposal_type.to_string(),
            description: description.to_string(),
            confidence,
            rationale,
        }
    }
}

/// Lesson fields parsed from the analyzer's feedback reply.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedbackLesson {
    lesson: String,
    constraint: String,
    adjustment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitiesSummary {
    pub total: usize,
    pub types: Vec<String>,
    /// Most-interacted entities first
    pub recent: Vec<EntitySummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationPattern {
    #[serde(rename = "type")]
    pub relation_type: String,
    pub source: String,
    pub target: String,
    pub confidence: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationsSummary {
    pub total: usize,
    pub types: Vec<String>,
    pub strong_patterns: Vec<RelationPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalsSummary {
    pub total: usize,
    pub achieved: usize,
    pub recent: Vec<Goal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMetrics {
    pub success_rate: f64,
    pub interaction_count: u64,
    pub entity_diversity: usize,
    pub relation_diversity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningProgress {
    pub domain_stability: f64,
    /// Relations per entity
    pub pattern_emergence: f64,
    /// Achievement rate of the newer half of recent goals minus the older half
    pub goal_achievement_trend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveUnderstanding {
    pub domain: DomainSummary,
    pub entities: EntitiesSummary,
    pub relations: RelationsSummary,
    pub goals: GoalsSummary,
    pub metrics: WorldMetrics,
    pub constraints: BTreeMap<String, Constraint>,
    pub learning_progress: LearningProgress,
}

/// What the world model currently believes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorldUnderstanding {
    WorldModelNotInitialized,
    Active(Box<ActiveUnderstanding>),
    Error { error: String },
}

fn domain_stability(snapshot: Option<&WorldSnapshot>) -> f64 {
    snapshot.map_or(0.0, |world| {
        world.domain_confidence * (world.interaction_count as f64 / STABLE_INTERACTION_COUNT).min(1.0)
    })
}

fn goal_trend(goals: &[Goal]) -> f64 {
    if goals.len() < 2 {
        return 0.0;
    }
    let rate = |half: &[Goal]| {
        half.iter().filter(|g| g.achieved).count() as f64 / half.len().max(1) as f64
    };
    let (first, second) = goals.split_at(goals.len() / 2);
    rate(second) - rate(first)
}

fn summarize(insights: WorldInsights, snapshot: Option<WorldSnapshot>) -> ActiveUnderstanding {
    let mut recent_entities = Vec::new();
    let mut strong_patterns = Vec::new();
    let mut pattern_emergence = 0.0;
    let mut constraints = BTreeMap::new();

    if let Some(world) = &snapshot {
        let mut entities: Vec<_> = world.entities.iter().collect();
        entities.sort_by(|a, b| b.interaction_count().cmp(&a.interaction_count()));
        recent_entities = entities
            .into_iter()
            .take(SUMMARY_LIMIT)
            .map(|e| EntitySummary {
                id: e.id.clone(),
                entity_type: e.entity_type.clone(),
                properties: e.properties.iter().take(3).map(|(k, v)| (k.clone(), v.clone())).collect(),
            })
            .collect();

        let mut strong: Vec<_> = world
            .relations
            .iter()
            .filter(|r| r.confidence > STRONG_RELATION_CONFIDENCE)
            .collect();
        strong.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        strong_patterns = strong
            .into_iter()
            .take(SUMMARY_LIMIT)
            .map(|r| RelationPattern {
                relation_type: r.relation_type.clone(),
                source: r.source_id.clone(),
                target: r.target_id.clone(),
                confidence: r.confidence,
                count: r.observed_count,
            })
            .collect();

        pattern_emergence = world.relations.len() as f64 / world.entities.len().max(1) as f64;
        constraints = world.constraints.clone();
    }

    ActiveUnderstanding {
        domain: DomainSummary {
            name: if insights.domain.is_empty() {
                "unknown".to_string()
            } else {
                insights.domain.clone()
            },
            confidence: insights.domain_confidence,
        },
        entities: EntitiesSummary {
            total: insights.total_entities,
            types: insights.discovered_entity_types.clone(),
            recent: recent_entities,
        },
        relations: RelationsSummary {
            total: insights.total_relations,
            types: insights.discovered_relation_types.clone(),
            strong_patterns,
        },
        goals: GoalsSummary {
            total: insights.recent_goals.len(),
            achieved: insights.recent_goals.iter().filter(|g| g.achieved).count(),
            recent: insights.recent_goals.iter().take(SUMMARY_LIMIT).cloned().collect(),
        },
        metrics: WorldMetrics {
            success_rate: insights.success_rate,
            interaction_count: insights.interaction_count,
            entity_diversity: insights.entity_type_diversity,
            relation_diversity: insights.relation_type_diversity,
        },
        constraints,
        learning_progress: LearningProgress {
            domain_stability: domain_stability(snapshot.as_ref()),
            pattern_emergence,
            goal_achievement_trend: goal_trend(&insights.recent_goals),
        },
    }
}

impl Engine {
    fn world_model(&self) -> Option<&Arc<dyn WorldModel>> {
        self.world.as_ref()
    }

    /// Feed recent interactions to the world model and derive proposals.
    pub(crate) async fn world_model_proposals(&self, recent_interactions: &[Value]) -> Vec<Proposal> {
        let Some(world) = self.world_model() else {
            warn!("World model not initialized");
            return Vec::new();
        };

        match self.build_proposals(world.as_ref(), recent_interactions).await {
            Ok(proposals) => proposals,
            Err(e) => {
                error!(error = %e, "Error generating world model proposals");
                Vec::new()
            }
        }
    }

    async fn build_proposals(
        &self,
        world: &dyn WorldModel,
        recent_interactions: &[Value],
    ) -> SleepResult<Vec<Proposal>> {
        for interaction in recent_interactions {
            world.infer_from_interaction(interaction).await?;
        }
        let insights = world.get_insights()?;
        let mut proposals = Vec::new();

        if !insights.recent_goals.is_empty() {
            if let Some(generator) = self.router.primary(LogicalRole::Generator) {
                let prompt = format!(
                    "Based on the following world model insights, suggest 3-5 goal-directed proposals:\n\n\
                     World Model Insights:\n\
                     - Domain: {}\n\
                     - Recent Goals: {}\n\
                     - Success Rate: {:.2}%\n\
                     - Entity Types: {}\n\
                     - Common Relations: {}\n\n\
                     Generate proposals that:\n\
                     1. Help achieve unfinished goals\n\
                     2. Address areas with low success rates\n\
                     3. Explore related entities or patterns\n\
                     4. Suggest improvements based on failures\n\n\
                     Format as JSON array of proposals with: type, description, confidence, rationale",
                    if insights.domain.is_empty() { "unknown" } else { insights.domain.as_str() },
                    serde_json::to_string_pretty(&insights.recent_goals)?,
                    insights.success_rate * 100.0,
                    first_joined(&insights.discovered_entity_types),
                    first_joined(&insights.discovered_relation_types),
                );

                let response = generator.generate(&prompt).await?;
                match serde_json::from_str::<Value>(&response) {
                    Ok(Value::Array(generated)) => {
                        for entry in generated.into_iter().take(MAX_GENERATED_PROPOSALS) {
                            match serde_json::from_value::<Proposal>(entry) {
                                Ok(proposal) => proposals.push(proposal),
                                Err(e) => warn!(error = %e, "Skipping malformed proposal"),
                            }
                        }
                    }
                    Ok(_) => warn!(provider = %generator.id, "Generated proposals were not a list"),
                    Err(e) => error!(provider = %generator.id, error = %e, "Failed to parse generated proposals"),
                }
            }
        }

        if insights.success_rate < LOW_SUCCESS_RATE {
            proposals.push(Proposal::new(
                "IMPROVEMENT",
                "Review and improve error handling in recent workflows",
                0.8,
                format!(
                    "Success rate is {:.1}%, indicating room for improvement",
                    insights.success_rate * 100.0
                ),
            ));
        }

        let mentions_tests = insights
            .discovered_entity_types
            .iter()
            .any(|t| t.to_lowercase().contains("test"));
        if insights.domain == "coding" && !mentions_tests {
            proposals.push(Proposal::new(
                "QUALITY",
                "Add test coverage for recent changes",
                0.7,
                "No test-related entities detected in recent interactions".to_string(),
            ));
        }

        let now = Utc::now();
        for proposal in &mut proposals {
            proposal.id = Uuid::new_v4().to_string();
            proposal.timestamp = Some(now);
        }
        Ok(proposals)
    }

    /// Record user feedback on a proposal; corrections are analyzed into constraints.
    pub(crate) async fn update_world_model_from_feedback(
        &self,
        proposal_id: &str,
        feedback: &str,
        success: bool,
    ) {
        let Some(world) = self.world_model() else {
            warn!("World model not initialized for feedback processing");
            return;
        };

        if let Err(e) = self.apply_feedback(world.as_ref(), proposal_id, feedback, success).await {
            error!(proposal_id, error = %e, "Error updating world model from feedback");
            return;
        }

        let entities = world.snapshot().map_or(0, |s| s.entities.len());
        info!(proposal_id, success, world_state_entities = entities, "World model updated with feedback");
    }

    async fn apply_feedback(
        &self,
        world: &dyn WorldModel,
        proposal_id: &str,
        feedback: &str,
        success: bool,
    ) -> SleepResult<()> {
        let interaction = json!({
            "interaction_id": proposal_id,
            "timestamp": Utc::now().to_rfc3339(),
            "user_query": format!("Feedback on proposal: {feedback}"),
            "success": success,
            "feedback": feedback,
            "feedback_type": if success { "APPROVAL" } else { "CORRECTION" },
            "actions_taken": [{
                "action": "proposal_feedback",
                "status": "completed",
                "result": {"success": success},
            }],
        });
        world.infer_from_interaction(&interaction).await?;

        if success {
            return Ok(());
        }
        let Some(analyzer) = self.router.primary(LogicalRole::Analyzer) else {
            return Ok(());
        };

        let prompt = format!(
            "Analyze this proposal feedback to improve future suggestions:\n\n\
             Proposal ID: {proposal_id}\n\
             Feedback: {feedback}\n\
             Success: {success}\n\n\
             What can we learn from this feedback to improve future proposals?\n\
             Provide insights about:\n\
             1. What was misunderstood\n\
             2. What constraints were missed\n\
             3. How to adjust future proposals\n\n\
             Format as JSON with: lesson, constraint, adjustment"
        );
        let response = analyzer.analyze(&prompt).await?;

        let lesson: FeedbackLesson = match serde_json::from_str(&response) {
            Ok(lesson) => lesson,
            Err(e) => {
                error!(provider = %analyzer.id, error = %e, "Failed to parse feedback insights");
                return Ok(());
            }
        };

        let constraint = Constraint {
            lesson: lesson.lesson,
            constraint: lesson.constraint,
            adjustment: lesson.adjustment,
            timestamp: Utc::now(),
        };
        if !world.record_constraint(&format!("feedback_{proposal_id}"), constraint) {
            warn!(proposal_id, "No live world state; constraint not recorded");
        }
        Ok(())
    }

    pub(crate) fn current_world_understanding(&self) -> WorldUnderstanding {
        let Some(world) = self.world_model() else {
            return WorldUnderstanding::WorldModelNotInitialized;
        };
        match world.get_insights() {
            Ok(insights) => {
                WorldUnderstanding::Active(Box::new(summarize(insights, world.snapshot())))
            }
            Err(e) => {
                error!(error = %e, "Error getting world understanding");
                WorldUnderstanding::Error {
                    error: e.to_string(),
                }
            }
        }
    }
}

fn first_joined(items: &[String]) -> String {
    items.iter().take(SUMMARY_LIMIT).cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SleepConfig;
    use crate::provider::{MockCall, MockProvider};
    use crate::testing::{fixture, fixture_with_world, fixture_without_world, FailingWorld, Fixture};

    fn goals(achieved: &[bool]) -> Vec<Goal> {
        achieved
            .iter()
            .map(|&achieved| Goal {
                description: "g".into(),
                achieved,
            })
            .collect()
    }

    #[test]
    fn test_goal_trend() {
        assert_eq!(goal_trend(&goals(&[true])), 0.0);
        assert_eq!(goal_trend(&goals(&[false, false, true, true])), 1.0);
        assert_eq!(goal_trend(&goals(&[true, false, false])), -0.5);
    }

    #[test]
    fn test_proposal_accepts_partial_json() {
        let proposal: Proposal =
            serde_json::from_value(json!({"type": "NEXT_STEP", "description": "ship it"})).unwrap();
        assert_eq!(proposal.proposal_type, "NEXT_STEP");
        assert_eq!(proposal.confidence, 0.0);
        assert!(proposal.id.is_empty());
    }

    #[tokio::test]
    async fn test_without_world_model() {
        let engine = fixture_without_world(SleepConfig::default());

        assert!(engine.world_model_proposals(&[json!({})]).await.is_empty());
        engine.update_world_model_from_feedback("p1", "no", false).await;
        assert_eq!(
            engine.current_world_understanding(),
            WorldUnderstanding::WorldModelNotInitialized
        );
    }

    #[tokio::test]
    async fn test_generated_proposals_capped_and_stamped() {
        let generated: Vec<Value> = (0..8)
            .map(|i| json!({"type": "NEXT_STEP", "description": format!("step {i}"), "confidence": 0.6}))
            .collect();
        let mock = Arc::new(MockProvider::new().with_generation(Value::Array(generated).to_string()));
        let Fixture { engine, .. } = fixture(SleepConfig::default(), vec![("claude", mock.clone())]);

        let interactions = vec![json!({"user_query": "add login", "success": true, "domain": "web"})];
        let proposals = engine.world_model_proposals(&interactions).await;

        assert_eq!(proposals.len(), 5);
        assert!(proposals.iter().all(|p| !p.id.is_empty() && p.timestamp.is_some()));
        assert!(matches!(&mock.calls()[0], MockCall::Generate(p) if p.contains("add login")));
    }

    #[tokio::test]
    async fn test_rule_based_proposals() {
        let mock = Arc::new(MockProvider::new().with_generation("not json"));
        let Fixture { engine, .. } = fixture(SleepConfig::default(), vec![("claude", mock)]);

        let interactions = vec![
            json!({"user_query": "refactor", "success": false, "domain": "coding", "action": "edit"}),
            json!({"success": true, "domain": "coding"}),
        ];
        let proposals = engine.world_model_proposals(&interactions).await;

        let kinds: Vec<&str> = proposals.iter().map(|p| p.proposal_type.as_str()).collect();
        assert_eq!(kinds, vec!["IMPROVEMENT", "QUALITY"]);
        assert_eq!(
            proposals[0].rationale,
            "Success rate is 50.0%, indicating room for improvement"
        );
    }

    #[tokio::test]
    async fn test_rejection_records_constraint() {
        let mock = Arc::new(MockProvider::new().with_analysis(
            json!({"lesson": "ask first", "constraint": "no deletes", "adjustment": "confirm"}).to_string(),
        ));
        let Fixture { engine, world, .. } = fixture(SleepConfig::default(), vec![("claude", mock.clone())]);

        engine.update_world_model_from_feedback("p42", "do not delete files", false).await;

        let snapshot = world.snapshot().unwrap();
        let constraint = &snapshot.constraints["feedback_p42"];
        assert_eq!(constraint.lesson, "ask first");
        assert_eq!(constraint.constraint, "no deletes");
        assert!(snapshot.entities.iter().any(|e| e.id == "action:proposal_feedback"));
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_approval_skips_analysis() {
        let mock = Arc::new(MockProvider::new());
        let Fixture { engine, world, .. } = fixture(SleepConfig::default(), vec![("claude", mock.clone())]);

        engine.update_world_model_from_feedback("p1", "great", true).await;
        assert!(mock.calls().is_empty());
        assert!(world.snapshot().unwrap().constraints.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_lesson_stores_nothing() {
        let mock = Arc::new(MockProvider::new().with_analysis("I think the user was upset"));
        let Fixture { engine, world, .. } = fixture(SleepConfig::default(), vec![("claude", mock)]);

        engine.update_world_model_from_feedback("p1", "wrong", false).await;
        assert!(world.snapshot().unwrap().constraints.is_empty());
    }

    #[tokio::test]
    async fn test_understanding_summary() {
        let Fixture { engine, world, .. } = fixture(SleepConfig::default(), vec![]);
        assert!(matches!(
            engine.current_world_understanding(),
            WorldUnderstanding::Active(ref u) if u.domain.name == "unknown" && u.entities.total == 0
        ));

        for _ in 0..3 {
            world
                .infer_from_interaction(&json!({
                    "domain": "coding",
                    "user_query": "q",
                    "success": true,
                    "actions_taken": [{"action": "read"}, {"action": "edit"}],
                }))
                .await
                .unwrap();
        }

        let WorldUnderstanding::Active(understanding) = engine.current_world_understanding() else {
            panic!("expected active understanding");
        };
        assert_eq!(understanding.domain.name, "coding");
        assert_eq!(understanding.goals.achieved, 3);
        assert_eq!(understanding.entities.recent.len(), 2);
        // followed_by seen three times: confidence 0.75
        assert_eq!(understanding.relations.strong_patterns.len(), 1);
        assert_eq!(understanding.relations.strong_patterns[0].count, 3);
        assert_eq!(understanding.learning_progress.pattern_emergence, 0.5);
        let stability = understanding.learning_progress.domain_stability;
        assert!((stability - 0.3 * 3.0 / 50.0).abs() < 1e-9);

        let json = serde_json::to_value(WorldUnderstanding::Active(understanding)).unwrap();
        assert_eq!(json["status"], "active");
    }

    #[tokio::test]
    async fn test_failing_world_model_reports_error() {
        let engine = fixture_with_world(SleepConfig::default(), Arc::new(FailingWorld));

        let understanding = engine.current_world_understanding();
        assert!(matches!(&understanding, WorldUnderstanding::Error { error } if error.contains("graph offline")));
        assert_eq!(serde_json::to_value(&understanding).unwrap()["status"], "error");
        assert!(engine.world_model_proposals(&[json!({"success": true})]).await.is_empty());
    }
}
