//! In-process history and pattern store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{HistoryStore, PatternDetector, PatternStore};
use crate::types::{
    FileAccess, InteractionDetails, InteractionRecord, PatternRecord, PreferenceRecord,
    RecentContext,
};
use crate::{SleepError, SleepResult};

/// Repetitions before an action is reported as a pattern.
const DEFAULT_MIN_REPEATS: usize = 3;
const TOP_FILES_LIMIT: usize = 10;

#[derive(Default)]
struct StoreState {
    interactions: Vec<InteractionRecord>,
    patterns: Vec<PatternRecord>,
    preferences: Vec<PreferenceRecord>,
    reported: HashSet<String>,
}

/// Keeps interactions, patterns and preferences in memory.
///
/// Also acts as a [`PatternDetector`]: any action logged at least
/// `min_repeats` times is reported once as an `action_frequency` pattern.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    min_repeats: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            min_repeats: DEFAULT_MIN_REPEATS,
        }
    }

    pub fn with_min_repeats(mut self, min_repeats: usize) -> Self {
        self.min_repeats = min_repeats.max(1);
        self
    }

    /// Every logged interaction, oldest first.
    pub fn interactions(&self) -> SleepResult<Vec<InteractionRecord>> {
        let state = self.lock()?;
        Ok(state.interactions.clone())
    }

    fn lock(&self) -> SleepResult<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| SleepError::LockPoisoned("memory store"))
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn log_interaction(
        &self,
        action: &str,
        file_path: Option<&str>,
        details: InteractionDetails,
    ) -> SleepResult<()> {
        let mut state = self.lock()?;
        state.interactions.push(InteractionRecord {
            action: action.to_string(),
            file_path: file_path.map(String::from),
            details,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn get_recent_context(&self, limit: usize) -> SleepResult<RecentContext> {
        let state = self.lock()?;
        let start = state.interactions.len().saturating_sub(limit);
        // newest first
        let recent: Vec<InteractionRecord> =
            state.interactions[start..].iter().rev().cloned().collect();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for interaction in &recent {
            if let Some(file) = interaction.file_path.as_deref() {
                *counts.entry(file).or_default() += 1;
            }
        }
        let mut top_files: Vec<FileAccess> = counts
            .into_iter()
            .map(|(file, count)| FileAccess {
                file: file.to_string(),
                count,
            })
            .collect();
        // stable sort keeps ties in name order
        top_files.sort_by(|a, b| b.count.cmp(&a.count));
        top_files.truncate(TOP_FILES_LIMIT);

        Ok(RecentContext {
            top_files,
            total_interactions: state.interactions.len(),
            recent_interactions: recent,
        })
    }
}

#[async_trait]
impl PatternStore for MemoryStore {
    async fn get_all_patterns(&self) -> SleepResult<Vec<PatternRecord>> {
        let state = self.lock()?;
        Ok(state.patterns.clone())
    }

    async fn add_pattern(&self, pattern: PatternRecord) -> SleepResult<()> {
        let mut state = self.lock()?;
        debug!(name = %pattern.name, "Pattern stored");
        state.patterns.push(pattern);
        Ok(())
    }

    async fn add_preference(&self, preference: PreferenceRecord) -> SleepResult<()> {
        let mut state = self.lock()?;
        // latest value wins per key
        state.preferences.retain(|p| p.key != preference.key);
        state.preferences.push(preference);
        Ok(())
    }

    async fn get_preferences(&self) -> SleepResult<Vec<PreferenceRecord>> {
        let state = self.lock()?;
        Ok(state.preferences.clone())
    }
}

#[async_trait]
impl PatternDetector for MemoryStore {
    async fn check_for_patterns(&self) -> SleepResult<Vec<PatternRecord>> {
        let mut state = self.lock()?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for interaction in &state.interactions {
            *counts.entry(interaction.action.clone()).or_default() += 1;
        }

        let mut found = Vec::new();
        for (action, count) in counts {
            if count < self.min_repeats || state.reported.contains(&action) {
                continue;
            }
            found.push(PatternRecord {
                name: format!("Frequent action: {action}"),
                pattern_type: Some("action_frequency".to_string()),
                description: format!("'{action}' performed {count} times"),
                sequence: vec![action.clone()],
                confidence: (count as f64 / 10.0).min(1.0),
                source: Some("frequency_detector".to_string()),
                metadata: None,
            });
            state.reported.insert(action);
        }

        state.patterns.extend(found.iter().cloned());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(query: &str) -> InteractionDetails {
        InteractionDetails {
            query: query.to_string(),
            tokens: 10,
            latency: 0.5,
            success: true,
        }
    }

    #[tokio::test]
    async fn test_recent_context_newest_first() {
        let store = MemoryStore::new();
        store.log_interaction("read", Some("a.rs"), details("1")).await.unwrap();
        store.log_interaction("edit", Some("b.rs"), details("2")).await.unwrap();
        store.log_interaction("edit", Some("b.rs"), details("3")).await.unwrap();
        store.log_interaction("run", None, details("4")).await.unwrap();

        let recent = store.get_recent_context(3).await.unwrap();
        assert_eq!(recent.total_interactions, 4);
        assert_eq!(recent.recent_interactions.len(), 3);
        assert_eq!(recent.recent_interactions[0].action, "run");
        assert_eq!(recent.top_files[0], FileAccess { file: "b.rs".into(), count: 2 });
        assert_eq!(recent.top_files.len(), 1);
    }

    #[tokio::test]
    async fn test_detector_reports_once() {
        let store = MemoryStore::new().with_min_repeats(2);
        store.log_interaction("edit", None, details("a")).await.unwrap();
        assert!(store.check_for_patterns().await.unwrap().is_empty());

        store.log_interaction("edit", None, details("b")).await.unwrap();
        let found = store.check_for_patterns().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].type_key(), "action_frequency");

        store.log_interaction("edit", None, details("c")).await.unwrap();
        assert!(store.check_for_patterns().await.unwrap().is_empty());
        assert_eq!(store.get_all_patterns().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preference_latest_wins() {
        let store = MemoryStore::new();
        for value in ["a.rs", "b.rs"] {
            store
                .add_preference(PreferenceRecord {
                    key: "always_include_files".into(),
                    value: value.into(),
                    category: "context".into(),
                    confidence: 0.8,
                    source: "sleep".into(),
                })
                .await
                .unwrap();
        }
        let prefs = store.get_preferences().await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].value, "b.rs");
    }
}
