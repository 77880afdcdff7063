//! Batch processor: drains the observation queue into the history store.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::engine::{contained, Engine, EngineStats};
use crate::types::{truncate_chars, InteractionDetails, Observation};
use crate::SleepResult;

/// Queries longer than this are cut before they reach the history store.
const QUERY_STORE_LIMIT: usize = 200;

impl Engine {
    /// Collect observations into batches and flush them when full or idle.
    ///
    /// An empty batch waits indefinitely; a partial one is flushed once no new
    /// observation arrives within the flush timeout.
    pub(crate) async fn run_batch_processor(self: Arc<Self>) {
        let mut queue = self.queue_rx.lock().await;
        let flush_timeout = self.config.batch_flush_timeout();
        let mut batch: Vec<Observation> = Vec::with_capacity(self.config.batch_size);

        info!(batch_size = self.config.batch_size, "Batch processor started");
        loop {
            let received = if batch.is_empty() {
                queue.recv().await
            } else {
                match tokio::time::timeout(flush_timeout, queue.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        self.flush_batch(std::mem::take(&mut batch)).await;
                        continue;
                    }
                }
            };

            let Some(observation) = received else {
                if !batch.is_empty() {
                    self.flush_batch(std::mem::take(&mut batch)).await;
                }
                debug!("Observation queue closed");
                break;
            };

            batch.push(observation);
            if batch.len() >= self.config.batch_size {
                self.flush_batch(std::mem::take(&mut batch)).await;
            }
        }
    }

    /// Process one batch; errors drop the batch and never reach the loop.
    pub(crate) async fn flush_batch(&self, batch: Vec<Observation>) {
        let size = batch.len();
        match contained("batch_processor", self.process_observation_batch(&batch)).await {
            Some(Ok(new_patterns)) => {
                EngineStats::bump(&self.stats.batches_flushed);
                if new_patterns > 0 {
                    info!(count = new_patterns, "Detected new patterns");
                }
                debug!(size, "Flushed observation batch");
            }
            Some(Err(e)) => {
                EngineStats::bump(&self.stats.batches_failed);
                error!(error = %e, size, "Batch processing error");
            }
            None => EngineStats::bump(&self.stats.batches_failed),
        }
    }

    /// Log each observation, then run pattern detection once.
    async fn process_observation_batch(&self, batch: &[Observation]) -> SleepResult<usize> {
        for observation in batch {
            let details = InteractionDetails {
                query: truncate_chars(&observation.query, QUERY_STORE_LIMIT),
                tokens: observation.tokens_used,
                latency: observation.latency,
                success: observation.success,
            };
            self.history
                .log_interaction(&observation.interaction_type, observation.file_path(), details)
                .await?;
        }

        let new_patterns = self.detector.check_for_patterns().await?;
        Ok(new_patterns.len())
    }
}
