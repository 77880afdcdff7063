//! `sleepd run`: wire the engine and feed it observations.

use anyhow::{Context, Result};
use sleep_core::{Collaborators, Observation, Sleep};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::provider::build_router;

/// Lines read from an observation stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    pub accepted: u64,
    pub rejected: u64,
}

pub async fn execute(config: DaemonConfig) -> Result<()> {
    let router = build_router(&config);
    let collaborators = Collaborators::in_memory(config.roles.clone());
    let sleep = Sleep::new(config.sleep.clone(), router, collaborators)
        .context("Failed to create engine")?;

    sleep.start().await.context("Failed to start engine")?;
    info!(roles = config.roles.len(), "Reading observations from stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let outcome = tokio::select! {
        result = feed(&sleep, stdin) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(FeedSummary::default())
        }
    };

    if let Ok(summary) = &outcome {
        info!(accepted = summary.accepted, rejected = summary.rejected, "Observation stream closed");
        // let the batch loop flush a trailing partial batch
        tokio::time::sleep(config.sleep.batch_flush_timeout() * 2).await;
    }

    sleep.stop().await;
    let stats = sleep.stats();
    info!(
        observations = stats.observations,
        critical = stats.critical_observations,
        batches = stats.batches_flushed,
        applied = stats.insights_applied,
        pending = stats.pending_insights,
        "Engine totals"
    );

    outcome.map(|_| ())
}

/// Parse JSON-lines observations from `reader` into `sleep` until EOF.
///
/// Blank lines are ignored; malformed lines are logged and skipped.
pub async fn feed<R>(sleep: &Sleep, reader: R) -> Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = FeedSummary::default();
    let mut line_no = 0u64;

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read observation stream")?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Observation>(line) {
            Ok(observation) => {
                sleep.observe(observation).await;
                summary.accepted += 1;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed observation");
                summary.rejected += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Sleep {
        let config = DaemonConfig::default();
        Sleep::new(
            config.sleep.clone(),
            build_router(&config),
            Collaborators::in_memory(Vec::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_feed_skips_blank_and_malformed_lines() {
        let sleep = engine();
        let input = concat!(
            r#"{"interaction_type": "edit", "query": "rename the struct"}"#,
            "\n\n",
            "not json\n",
            r#"{"interaction_type": "read", "query": "q", "latency": 12.5}"#,
            "\n",
        );

        let summary = feed(&sleep, input.as_bytes()).await.unwrap();
        assert_eq!(summary, FeedSummary { accepted: 2, rejected: 1 });

        let stats = sleep.stats();
        assert_eq!(stats.observations, 2);
        assert_eq!(stats.critical_observations, 1);
    }

    #[tokio::test]
    async fn test_feed_requires_interaction_type() {
        let sleep = engine();
        let summary = feed(&sleep, &b"{\"query\": \"q\"}\n"[..]).await.unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(sleep.stats().observations, 0);
    }
}
