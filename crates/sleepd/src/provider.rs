//! Providers built from daemon configuration.

use async_trait::async_trait;
use sleep_core::provider::MockProvider;
use sleep_core::{CapabilityProvider, ProviderOptions, ProviderRouter, SleepError, SleepResult};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{DaemonConfig, ProviderSpec};

/// Runs an agent CLI per call: the prompt goes to stdin, the reply is stdout.
///
/// `SLEEPD_MODE` is set to `analyze` or `generate` for programs that care.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    id: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(id: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, mode: &str, prompt: &str) -> SleepResult<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("SLEEPD_MODE", mode)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SleepError::provider(&self.id, format!("failed to spawn {}: {e}", self.program)))?;

        // stdin is fed concurrently with draining stdout
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_owned();
            let id = self.id.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(provider = %id, error = %e, "Provider closed stdin early");
                }
            });
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                SleepError::provider(&self.id, format!("timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| SleepError::provider(&self.id, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SleepError::provider(
                &self.id,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        debug!(provider = %self.id, mode, bytes = output.stdout.len(), "Provider replied");
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl CapabilityProvider for CommandProvider {
    async fn analyze(&self, prompt: &str, _options: &ProviderOptions) -> SleepResult<String> {
        self.run("analyze", prompt).await
    }

    async fn generate(&self, prompt: &str, _options: &ProviderOptions) -> SleepResult<String> {
        self.run("generate", prompt).await
    }
}

impl ProviderSpec {
    pub fn build(&self, id: &str) -> Arc<dyn CapabilityProvider> {
        match self {
            ProviderSpec::Mock { analysis, generation } => Arc::new(
                MockProvider::new()
                    .with_analysis(analysis.clone())
                    .with_generation(generation.clone()),
            ),
            ProviderSpec::Command {
                program,
                args,
                timeout_secs,
            } => Arc::new(
                CommandProvider::new(id, program.clone(), args.clone())
                    .with_timeout(Duration::from_secs(*timeout_secs)),
            ),
        }
    }
}

/// Register every configured provider and freeze the routing table.
pub fn build_router(config: &DaemonConfig) -> ProviderRouter {
    config
        .providers
        .iter()
        .fold(ProviderRouter::builder(&config.sleep.roles), |builder, (id, spec)| {
            builder.register(id.clone(), spec.build(id))
        })
        .build()
}
