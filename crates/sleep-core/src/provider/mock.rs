//! Canned provider for tests and dry runs.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{CapabilityProvider, ProviderOptions};
use crate::{SleepError, SleepResult};

/// A recorded call to a [`MockProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Analyze(String),
    Generate(String),
}

impl MockCall {
    pub fn prompt(&self) -> &str {
        match self {
            MockCall::Analyze(prompt) | MockCall::Generate(prompt) => prompt,
        }
    }
}

/// Provider that answers from scripted replies.
///
/// Scripted replies are consumed first, in order; once exhausted the default
/// reply for the operation is returned. A failing mock errors on every call.
#[derive(Debug, Default)]
pub struct MockProvider {
    analysis: String,
    generation: String,
    failure: Option<String>,
    script: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            analysis: "{}".to_string(),
            generation: "{}".to_string(),
            ..Default::default()
        }
    }

    /// Default reply for `analyze`
    pub fn with_analysis(mut self, reply: impl Into<String>) -> Self {
        self.analysis = reply.into();
        self
    }

    /// Default reply for `generate`
    pub fn with_generation(mut self, reply: impl Into<String>) -> Self {
        self.generation = reply.into();
        self
    }

    /// Queue a one-shot reply used by the next call of either kind
    pub fn with_scripted(self, reply: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply.into());
        self
    }

    /// Fail every call with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn reply(&self, call: MockCall, default: &str) -> SleepResult<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        if let Some(message) = &self.failure {
            return Err(SleepError::provider("mock", message.clone()));
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Ok(scripted.unwrap_or_else(|| default.to_string()))
    }
}

#[async_trait]
impl CapabilityProvider for MockProvider {
    async fn analyze(&self, prompt: &str, _options: &ProviderOptions) -> SleepResult<String> {
        self.reply(MockCall::Analyze(prompt.to_string()), &self.analysis)
    }

    async fn generate(&self, prompt: &str, _options: &ProviderOptions) -> SleepResult<String> {
        self.reply(MockCall::Generate(prompt.to_string()), &self.generation)
    }
}
