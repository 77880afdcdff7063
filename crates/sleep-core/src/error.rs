//! Error types for sleep-core.

use thiserror::Error;

/// Result type alias using [`SleepError`]
pub type SleepResult<T> = Result<T, SleepError>;

/// Errors raised by the orchestration engine and its collaborators
#[derive(Debug, Error)]
pub enum SleepError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// A capability provider call failed
    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// A provider answered with something that is not the JSON we asked for
    #[error("malformed reply in {step}: {source}")]
    MalformedReply {
        step: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// History or pattern store failure
    #[error("store error: {message}")]
    Store { message: String },

    /// Role manager failure
    #[error("role manager error: {message}")]
    RoleManager { message: String },

    /// World model failure
    #[error("world model error: {message}")]
    WorldModel { message: String },

    /// Shared state lock poisoned
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SleepError {
    /// Create a provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a malformed reply error for an analysis step
    pub fn malformed(step: &'static str, source: serde_json::Error) -> Self {
        Self::MalformedReply { step, source }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a role manager error
    pub fn role_manager(message: impl Into<String>) -> Self {
        Self::RoleManager {
            message: message.into(),
        }
    }

    /// Create a world model error
    pub fn world_model(message: impl Into<String>) -> Self {
        Self::WorldModel {
            message: message.into(),
        }
    }

    /// Check if this error came from a provider call
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }

    /// Check if this error is a malformed provider reply
    pub fn is_malformed_reply(&self) -> bool {
        matches!(self, Self::MalformedReply { .. })
    }
}
