//! Daemon configuration.
//!
//! Configuration is loaded from the first source that applies:
//! 1. `--config` flag or `SLEEPD_CONFIG` (the file must exist)
//! 2. Config file in the platform config directory
//! 3. Default values (one canned provider, no roles)

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sleep_core::{Role, SleepConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Provider id used when the config names none.
pub const DEFAULT_PROVIDER_ID: &str = "local";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Engine settings
    pub sleep: SleepConfig,

    /// Capability providers by id
    pub providers: BTreeMap<String, ProviderSpec>,

    /// Role definitions for the trigger-based role manager
    pub roles: Vec<Role>,
}

/// How to reach a capability provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSpec {
    /// Canned replies, useful for dry runs
    Mock {
        #[serde(default = "default_reply")]
        analysis: String,
        #[serde(default = "default_reply")]
        generation: String,
    },

    /// External program that reads the prompt on stdin and answers on stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_command_timeout")]
        timeout_secs: u64,
    },
}

fn default_reply() -> String {
    "{}".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            DEFAULT_PROVIDER_ID.to_string(),
            ProviderSpec::Mock {
                analysis: default_reply(),
                generation: default_reply(),
            },
        );
        Self {
            sleep: SleepConfig::default(),
            providers,
            roles: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `explicit` or the default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Check engine settings and that every routed provider id is defined.
    pub fn validate(&self) -> Result<()> {
        self.sleep.validate().context("Invalid [sleep] settings")?;

        if self.providers.is_empty() {
            bail!("No providers configured");
        }
        for (role, selection) in &self.sleep.roles {
            for id in selection.ids() {
                if !self.providers.contains_key(&id) {
                    bail!("Role '{role}' routes to unknown provider '{id}'");
                }
            }
        }
        for role in &self.roles {
            if role.name.trim().is_empty() {
                bail!("Role definitions need a name");
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Config file in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "bicamrl", "sleepd") {
        Some(proj_dirs.config_dir().join("config.toml"))
    } else {
        dirs::home_dir().map(|home| home.join(".sleepd").join("config.toml"))
    }
}
