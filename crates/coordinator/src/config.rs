//! Configuration for the coordinator.
//!
//! Every section has defaults, so the service runs without a file. Secrets
//! may come from the file but are better supplied through the environment.
//!
//! On Unix, a config file is rejected when it is world-writable, or when it
//! holds credentials and is world-readable.

use std::path::Path;
use std::time::Duration;

use safespace_llm::LlmConfig;
use safespace_retrieval::RetrievalConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregator::SYNTHESIS_TEMPERATURE;
use crate::router::ROUTER_TEMPERATURE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Routing classifier (text completion)
    #[serde(default = "default_router")]
    pub router: LlmConfig,

    /// Final synthesis (text completion)
    #[serde(default = "default_synthesis")]
    pub synthesis: LlmConfig,

    /// Local domain-specialist chat model
    #[serde(default = "default_specialist")]
    pub specialist: LlmConfig,

    /// Image understanding
    #[serde(default = "default_vision")]
    pub vision: LlmConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub emergency: EmergencyConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_router() -> LlmConfig {
    LlmConfig::openai("gpt-4").with_temperature(ROUTER_TEMPERATURE)
}

fn default_synthesis() -> LlmConfig {
    LlmConfig::openai("gpt-4").with_temperature(SYNTHESIS_TEMPERATURE)
}

fn default_specialist() -> LlmConfig {
    LlmConfig {
        top_p: Some(0.9),
        max_tokens: Some(350),
        ..LlmConfig::ollama("alibayram/medgemma:4b").with_temperature(0.7)
    }
}

fn default_vision() -> LlmConfig {
    LlmConfig {
        max_tokens: Some(800),
        ..LlmConfig::openai("gpt-4o")
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            router: default_router(),
            synthesis: default_synthesis(),
            specialist: default_specialist(),
            vision: default_vision(),
            retrieval: RetrievalConfig::default(),
            emergency: EmergencyConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Twilio credentials and the contact to call.
///
/// Each field falls back to its environment variable: `TWILIO_ACCOUNT_SID`,
/// `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER`, `EMERGENCY_CONTACT`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmergencyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    /// Override for the Twilio API host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

fn resolve(value: &Option<String>, env_var: &str) -> Option<String> {
    value
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))
}

impl EmergencyConfig {
    /// Complete Twilio credentials, or None when any part is missing.
    pub fn resolve_twilio(&self) -> Option<TwilioCredentials> {
        Some(TwilioCredentials {
            account_sid: resolve(&self.account_sid, "TWILIO_ACCOUNT_SID")?,
            auth_token: resolve(&self.auth_token, "TWILIO_AUTH_TOKEN")?,
            from_number: resolve(&self.from_number, "TWILIO_FROM_NUMBER")?,
        })
    }

    pub fn resolve_contact(&self) -> Option<String> {
        resolve(&self.contact, "EMERGENCY_CONTACT")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for each external collaborator call
    #[serde(default = "default_collaborator_ms")]
    pub collaborator_ms: u64,

    /// Deadline for the emergency notification
    #[serde(default = "default_notification_ms")]
    pub notification_ms: u64,

    /// Deadline for a whole handler, which may make several calls
    #[serde(default = "default_handler_ms")]
    pub handler_ms: u64,
}

fn default_collaborator_ms() -> u64 {
    60_000
}

fn default_notification_ms() -> u64 {
    10_000
}

fn default_handler_ms() -> u64 {
    120_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            collaborator_ms: default_collaborator_ms(),
            notification_ms: default_notification_ms(),
            handler_ms: default_handler_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn collaborator(&self) -> Duration {
        Duration::from_millis(self.collaborator_ms)
    }

    pub fn notification(&self) -> Duration {
        Duration::from_millis(self.notification_ms)
    }

    pub fn handler(&self) -> Duration {
        Duration::from_millis(self.handler_ms)
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file, validating permissions first on
    /// Unix.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let config = Self::from_file_unchecked(path)?;

        if config.has_inline_secrets() {
            warn!(
                "Credentials found in config file '{}'. Prefer environment variables \
                 (OPENAI_API_KEY, TWILIO_AUTH_TOKEN).",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration without permission checks.
    pub fn from_file_unchecked(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn has_inline_secrets(&self) -> bool {
        [&self.router, &self.synthesis, &self.specialist, &self.vision]
            .iter()
            .any(|llm| llm.api_key.as_deref().is_some_and(|k| !k.is_empty()))
            || self.emergency.auth_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// True when a line assigns a non-empty value to a credential key.
fn contains_credentials(content: &str) -> bool {
    content.lines().any(|line| {
        let Some((key, value)) = line.split_once('=') else {
            return false;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        matches!(key, "api_key" | "auth_token") && !value.is_empty()
    })
}

#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)?;
    let has_credentials = contains_credentials(&content);

    if has_credentials && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains credentials but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_credentials && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains credentials and is group-readable (mode {:04o}). \
             Consider: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
