//! Domain types and validators for privatebox configuration.
//!
//! Pure functions only. No I/O, no async, no filesystem access.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_PROVIDER: &str = "aws";
pub const DEFAULT_STATE_BACKEND: &str = "file://~/.privatebox/state";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";
pub const SUPPORTED_PROVIDERS: &[&str] = &["aws"];

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.config/privatebox/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Profile used when `--profile` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_profile: Option<String>,
    pub profiles: BTreeMap<String, Profile>,
    /// Named boot scripts, selectable with `--user-data <name>`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub user_data: BTreeMap<String, String>,
}

/// One deployment target: provider, region, state backend and defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_state_backend", alias = "pulumi_backend")]
    pub state_backend: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key_path: Option<String>,
    /// Template with `{user}`, `{ip}`, `{host}`, `{id}` and `{key}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_command: Option<String>,
    /// Default boot script: a named script or a file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// Extra environment for the connect command.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub aws: AwsConfig,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            state_backend: default_state_backend(),
            region: default_region(),
            ssh_public_key_path: None,
            connect_command: None,
            user_data: None,
            env: BTreeMap::new(),
            aws: AwsConfig::default(),
        }
    }
}

/// AWS-specific profile settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AwsConfig {
    /// Named AWS CLI profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    /// Image override; skips the image lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress_rules: Vec<AccessRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress_rules: Vec<AccessRule>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            instance_type: default_instance_type(),
            ami: None,
            ingress_rules: Vec::new(),
            egress_rules: Vec::new(),
        }
    }
}

impl AwsConfig {
    /// Configured ingress rules, or inbound SSH from anywhere when none are set.
    #[must_use]
    pub fn effective_ingress(&self) -> Vec<AccessRule> {
        if self.ingress_rules.is_empty() {
            vec![AccessRule::ssh()]
        } else {
            self.ingress_rules.clone()
        }
    }
}

/// A security group rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

impl AccessRule {
    #[must_use]
    pub fn ssh() -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port: 22,
            to_port: 22,
            cidr_blocks: vec!["0.0.0.0/0".to_string()],
        }
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_state_backend() -> String {
    DEFAULT_STATE_BACKEND.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

// ── Profile resolution ───────────────────────────────────────────────────────

impl AppConfig {
    /// Resolve the active profile: `explicit` wins over `current_profile`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when no profiles exist, none is selected,
    /// the selected one is missing, or it names an unsupported provider.
    pub fn resolve_profile(&self, explicit: Option<&str>) -> Result<(String, Profile)> {
        if self.profiles.is_empty() {
            return Err(ConfigError::NoProfiles.into());
        }
        let name = explicit
            .filter(|s| !s.is_empty())
            .or(self.current_profile.as_deref().filter(|s| !s.is_empty()))
            .ok_or(ConfigError::NoCurrentProfile)?;
        let profile = self
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))?;
        validate_provider(&profile.provider)?;
        Ok((name.to_string(), profile.clone()))
    }

    /// Add a new profile. The first profile added becomes current.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ProfileExists` if the name is taken.
    pub fn add_profile(&mut self, name: &str, profile: Profile) -> Result<()> {
        validate_provider(&profile.provider)?;
        if self.profiles.contains_key(name) {
            return Err(ConfigError::ProfileExists(name.to_string()).into());
        }
        self.profiles.insert(name.to_string(), profile);
        if self.current_profile.is_none() {
            self.current_profile = Some(name.to_string());
        }
        Ok(())
    }

    /// Switch the current profile.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ProfileNotFound` if `name` is not configured.
    pub fn use_profile(&mut self, name: &str) -> Result<()> {
        if !self.profiles.contains_key(name) {
            return Err(ConfigError::ProfileNotFound(name.to_string()).into());
        }
        self.current_profile = Some(name.to_string());
        Ok(())
    }
}

/// Validates a provider name against the supported backends.
///
/// # Errors
///
/// Returns `ConfigError::UnsupportedProvider` for anything else.
pub fn validate_provider(provider: &str) -> Result<()> {
    if !SUPPORTED_PROVIDERS.contains(&provider) {
        return Err(ConfigError::UnsupportedProvider(provider.to_string()).into());
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────
