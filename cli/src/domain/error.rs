//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator. Callers classify failures with
//! `anyhow::Error::downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

// ── Graph construction errors ─────────────────────────────────────────────────

/// Invalid or unreadable input detected while building a resource graph.
///
/// Never retried: the caller must fix the input.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Instance name is required.")]
    EmptyName,

    #[error(
        "Invalid instance name '{0}': use letters, digits, '.', '_' or '-', starting with a letter or digit (max 63 characters)."
    )]
    InvalidName(String),

    #[error("Cannot read SSH public key {}: {source}", path.display())]
    UnreadableKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Resource '{0}' is declared more than once.")]
    DuplicateNode(String),

    #[error("Resource '{node}' depends on unknown resource '{dependency}'.")]
    UnknownDependency { node: String, dependency: String },

    #[error("Resource graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Resource graph has no compute instance.")]
    MissingCompute,

    #[error("Compute instance '{compute}' must not be a dependency of '{dependent}'.")]
    ComputeNotSink { compute: String, dependent: String },
}

// ── Deployment errors ─────────────────────────────────────────────────────────

/// Errors raised by convergence and deployment queries.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Instance '{0}' is not provisioned. Create it with: privatebox create {0}")]
    NotProvisioned(String),

    #[error("Instance '{name}' already has a deployment owned by profile '{owner}'.")]
    Conflict { name: String, owner: String },

    #[error(
        "Instance '{name}' lives in {recorded} (profile '{owner}'), but the active profile targets {current}. Rerun with: --profile {owner}"
    )]
    Misplaced {
        name: String,
        owner: String,
        recorded: String,
        current: String,
    },

    /// Attached as context to the provider error of the failing resource.
    #[error("Resource '{node}' ({kind}) failed")]
    ResourceFailed { node: String, kind: String },

    #[error("Operation on instance '{0}' was cancelled. Completed resources are recorded; rerun to resume.")]
    Cancelled(String),

    #[error(
        "Instance '{name}' was not fully destroyed; {remaining} resource(s) are still recorded. Rerun destroy to retry."
    )]
    DestroyIncomplete { name: String, remaining: usize },
}

// ── Probe errors ──────────────────────────────────────────────────────────────

/// Errors raised by live status probes.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Resource '{0}' was not found at the provider.")]
    NotFound(String),
}

// ── State store errors ────────────────────────────────────────────────────────

/// Errors raised by deployment state backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State backend '{0}' does not support this operation.")]
    UnsupportedBackend(String),

    #[error("Invalid state partition name '{0}'.")]
    InvalidPartition(String),
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to profile resolution and editing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration profiles found. Run 'privatebox config new <name>' to start.")]
    NoProfiles,

    #[error("No current profile set. Run 'privatebox config use <name>' or pass --profile.")]
    NoCurrentProfile,

    #[error("Profile '{0}' not found.")]
    ProfileNotFound(String),

    #[error("Profile '{0}' already exists.")]
    ProfileExists(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Boot script '{0}' not found.")]
    ScriptNotFound(String),

    #[error("Cannot delete boot script '{name}': used by instances: {}", .users.join(", "))]
    ScriptInUse { name: String, users: Vec<String> },
}
