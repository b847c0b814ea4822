//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and `privatebox_common`,
//! never from `crate::infra`, `crate::commands`, or `crate::output`.

use std::path::PathBuf;
use std::process::Output;

use anyhow::Result;
use privatebox_common::RuntimeStatus;

use crate::domain::config::AppConfig;
use crate::domain::deployment::{DeploymentState, Placement, RealizedResource};
use crate::domain::error::StoreError;
use crate::domain::graph::{Outputs, ResolvedInputs, ResourceGraph, ResourceNode};
use crate::domain::instance::InstanceSpec;

// ── Value Types ───────────────────────────────────────────────────────────────

/// Result of realizing one resource at the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Realized {
    /// Provider identifier of the new resource.
    pub physical_id: String,
    pub outputs: Outputs,
}

/// Requested power state for a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
}

// ── Provider Port Traits ──────────────────────────────────────────────────────

/// Static facts about a provider backend.
pub trait ProviderInfo {
    /// Backend name recorded in deployment state (e.g. `"aws"`).
    fn name(&self) -> &str;
    /// User to log in as on instances this provider creates.
    fn default_login_user(&self) -> &str;
    /// Region and account this provider operates in, recorded with each deployment.
    fn placement(&self) -> Placement;
}

/// Maps an instance request to the provider's resource graph.
pub trait GraphBuilder {
    /// Build the graph for `spec`.
    ///
    /// # Errors
    ///
    /// Returns a `BuildError` for invalid names, unreadable key material or
    /// an ill-formed graph.
    fn build_graph(&self, spec: &InstanceSpec) -> Result<ResourceGraph>;
}

/// Creates, reads and deletes individual resources.
#[allow(async_fn_in_trait)]
pub trait ResourceRealizer {
    /// Create the resource for `node` from its resolved inputs.
    async fn create(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<Realized>;
    /// Resolve a data-source node (such as an image lookup) without creating anything.
    async fn read(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<Outputs>;
    /// Delete a previously realized resource. Deleting something already
    /// gone is success.
    async fn delete(&self, resource: &RealizedResource) -> Result<()>;
}

/// Live status of a realized compute resource.
#[allow(async_fn_in_trait)]
pub trait StatusProbe {
    /// Query the provider for `resource_id`.
    ///
    /// # Errors
    ///
    /// Fails with `ProbeError::NotFound` when the provider does not know the id.
    async fn probe(&self, resource_id: &str) -> Result<RuntimeStatus>;
}

/// Start and stop compute resources.
#[allow(async_fn_in_trait)]
pub trait PowerControl {
    async fn set_power(&self, resource_id: &str, action: PowerAction) -> Result<()>;
}

/// Composite trait: any type implementing all provider sub-traits is a `CloudProvider`.
pub trait CloudProvider:
    ProviderInfo + GraphBuilder + ResourceRealizer + StatusProbe + PowerControl
{
}

/// Blanket implementation: any type implementing all provider sub-traits is a `CloudProvider`.
impl<T> CloudProvider for T where
    T: ProviderInfo + GraphBuilder + ResourceRealizer + StatusProbe + PowerControl
{
}

// ── State Port ────────────────────────────────────────────────────────────────

/// Per-instance deployment records, keyed by instance name.
///
/// Each instance name is an isolated partition: writes to one name never
/// touch another's record.
#[allow(async_fn_in_trait)]
pub trait DeploymentStateStore {
    /// Backend URL this store was opened with.
    fn backend(&self) -> &str;
    /// Persist the record for `state.name`.
    async fn put(&self, state: &DeploymentState) -> Result<()>;
    /// Load the record for `name`, `None` if there is none.
    async fn get(&self, name: &str) -> Result<Option<DeploymentState>>;
    /// Remove the record for `name`. Removing a missing record is a no-op.
    async fn delete(&self, name: &str) -> Result<()>;
    /// Names of every instance with a record, sorted.
    ///
    /// # Errors
    ///
    /// Backends that cannot enumerate partitions fail with
    /// `StoreError::UnsupportedBackend`.
    async fn list(&self) -> Result<Vec<String>> {
        Err(StoreError::UnsupportedBackend(self.backend().to_string()).into())
    }
}

// ── Config Port ───────────────────────────────────────────────────────────────

/// Abstracts configuration persistence.
pub trait ConfigStore {
    /// Load the configuration; a missing file yields the default config.
    fn load(&self) -> Result<AppConfig>;
    /// Persist the configuration.
    fn save(&self, config: &AppConfig) -> Result<()>;
    /// Path of the configuration file.
    fn path(&self) -> Result<PathBuf>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: std::time::Duration,
    ) -> Result<Output>;
    /// Run a program with stdin piped from `stdin`.
    async fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> Result<Output>;
    /// Run a program with inherited stdio and extra environment, returning
    /// only its exit status. No timeout: used for interactive sessions.
    async fn run_status(
        &self,
        program: &str,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<std::process::ExitStatus>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait, no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}
