//! Deployment record: the persisted, per-instance realization of a graph.
//!
//! Pure types only. Persistence lives behind the `DeploymentStateStore` port.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{BuildError, DeploymentError};
use crate::domain::graph::{Outputs, ResourceKind, ResolvedInputs, topological_order};

/// One realized resource as recorded after a successful provider call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealizedResource {
    /// Logical id (e.g. `dev1-sg`).
    pub id: String,
    pub kind: ResourceKind,
    /// Provider identifier of the resource (e.g. `sg-0abc`).
    pub physical_id: String,
    /// Logical ids this resource depended on when it was created.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Resolved inputs it was created with; compared on the next convergence.
    #[serde(default)]
    pub inputs: ResolvedInputs,
    #[serde(default)]
    pub outputs: Outputs,
}

/// Where a provider realizes resources: the region plus the credentials
/// profile that selects the account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl Placement {
    #[must_use]
    pub fn new(region: &str, account: Option<&str>) -> Self {
        Self {
            region: region.to_string(),
            account: account.map(str::to_string),
        }
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.account {
            Some(account) => write!(f, "{} (credentials '{account}')", self.region),
            None => f.write_str(&self.region),
        }
    }
}

/// Per-instance deployment record.
///
/// Created on the first successful resource creation, updated as resources
/// are realized or removed, deleted once a destroy has removed everything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentState {
    pub name: String,
    /// Provider backend that realized the resources (e.g. `"aws"`).
    pub provider: String,
    /// Profile that owns the instance.
    pub profile: String,
    /// Where the resources live. Absent on records written before it was tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    /// Provider identifier of the compute instance, once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    /// Named boot script the instance was created with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_name: Option<String>,
    /// Provider-specific output values.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Realized resources in the order they were created.
    #[serde(default)]
    pub resources: Vec<RealizedResource>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentState {
    /// Empty record for a first deployment.
    #[must_use]
    pub fn new(name: &str, provider: &str, profile: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            profile: profile.to_string(),
            placement: None,
            instance_id: None,
            public_ip: None,
            private_ip: None,
            user_data_name: None,
            outputs: BTreeMap::new(),
            resources: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fail unless the resources are reachable from `current`.
    ///
    /// A provider pointed at another region or account sees none of the
    /// recorded resources and would report them all as gone.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::Misplaced` when the recorded placement differs.
    pub fn ensure_placement(&self, current: &Placement) -> Result<(), DeploymentError> {
        match &self.placement {
            Some(recorded) if recorded != current => Err(DeploymentError::Misplaced {
                name: self.name.clone(),
                owner: self.profile.clone(),
                recorded: recorded.to_string(),
                current: current.to_string(),
            }),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&RealizedResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Insert or replace the record for `resource.id`.
    pub fn record(&mut self, resource: RealizedResource) {
        if let Some(existing) = self.resources.iter_mut().find(|r| r.id == resource.id) {
            *existing = resource;
        } else {
            self.resources.push(resource);
        }
        self.updated_at = Utc::now();
    }

    /// Drop the record for `id`. Returns the removed resource.
    pub fn forget(&mut self, id: &str) -> Option<RealizedResource> {
        let pos = self.resources.iter().position(|r| r.id == id)?;
        self.updated_at = Utc::now();
        Some(self.resources.remove(pos))
    }

    /// Whether the compute instance has been realized.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.resources
            .iter()
            .any(|r| r.kind == ResourceKind::ComputeInstance)
    }

    /// Outputs of every recorded resource, keyed by logical id.
    #[must_use]
    pub fn realized_outputs(&self) -> HashMap<String, Outputs> {
        self.resources
            .iter()
            .map(|r| (r.id.clone(), r.outputs.clone()))
            .collect()
    }

    /// Recorded resources ordered so dependents come before their
    /// dependencies, the order they must be removed in.
    ///
    /// Edges to resources that are no longer recorded are ignored.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Cycle` if the recorded edges are cyclic.
    pub fn teardown_order(&self) -> Result<Vec<&RealizedResource>, BuildError> {
        let deps: Vec<Vec<String>> = self
            .resources
            .iter()
            .map(|r| {
                r.depends_on
                    .iter()
                    .filter(|d| self.resource(d).is_some())
                    .cloned()
                    .collect()
            })
            .collect();
        let edges: Vec<(&str, &[String])> = self
            .resources
            .iter()
            .zip(&deps)
            .map(|(r, d)| (r.id.as_str(), d.as_slice()))
            .collect();
        let mut order = topological_order(&edges)?;
        order.reverse();
        Ok(order.into_iter().map(|i| &self.resources[i]).collect())
    }

    /// Refresh the summary fields from the compute instance's outputs.
    pub fn refresh_summary(&mut self, user_data_name: Option<&str>) {
        let compute = self
            .resources
            .iter()
            .find(|r| r.kind == ResourceKind::ComputeInstance)
            .cloned();
        match compute {
            Some(vm) => {
                self.instance_id = Some(vm.physical_id.clone());
                self.public_ip = vm.outputs.get("public_ip").filter(|s| !s.is_empty()).cloned();
                self.private_ip = vm.outputs.get("private_ip").filter(|s| !s.is_empty()).cloned();
                let mut outputs = BTreeMap::new();
                for resource in &self.resources {
                    for (key, value) in &resource.outputs {
                        outputs.insert(format!("{}.{key}", resource.kind), value.clone());
                    }
                }
                self.outputs = outputs;
            }
            None => {
                self.instance_id = None;
                self.public_ip = None;
                self.private_ip = None;
                self.outputs.clear();
            }
        }
        self.user_data_name = user_data_name.map(str::to_string);
        self.updated_at = Utc::now();
    }
}

/// Parsed state backend URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    /// Local directory tree (`file://<path>`); `~/` is not yet expanded.
    File(String),
    /// S3 bucket and key prefix (`s3://bucket/prefix`).
    S3 { bucket: String, prefix: String },
    /// Anything else; no store implementation exists for it.
    Other(String),
}

impl StateBackend {
    #[must_use]
    pub fn parse(url: &str) -> Self {
        if let Some(path) = url.strip_prefix("file://") {
            return StateBackend::File(path.to_string());
        }
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if !bucket.is_empty() {
                return StateBackend::S3 {
                    bucket: bucket.to_string(),
                    prefix: prefix.trim_matches('/').to_string(),
                };
            }
        }
        StateBackend::Other(url.to_string())
    }
}

/// Location of `name`'s partition for a backend URL.
///
/// File backends isolate each instance in its own directory
/// (`<backend>/<name>`); remote backends key objects by name themselves and
/// are returned unchanged.
#[must_use]
pub fn partition_location(backend: &str, name: &str) -> String {
    if backend.starts_with("file://") {
        let base = backend.trim_end_matches('/');
        format!("{base}/{name}")
    } else {
        backend.to_string()
    }
}
