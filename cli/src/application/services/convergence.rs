//! Application service: converge an instance's resource graph.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! All I/O is routed through injected port traits.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::ports::{CloudProvider, DeploymentStateStore, ProgressReporter};
use crate::domain::deployment::{DeploymentState, RealizedResource};
use crate::domain::error::DeploymentError;
use crate::domain::graph::{Outputs, ResourceGraph, ResourceNode, resolve_inputs};
use crate::domain::instance::{InstanceSpec, validate_instance_name};

/// What convergence will do with one node of the desired graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// Recorded with identical inputs; left alone.
    Keep,
    /// Not recorded yet.
    Create,
    /// Recorded, but inputs changed or a dependency is being replaced.
    Replace,
    /// Data source whose lookup depends on a node that is still changing.
    Read,
}

/// Outcome of the plan phase. Computed without mutating anything.
#[derive(Debug, Default)]
pub struct ConvergencePlan {
    /// Desired nodes in realization order with their action.
    pub steps: Vec<(String, NodeAction)>,
    /// Recorded resources that are no longer part of the graph.
    pub orphans: Vec<String>,
    /// Data-source outputs read during planning.
    lookups: HashMap<String, Outputs>,
}

impl ConvergencePlan {
    /// Whether applying the plan would touch the provider.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.orphans.is_empty() && self.steps.iter().all(|(_, a)| *a == NodeAction::Keep)
    }

    fn action(&self, id: &str) -> NodeAction {
        self.steps
            .iter()
            .find(|(step, _)| step == id)
            .map_or(NodeAction::Keep, |(_, a)| *a)
    }
}

/// Drives a provider's resource graph to the desired state and tears it down.
///
/// Operations on one instance run strictly sequentially. Different instances
/// own disjoint state partitions and may converge concurrently.
pub struct ConvergenceEngine<'a, P, S, R> {
    provider: &'a P,
    store: &'a S,
    reporter: &'a R,
}

impl<'a, P, S, R> ConvergenceEngine<'a, P, S, R>
where
    P: CloudProvider,
    S: DeploymentStateStore,
    R: ProgressReporter,
{
    pub fn new(provider: &'a P, store: &'a S, reporter: &'a R) -> Self {
        Self {
            provider,
            store,
            reporter,
        }
    }

    /// Create-or-update the deployment for `spec`.
    ///
    /// A partially recorded deployment is resumed, never restarted.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::Conflict` when the record belongs to another
    /// profile, `DeploymentError::Misplaced` when it lives in another region
    /// or account, `DeploymentError::Cancelled` when `cancel` fires, and the
    /// first provider error (with `DeploymentError::ResourceFailed` context)
    /// otherwise. Everything realized before the failure stays recorded.
    pub async fn up(
        &self,
        spec: &InstanceSpec,
        cancel: &CancellationToken,
    ) -> Result<DeploymentState> {
        let graph = self.provider.build_graph(spec)?;
        let existing = self.store.get(&spec.name).await?;
        if let Some(state) = &existing
            && state.profile != spec.profile
        {
            return Err(DeploymentError::Conflict {
                name: spec.name.clone(),
                owner: state.profile.clone(),
            }
            .into());
        }
        if let Some(state) = &existing {
            state.ensure_placement(&self.provider.placement())?;
        }
        self.converge(spec, &graph, existing, cancel).await
    }

    /// Strict variant of [`up`](Self::up): refuses to touch a complete deployment.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::Conflict` if `spec.name` already has a
    /// deployment with a compute instance, plus everything `up` returns.
    pub async fn create(
        &self,
        spec: &InstanceSpec,
        cancel: &CancellationToken,
    ) -> Result<DeploymentState> {
        validate_instance_name(&spec.name)?;
        if let Some(state) = self.store.get(&spec.name).await?
            && (state.is_complete() || state.profile != spec.profile)
        {
            return Err(DeploymentError::Conflict {
                name: spec.name.clone(),
                owner: state.profile,
            }
            .into());
        }
        self.up(spec, cancel).await
    }

    /// Remove every recorded resource of `name`, then its record.
    ///
    /// Works from the record alone; the instance's spec is not needed.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::NotProvisioned` if there is no record,
    /// `DeploymentError::Misplaced` if the provider targets another region or
    /// account, and `DeploymentError::DestroyIncomplete` when a deletion fails or `cancel`
    /// fires; the remaining resources stay recorded so destroy can be rerun.
    pub async fn destroy(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let mut state = self
            .store
            .get(name)
            .await?
            .ok_or_else(|| DeploymentError::NotProvisioned(name.to_string()))?;
        state.ensure_placement(&self.provider.placement())?;

        let order: Vec<RealizedResource> =
            state.teardown_order()?.into_iter().cloned().collect();
        info!(instance = %name, resources = order.len(), "destroying deployment");

        for resource in &order {
            if let Err(e) = self.remove(&mut state, resource, cancel).await {
                return Err(e.context(DeploymentError::DestroyIncomplete {
                    name: name.to_string(),
                    remaining: state.resources.len(),
                }));
            }
        }

        self.store.delete(name).await?;
        info!(instance = %name, "deployment record deleted");
        self.reporter.success(&format!("instance '{name}' destroyed"));
        Ok(())
    }

    /// The persisted record for `name`. Never calls the provider.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::NotProvisioned` if there is no record.
    pub async fn outputs(&self, name: &str) -> Result<DeploymentState> {
        self.store
            .get(name)
            .await?
            .ok_or_else(|| DeploymentError::NotProvisioned(name.to_string()).into())
    }

    /// Compute the actions needed to move `state` to `graph`.
    ///
    /// Only data-source lookups reach the provider, raced against `cancel`.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup fails or `cancel` fires.
    pub async fn plan(
        &self,
        graph: &ResourceGraph,
        state: &DeploymentState,
        cancel: &CancellationToken,
    ) -> Result<ConvergencePlan> {
        let mut plan = ConvergencePlan::default();
        let mut known: HashMap<String, Outputs> = HashMap::new();
        let mut changing: HashSet<String> = HashSet::new();

        for node in graph.realization_order() {
            let blocked = node.depends_on.iter().any(|d| changing.contains(d));
            let recorded = state.resource(&node.id);

            let action = if node.kind.is_data_source() {
                if blocked {
                    changing.insert(node.id.clone());
                    NodeAction::Read
                } else {
                    let inputs = resolve_inputs(node, &known)?;
                    let lookup = async {
                        self.provider
                            .read(node, &inputs)
                            .await
                            .with_context(|| failed(node))
                    };
                    let outputs = race(cancel, &state.name, lookup).await?;
                    let fresh = recorded.is_some_and(|r| r.outputs == outputs);
                    if !fresh {
                        changing.insert(node.id.clone());
                    }
                    known.insert(node.id.clone(), outputs.clone());
                    plan.lookups.insert(node.id.clone(), outputs);
                    if fresh { NodeAction::Keep } else { NodeAction::Read }
                }
            } else if blocked {
                changing.insert(node.id.clone());
                if recorded.is_some() {
                    NodeAction::Replace
                } else {
                    NodeAction::Create
                }
            } else {
                let inputs = resolve_inputs(node, &known)?;
                match recorded {
                    Some(r) if r.inputs == inputs => {
                        known.insert(node.id.clone(), r.outputs.clone());
                        NodeAction::Keep
                    }
                    Some(_) => {
                        changing.insert(node.id.clone());
                        NodeAction::Replace
                    }
                    None => {
                        changing.insert(node.id.clone());
                        NodeAction::Create
                    }
                }
            };
            debug!(instance = %state.name, node = %node.id, ?action, "planned");
            plan.steps.push((node.id.clone(), action));
        }

        plan.orphans = state
            .resources
            .iter()
            .filter(|r| !graph.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();
        Ok(plan)
    }

    async fn converge(
        &self,
        spec: &InstanceSpec,
        graph: &ResourceGraph,
        existing: Option<DeploymentState>,
        cancel: &CancellationToken,
    ) -> Result<DeploymentState> {
        let name = spec.name.as_str();
        let mut state = existing
            .unwrap_or_else(|| DeploymentState::new(name, self.provider.name(), &spec.profile));
        if state.placement.is_none() {
            state.placement = Some(self.provider.placement());
        }

        self.reporter.step(&format!("planning instance '{name}'..."));
        let plan = self.plan(graph, &state, cancel).await?;
        if plan.is_noop() {
            info!(instance = %name, "deployment is up to date");
            self.reporter.success(&format!("instance '{name}' is up to date"));
            return Ok(state);
        }

        // Replaced and orphaned resources go first, dependents before dependencies.
        let doomed: HashSet<&str> = plan
            .steps
            .iter()
            .filter(|(_, a)| *a == NodeAction::Replace)
            .map(|(id, _)| id.as_str())
            .chain(plan.orphans.iter().map(String::as_str))
            .collect();
        let teardown: Vec<RealizedResource> = state
            .teardown_order()?
            .into_iter()
            .filter(|r| doomed.contains(r.id.as_str()))
            .cloned()
            .collect();
        for resource in &teardown {
            self.remove(&mut state, resource, cancel).await?;
        }

        for node in graph.realization_order() {
            match plan.action(&node.id) {
                NodeAction::Keep => {}
                NodeAction::Read => self.refresh_lookup(&mut state, node, &plan, cancel).await?,
                NodeAction::Create | NodeAction::Replace => {
                    self.realize(&mut state, node, cancel).await?;
                }
            }
        }

        state.refresh_summary(spec.user_data_name.as_deref());
        self.store.put(&state).await?;
        info!(
            instance = %name,
            instance_id = state.instance_id.as_deref().unwrap_or_default(),
            "deployment converged"
        );
        self.reporter.success(&format!("instance '{name}' is ready"));
        Ok(state)
    }

    async fn refresh_lookup(
        &self,
        state: &mut DeploymentState,
        node: &ResourceNode,
        plan: &ConvergencePlan,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let inputs = resolve_inputs(node, &state.realized_outputs())?;
        let outputs = match plan.lookups.get(&node.id) {
            Some(outputs) => outputs.clone(),
            None => {
                let lookup = async {
                    self.provider
                        .read(node, &inputs)
                        .await
                        .with_context(|| failed(node))
                };
                race(cancel, &state.name, lookup).await?
            }
        };
        debug!(instance = %state.name, node = %node.id, "lookup resolved");
        state.record(RealizedResource {
            id: node.id.clone(),
            kind: node.kind,
            physical_id: outputs.get("id").cloned().unwrap_or_default(),
            depends_on: node.depends_on.clone(),
            inputs,
            outputs,
        });
        Ok(())
    }

    async fn realize(
        &self,
        state: &mut DeploymentState,
        node: &ResourceNode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DeploymentError::Cancelled(state.name.clone()).into());
        }
        let inputs = resolve_inputs(node, &state.realized_outputs())?;
        self.reporter
            .step(&format!("creating {} '{}'...", node.kind, node.id));
        info!(instance = %state.name, node = %node.id, kind = %node.kind, "creating resource");

        // In-flight mutations are not interrupted so their result is recorded.
        let realized = self
            .provider
            .create(node, &inputs)
            .await
            .with_context(|| failed(node))?;

        debug!(node = %node.id, physical_id = %realized.physical_id, "resource created");
        state.record(RealizedResource {
            id: node.id.clone(),
            kind: node.kind,
            physical_id: realized.physical_id,
            depends_on: node.depends_on.clone(),
            inputs,
            outputs: realized.outputs,
        });
        self.store.put(state).await
    }

    async fn remove(
        &self,
        state: &mut DeploymentState,
        resource: &RealizedResource,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !resource.kind.is_data_source() {
            if cancel.is_cancelled() {
                return Err(DeploymentError::Cancelled(state.name.clone()).into());
            }
            self.reporter
                .step(&format!("deleting {} '{}'...", resource.kind, resource.id));
            info!(
                instance = %state.name,
                node = %resource.id,
                physical_id = %resource.physical_id,
                "deleting resource"
            );
            self.provider
                .delete(resource)
                .await
                .with_context(|| DeploymentError::ResourceFailed {
                    node: resource.id.clone(),
                    kind: resource.kind.to_string(),
                })?;
        }
        state.forget(&resource.id);
        self.store.put(state).await
    }
}

fn failed(node: &ResourceNode) -> DeploymentError {
    DeploymentError::ResourceFailed {
        node: node.id.clone(),
        kind: node.kind.to_string(),
    }
}

/// Run a read-only provider call, abandoning it if `cancel` fires first.
async fn race<T>(
    cancel: &CancellationToken,
    name: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DeploymentError::Cancelled(name.to_string()).into()),
        result = fut => result,
    }
}
