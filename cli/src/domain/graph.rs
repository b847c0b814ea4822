//! Resource graph: the provider-specific resources one instance needs and
//! the dependency edges between them.
//!
//! Graphs are rebuilt on every convergence call and never persisted; only the
//! realized outputs are. Everything here is pure: validation, deterministic
//! topological ordering, and input resolution against realized outputs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::BuildError;

/// Output values of one realized resource.
pub type Outputs = BTreeMap<String, String>;

/// Inputs with every reference replaced by the referenced output value.
pub type ResolvedInputs = BTreeMap<String, serde_json::Value>;

/// Role a resource plays in an instance's graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    EncryptionKey,
    SecurityGroup,
    IamRole,
    RolePolicyAttachment,
    InstanceProfile,
    KeyPair,
    MachineImage,
    ComputeInstance,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::EncryptionKey => "encryption_key",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::IamRole => "iam_role",
            ResourceKind::RolePolicyAttachment => "role_policy_attachment",
            ResourceKind::InstanceProfile => "instance_profile",
            ResourceKind::KeyPair => "key_pair",
            ResourceKind::MachineImage => "machine_image",
            ResourceKind::ComputeInstance => "compute_instance",
        }
    }

    /// Data sources are looked up, never created or deleted.
    #[must_use]
    pub fn is_data_source(self) -> bool {
        matches!(self, ResourceKind::MachineImage)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an output of another node in the same graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputRef {
    pub node: String,
    pub output: String,
}

/// A declared input value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InputValue {
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
    Json(serde_json::Value),
    Ref(OutputRef),
}

/// One resource to realize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    /// Logical id derived from the instance name and the resource role.
    pub id: String,
    pub kind: ResourceKind,
    pub inputs: BTreeMap<String, InputValue>,
    /// Logical ids this node depends on. Every `Ref` target is included.
    pub depends_on: Vec<String>,
}

impl ResourceNode {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn input(mut self, key: &str, value: InputValue) -> Self {
        if let InputValue::Ref(r) = &value {
            self.add_dependency(&r.node);
        }
        self.inputs.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn text(self, key: &str, value: impl Into<String>) -> Self {
        self.input(key, InputValue::Text(value.into()))
    }

    /// Bind `key` to output `output` of node `node`, adding the dependency edge.
    #[must_use]
    pub fn reference(self, key: &str, node: &str, output: &str) -> Self {
        self.input(
            key,
            InputValue::Ref(OutputRef {
                node: node.to_string(),
                output: output.to_string(),
            }),
        )
    }

    /// Order-only dependency without a data reference.
    #[must_use]
    pub fn after(mut self, node: &str) -> Self {
        self.add_dependency(node);
        self
    }

    fn add_dependency(&mut self, node: &str) {
        if !self.depends_on.iter().any(|d| d == node) {
            self.depends_on.push(node.to_string());
        }
    }
}

/// Validated, ordered collection of nodes for one instance under one provider.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    order: Vec<usize>,
    compute: usize,
}

impl ResourceGraph {
    /// Validate `nodes` and compute the realization order.
    ///
    /// # Errors
    ///
    /// Returns a `BuildError` if ids repeat, a dependency is unknown, the
    /// edges form a cycle, or the single compute instance is not a sink.
    pub fn new(nodes: Vec<ResourceNode>) -> Result<Self, BuildError> {
        let mut seen = BTreeSet::new();
        for node in &nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(BuildError::DuplicateNode(node.id.clone()));
            }
        }

        let mut compute = None;
        for (idx, node) in nodes.iter().enumerate() {
            if node.kind == ResourceKind::ComputeInstance {
                if compute.is_some() {
                    return Err(BuildError::DuplicateNode(node.id.clone()));
                }
                compute = Some(idx);
            }
        }
        let compute = compute.ok_or(BuildError::MissingCompute)?;

        let edges: Vec<(&str, &[String])> = nodes
            .iter()
            .map(|n| (n.id.as_str(), n.depends_on.as_slice()))
            .collect();
        let order = topological_order(&edges)?;

        let compute_id = &nodes[compute].id;
        if let Some(dependent) = nodes.iter().find(|n| n.depends_on.contains(compute_id)) {
            return Err(BuildError::ComputeNotSink {
                compute: compute_id.clone(),
                dependent: dependent.id.clone(),
            });
        }

        Ok(Self {
            nodes,
            order,
            compute,
        })
    }

    /// Nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The compute instance node.
    #[must_use]
    pub fn compute(&self) -> &ResourceNode {
        &self.nodes[self.compute]
    }

    /// Nodes ordered so every dependency precedes its dependents.
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    pub fn realization_order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().map(|&i| &self.nodes[i])
    }
}

/// Kahn's algorithm over `(id, dependencies)` pairs.
///
/// Returns indices into `nodes`. Among ready nodes the lowest index is taken
/// first, which makes the order a pure function of the input.
///
/// # Errors
///
/// `BuildError::UnknownDependency` for a dangling edge, `BuildError::Cycle`
/// listing the nodes that could not be ordered.
pub fn topological_order(nodes: &[(&str, &[String])]) -> Result<Vec<usize>, BuildError> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (*id, i))
        .collect();

    let mut indegree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (id, deps)) in nodes.iter().enumerate() {
        for dep in *deps {
            let Some(&d) = index.get(dep.as_str()) else {
                return Err(BuildError::UnknownDependency {
                    node: (*id).to_string(),
                    dependency: dep.clone(),
                });
            };
            indegree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &next in &dependents[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .filter(|i| indegree[*i] > 0)
            .map(|i| nodes[i].0.to_string())
            .collect();
        return Err(BuildError::Cycle(stuck));
    }
    Ok(order)
}

/// Replace every `Ref` in `node`'s inputs with the referenced output value.
///
/// # Errors
///
/// Returns an error if a referenced node or output has not been realized.
pub fn resolve_inputs(
    node: &ResourceNode,
    realized: &HashMap<String, Outputs>,
) -> Result<ResolvedInputs> {
    let mut resolved = ResolvedInputs::new();
    for (key, value) in &node.inputs {
        let json = match value {
            InputValue::Text(s) => serde_json::Value::String(s.clone()),
            InputValue::List(items) => serde_json::Value::from(items.clone()),
            InputValue::Map(map) => serde_json::to_value(map)?,
            InputValue::Json(v) => v.clone(),
            InputValue::Ref(r) => {
                let value = realized
                    .get(&r.node)
                    .and_then(|outputs| outputs.get(&r.output))
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "input '{key}' of '{}' needs output '{}' of '{}', which is not realized",
                            node.id,
                            r.output,
                            r.node
                        )
                    })?;
                serde_json::Value::String(value.clone())
            }
        };
        resolved.insert(key.clone(), json);
    }
    Ok(resolved)
}
