//! Shared test doubles: an in-memory provider with call recording and
//! failure injection, in-memory state stores and progress reporters.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use privatebox_cli::application::ports::{
    DeploymentStateStore, GraphBuilder, PowerAction, PowerControl, ProgressReporter, ProviderInfo,
    Realized, ResourceRealizer, StatusProbe,
};
use privatebox_cli::domain::deployment::{DeploymentState, Placement, RealizedResource};
use privatebox_cli::domain::error::ProbeError;
use privatebox_cli::domain::graph::{
    InputValue, Outputs, ResolvedInputs, ResourceGraph, ResourceKind, ResourceNode,
};
use privatebox_cli::domain::instance::{InstanceSpec, merge_tags, validate_instance_name};
use privatebox_common::{LifecycleState, RuntimeStatus};
use tokio_util::sync::CancellationToken;

// ── Provider stub ─────────────────────────────────────────────────────────────

/// Region a fresh stub reports.
pub const STUB_REGION: &str = "stub-1";

/// How a probe of one resource id should answer.
#[derive(Debug, Clone)]
pub enum ProbeReply {
    State(LifecycleState),
    NotFound,
    Fail,
}

/// In-memory provider. Graph per instance `n`:
/// `n-key`, `n-sg`, `n-image` (lookup) and the compute node `n`.
#[derive(Default)]
pub struct StubProvider {
    calls: Mutex<Vec<String>>,
    counter: AtomicUsize,
    fail_create: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    image: Mutex<String>,
    probes: Mutex<HashMap<String, ProbeReply>>,
    cancel_after_create: Mutex<Option<(String, CancellationToken)>>,
    probe_delay: Mutex<Option<Duration>>,
    region: Mutex<String>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Self {
        let stub = Self::default();
        *stub.image.lock().unwrap() = "ami-1".to_string();
        *stub.region.lock().unwrap() = STUB_REGION.to_string();
        stub
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls of one verb (`create`, `delete`, `read`, `probe`, `power`).
    pub fn calls_of(&self, verb: &str) -> Vec<String> {
        let prefix = format!("{verb}:");
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_create_of(&self, node: &str) {
        self.fail_create.lock().unwrap().insert(node.to_string());
    }

    pub fn fail_delete_of(&self, node: &str) {
        self.fail_delete.lock().unwrap().insert(node.to_string());
    }

    pub fn heal(&self) {
        self.fail_create.lock().unwrap().clear();
        self.fail_delete.lock().unwrap().clear();
    }

    pub fn set_image(&self, id: &str) {
        *self.image.lock().unwrap() = id.to_string();
    }

    pub fn set_probe(&self, resource_id: &str, reply: ProbeReply) {
        self.probes
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), reply);
    }

    /// Fire `token` right after `node` has been created.
    pub fn cancel_after_creating(&self, node: &str, token: CancellationToken) {
        *self.cancel_after_create.lock().unwrap() = Some((node.to_string(), token));
    }

    /// Point the stub at another region, as a differently configured profile would.
    pub fn set_region(&self, region: &str) {
        *self.region.lock().unwrap() = region.to_string();
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = Some(delay);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ProviderInfo for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn default_login_user(&self) -> &str {
        "admin"
    }

    fn placement(&self) -> Placement {
        Placement::new(&self.region.lock().unwrap(), None)
    }
}

impl GraphBuilder for StubProvider {
    fn build_graph(&self, spec: &InstanceSpec) -> Result<ResourceGraph> {
        validate_instance_name(&spec.name)?;
        let name = &spec.name;
        let mut compute = ResourceNode::new(name.clone(), ResourceKind::ComputeInstance)
            .text("size", spec.size.clone())
            .reference("image_id", &format!("{name}-image"), "id")
            .reference("group_id", &format!("{name}-sg"), "id")
            .reference("key_arn", &format!("{name}-key"), "arn")
            .input("tags", InputValue::Map(merge_tags(spec)));
        if let Some(script) = &spec.user_data {
            compute = compute.text("user_data", script.clone());
        }
        Ok(ResourceGraph::new(vec![
            ResourceNode::new(format!("{name}-key"), ResourceKind::EncryptionKey)
                .text("description", format!("disk key for {name}")),
            ResourceNode::new(format!("{name}-sg"), ResourceKind::SecurityGroup)
                .text("group_name", format!("{name}-sg")),
            ResourceNode::new(format!("{name}-image"), ResourceKind::MachineImage)
                .text("family", "ubuntu"),
            compute,
        ])?)
    }
}

impl ResourceRealizer for StubProvider {
    async fn create(&self, node: &ResourceNode, _inputs: &ResolvedInputs) -> Result<Realized> {
        self.record(format!("create:{}", node.id));
        tokio::task::yield_now().await;
        if self.fail_create.lock().unwrap().contains(&node.id) {
            bail!("injected create failure for {}", node.id);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let physical_id = format!("{}-{n}", node.kind);
        let mut outputs = Outputs::new();
        outputs.insert("id".into(), physical_id.clone());
        outputs.insert("arn".into(), format!("arn:stub:{physical_id}"));
        if node.kind == ResourceKind::ComputeInstance {
            outputs.insert("public_ip".into(), format!("203.0.113.{n}"));
            outputs.insert("private_ip".into(), format!("10.0.0.{n}"));
        }
        if let Some((target, token)) = self.cancel_after_create.lock().unwrap().as_ref()
            && *target == node.id
        {
            token.cancel();
        }
        Ok(Realized {
            physical_id,
            outputs,
        })
    }

    async fn read(&self, node: &ResourceNode, _inputs: &ResolvedInputs) -> Result<Outputs> {
        self.record(format!("read:{}", node.id));
        let mut outputs = Outputs::new();
        outputs.insert("id".into(), self.image.lock().unwrap().clone());
        Ok(outputs)
    }

    async fn delete(&self, resource: &RealizedResource) -> Result<()> {
        self.record(format!("delete:{}", resource.id));
        if self.fail_delete.lock().unwrap().contains(&resource.id) {
            bail!("injected delete failure for {}", resource.id);
        }
        Ok(())
    }
}

impl StatusProbe for StubProvider {
    async fn probe(&self, resource_id: &str) -> Result<RuntimeStatus> {
        self.record(format!("probe:{resource_id}"));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.probe_delay.lock().unwrap();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self.probes.lock().unwrap().get(resource_id).cloned();
        match reply.unwrap_or(ProbeReply::State(LifecycleState::Running)) {
            ProbeReply::State(state) => {
                let mut status = RuntimeStatus::unknown(resource_id);
                status.state = state;
                status.public_ip = Some("203.0.113.9".into());
                Ok(status)
            }
            ProbeReply::NotFound => Err(ProbeError::NotFound(resource_id.to_string()).into()),
            ProbeReply::Fail => bail!("throttled"),
        }
    }
}

impl PowerControl for StubProvider {
    async fn set_power(&self, resource_id: &str, action: PowerAction) -> Result<()> {
        self.record(format!("power:{resource_id}:{action:?}"));
        Ok(())
    }
}

// ── State stores ──────────────────────────────────────────────────────────────

/// In-memory store. Every `put` is kept in `history`.
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, DeploymentState>>,
    pub history: Mutex<Vec<DeploymentState>>,
    listable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            history: Mutex::new(Vec::new()),
            listable: true,
        }
    }

    /// A store whose backend cannot enumerate partitions.
    pub fn unlistable() -> Self {
        Self {
            listable: false,
            ..Self::new()
        }
    }

    pub fn snapshot(&self, name: &str) -> Option<DeploymentState> {
        self.records.lock().unwrap().get(name).cloned()
    }

    pub fn insert(&self, state: DeploymentState) {
        self.records
            .lock()
            .unwrap()
            .insert(state.name.clone(), state);
    }

    pub fn puts(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

impl DeploymentStateStore for MemoryStore {
    fn backend(&self) -> &str {
        if self.listable { "memory://" } else { "memory+nolist://" }
    }

    async fn put(&self, state: &DeploymentState) -> Result<()> {
        self.history.lock().unwrap().push(state.clone());
        self.insert(state.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<DeploymentState>> {
        Ok(self.snapshot(name))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.records.lock().unwrap().remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        if !self.listable {
            return Err(privatebox_cli::domain::error::StoreError::UnsupportedBackend(
                self.backend().to_string(),
            )
            .into());
        }
        Ok(self.records.lock().unwrap().keys().cloned().collect())
    }
}

/// A complete record in `region` pointing at compute id `id`.
pub fn deployed_in(name: &str, id: &str, region: &str) -> DeploymentState {
    let mut state = deployed(name, id);
    state.placement = Some(Placement::new(region, None));
    state
}

/// A complete record pointing at compute id `id`.
pub fn deployed(name: &str, id: &str) -> DeploymentState {
    let mut state = DeploymentState::new(name, "stub", "default");
    let mut outputs = Outputs::new();
    outputs.insert("id".into(), id.to_string());
    state.record(RealizedResource {
        id: name.to_string(),
        kind: ResourceKind::ComputeInstance,
        physical_id: id.to_string(),
        depends_on: Vec::new(),
        inputs: ResolvedInputs::new(),
        outputs,
    });
    state.refresh_summary(None);
    state
}

// ── Reporters ─────────────────────────────────────────────────────────────────

pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn step(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warn(&self, _: &str) {}
}

/// Records every message with its level.
#[derive(Default)]
pub struct RecordingReporter {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("step: {message}"));
    }
    fn success(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("ok: {message}"));
    }
    fn warn(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("warn: {message}"));
    }
}

/// A spec owned by profile `default`.
pub fn spec(name: &str) -> InstanceSpec {
    InstanceSpec::new(name, "small", "default")
}
