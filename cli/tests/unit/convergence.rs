//! ConvergenceEngine behavior against the in-memory provider and store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use privatebox_cli::application::ports::CommandRunner;
use privatebox_cli::application::services::convergence::{ConvergenceEngine, NodeAction};
use privatebox_cli::domain::deployment::{DeploymentState, Placement};
use privatebox_cli::domain::error::{BuildError, DeploymentError};
use privatebox_cli::domain::graph::ResourceKind;
use privatebox_cli::infra::aws::provider::{AwsProvider, AwsSettings};
use privatebox_cli::infra::state::FileStateStore;
use tokio_util::sync::CancellationToken;

use crate::mocks::{
    MemoryStore, NullReporter, RecordingReporter, STUB_REGION, StubProvider, deployed, spec,
};

fn deployment_error(err: &anyhow::Error) -> &DeploymentError {
    err.downcast_ref::<DeploymentError>()
        .expect("error should carry a DeploymentError")
}

#[tokio::test]
async fn up_creates_every_node_in_dependency_order() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    let state = engine.up(&spec("dev1"), &CancellationToken::new()).await.unwrap();

    assert_eq!(provider.calls_of("read"), vec!["dev1-image"]);
    assert_eq!(provider.calls_of("create"), vec!["dev1-key", "dev1-sg", "dev1"]);
    assert!(state.instance_id.as_deref().is_some_and(|id| !id.is_empty()));
    assert!(state.public_ip.is_some());
    assert_eq!(state.provider, "stub");
    assert_eq!(state.resources.len(), 4);
    assert_eq!(store.snapshot("dev1").unwrap(), state);
}

#[tokio::test]
async fn up_persists_after_every_created_resource() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    engine.up(&spec("dev1"), &CancellationToken::new()).await.unwrap();

    // Three creations plus the final summary write.
    assert_eq!(store.puts(), 4);
    let history = store.history.lock().unwrap();
    assert!(history[0].resource("dev1-key").is_some());
    assert!(history[0].resource("dev1-sg").is_none());
}

#[tokio::test]
async fn up_twice_is_idempotent() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();

    let first = engine.up(&spec("dev1"), &cancel).await.unwrap();
    provider.clear_calls();
    let second = engine.up(&spec("dev1"), &cancel).await.unwrap();

    assert_eq!(first, second);
    assert!(provider.calls_of("create").is_empty());
    assert!(provider.calls_of("delete").is_empty());
}

#[tokio::test]
async fn changed_input_replaces_only_affected_nodes() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();
    provider.clear_calls();

    let mut bigger = spec("dev1");
    bigger.size = "large".into();
    let state = engine.up(&bigger, &cancel).await.unwrap();

    assert_eq!(provider.calls_of("delete"), vec!["dev1"]);
    assert_eq!(provider.calls_of("create"), vec!["dev1"]);
    assert_eq!(state.resource("dev1").unwrap().inputs["size"], "large");
}

#[tokio::test]
async fn new_image_from_lookup_replaces_the_instance() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();
    provider.clear_calls();
    provider.set_image("ami-2");

    let graph = {
        use privatebox_cli::application::ports::GraphBuilder;
        provider.build_graph(&spec("dev1")).unwrap()
    };
    let recorded = store.snapshot("dev1").unwrap();
    let plan = engine.plan(&graph, &recorded, &cancel).await.unwrap();
    assert!(plan.steps.contains(&("dev1-image".to_string(), NodeAction::Read)));
    assert!(plan.steps.contains(&("dev1".to_string(), NodeAction::Replace)));
    assert!(plan.steps.contains(&("dev1-sg".to_string(), NodeAction::Keep)));

    let state = engine.up(&spec("dev1"), &cancel).await.unwrap();
    assert_eq!(provider.calls_of("create"), vec!["dev1"]);
    assert_eq!(state.resource("dev1-image").unwrap().outputs["id"], "ami-2");
}

#[tokio::test]
async fn plan_is_noop_for_unchanged_deployment() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();

    let graph = {
        use privatebox_cli::application::ports::GraphBuilder;
        provider.build_graph(&spec("dev1")).unwrap()
    };
    let plan = engine
        .plan(&graph, &store.snapshot("dev1").unwrap(), &cancel)
        .await
        .unwrap();
    assert!(plan.is_noop());
    assert!(plan.orphans.is_empty());
}

#[tokio::test]
async fn failed_node_is_reported_and_partial_state_kept() {
    let provider = StubProvider::new();
    provider.fail_create_of("dev1-sg");
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    let err = engine.up(&spec("dev1"), &CancellationToken::new()).await.unwrap_err();

    match deployment_error(&err) {
        DeploymentError::ResourceFailed { node, kind } => {
            assert_eq!(node, "dev1-sg");
            assert_eq!(kind, ResourceKind::SecurityGroup.as_str());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(format!("{err:#}").contains("injected create failure"));
    let partial = store.snapshot("dev1").unwrap();
    assert!(partial.resource("dev1-key").is_some());
    assert!(partial.resource("dev1-sg").is_none());
    assert!(!partial.is_complete());
}

#[tokio::test]
async fn up_after_partial_failure_resumes_without_recreating() {
    let provider = StubProvider::new();
    provider.fail_create_of("dev1");
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    assert!(engine.up(&spec("dev1"), &cancel).await.is_err());

    provider.heal();
    provider.clear_calls();
    let state = engine.up(&spec("dev1"), &cancel).await.unwrap();

    assert_eq!(provider.calls_of("create"), vec!["dev1"]);
    assert!(provider.calls_of("delete").is_empty());
    assert!(state.is_complete());
}

#[tokio::test]
async fn cancellation_stops_before_next_node_and_keeps_progress() {
    let provider = StubProvider::new();
    let cancel = CancellationToken::new();
    provider.cancel_after_creating("dev1-key", cancel.clone());
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    let err = engine.up(&spec("dev1"), &cancel).await.unwrap_err();

    assert!(matches!(deployment_error(&err), DeploymentError::Cancelled(_)));
    assert_eq!(provider.calls_of("create"), vec!["dev1-key"]);
    assert!(store.snapshot("dev1").unwrap().resource("dev1-key").is_some());

    provider.clear_calls();
    engine.up(&spec("dev1"), &CancellationToken::new()).await.unwrap();
    assert_eq!(provider.calls_of("create"), vec!["dev1-sg", "dev1"]);
}

#[tokio::test]
async fn cancelled_before_start_touches_nothing() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine.up(&spec("dev1"), &cancel).await.unwrap_err();
    assert!(matches!(deployment_error(&err), DeploymentError::Cancelled(_)));
    assert!(provider.calls_of("create").is_empty());
    assert!(store.snapshot("dev1").is_none());
}

#[tokio::test]
async fn create_conflicts_with_complete_deployment() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.create(&spec("dev1"), &cancel).await.unwrap();
    provider.clear_calls();

    let err = engine.create(&spec("dev1"), &cancel).await.unwrap_err();
    assert!(matches!(deployment_error(&err), DeploymentError::Conflict { .. }));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn create_resumes_partial_deployment() {
    let provider = StubProvider::new();
    provider.fail_create_of("dev1");
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    assert!(engine.create(&spec("dev1"), &cancel).await.is_err());

    provider.heal();
    let state = engine.create(&spec("dev1"), &cancel).await.unwrap();
    assert!(state.is_complete());
}

#[tokio::test]
async fn up_conflicts_with_other_profile() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();

    let mut other = spec("dev1");
    other.profile = "work".into();
    let err = engine.up(&other, &cancel).await.unwrap_err();
    match deployment_error(&err) {
        DeploymentError::Conflict { owner, .. } => assert_eq!(owner, "default"),
        e => panic!("unexpected error: {e}"),
    }
}

#[tokio::test]
async fn invalid_name_is_a_build_error_without_side_effects() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    let err = engine.up(&spec(""), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<BuildError>(), Some(BuildError::EmptyName)));
    assert!(provider.calls().is_empty());
    assert_eq!(store.puts(), 0);
}

#[tokio::test]
async fn up_of_one_instance_never_changes_another() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("a"), &cancel).await.unwrap();
    let before = store.snapshot("a").unwrap();

    engine.up(&spec("b"), &cancel).await.unwrap();

    assert_eq!(store.snapshot("a").unwrap(), before);
    assert!(
        store
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == "a")
            .all(|s| s.resources.iter().all(|r| !r.id.starts_with('b')))
    );
}

#[tokio::test]
async fn destroy_removes_in_reverse_order_then_the_record() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();
    provider.clear_calls();

    engine.destroy("dev1", &cancel).await.unwrap();

    let deleted = provider.calls_of("delete");
    assert_eq!(deleted.first().map(String::as_str), Some("dev1"));
    assert_eq!(deleted.len(), 3, "the image lookup needs no provider call");
    assert!(store.snapshot("dev1").is_none());

    let err = engine.outputs("dev1").await.unwrap_err();
    assert!(matches!(deployment_error(&err), DeploymentError::NotProvisioned(_)));
}

#[tokio::test]
async fn failed_destroy_keeps_record_of_what_remains() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();
    provider.fail_delete_of("dev1-key");

    let err = engine.destroy("dev1", &cancel).await.unwrap_err();
    match deployment_error(&err) {
        DeploymentError::DestroyIncomplete { remaining, .. } => assert!(*remaining >= 1),
        e => panic!("unexpected error: {e}"),
    }
    let left = store.snapshot("dev1").expect("record must survive a failed destroy");
    assert!(left.resource("dev1-key").is_some());
    assert!(left.resource("dev1").is_none());

    provider.heal();
    provider.clear_calls();
    engine.destroy("dev1", &cancel).await.unwrap();
    assert_eq!(provider.calls_of("delete"), vec!["dev1-key"]);
    assert!(store.snapshot("dev1").is_none());
}

#[tokio::test]
async fn destroy_unknown_instance_is_not_provisioned() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    let err = engine
        .destroy("ghost", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(deployment_error(&err), DeploymentError::NotProvisioned(_)));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn up_records_where_the_resources_live() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    let state = engine.up(&spec("dev1"), &CancellationToken::new()).await.unwrap();
    assert_eq!(state.placement, Some(Placement::new(STUB_REGION, None)));
    assert_eq!(store.snapshot("dev1").unwrap().placement, state.placement);
}

#[tokio::test]
async fn destroy_from_another_region_touches_nothing() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();
    let before = store.snapshot("dev1").unwrap();
    provider.set_region("eu-west-1");
    provider.clear_calls();

    let err = engine.destroy("dev1", &cancel).await.unwrap_err();
    match deployment_error(&err) {
        DeploymentError::Misplaced {
            owner, recorded, current, ..
        } => {
            assert_eq!(owner, "default");
            assert_eq!(recorded, STUB_REGION);
            assert_eq!(current, "eu-west-1");
        }
        e => panic!("unexpected error: {e}"),
    }
    assert!(provider.calls().is_empty());
    assert_eq!(store.snapshot("dev1").unwrap(), before);

    provider.set_region(STUB_REGION);
    engine.destroy("dev1", &cancel).await.unwrap();
    assert!(store.snapshot("dev1").is_none());
}

#[tokio::test]
async fn up_from_another_region_is_refused() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();
    engine.up(&spec("dev1"), &cancel).await.unwrap();
    provider.set_region("eu-west-1");
    provider.clear_calls();

    let err = engine.up(&spec("dev1"), &cancel).await.unwrap_err();
    assert!(matches!(deployment_error(&err), DeploymentError::Misplaced { .. }));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn destroy_of_record_without_placement_proceeds() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    store.insert(deployed("old", "i-old"));
    provider.set_region("anywhere");
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    engine.destroy("old", &CancellationToken::new()).await.unwrap();
    assert_eq!(provider.calls_of("delete"), vec!["old"]);
    assert!(store.snapshot("old").is_none());
}

#[tokio::test]
async fn outputs_never_calls_the_provider() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    engine.up(&spec("dev1"), &CancellationToken::new()).await.unwrap();
    provider.clear_calls();

    let state: DeploymentState = engine.outputs("dev1").await.unwrap();
    assert!(state.instance_id.is_some());
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn named_boot_script_is_recorded_and_tagged() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let mut with_script = spec("dev1");
    with_script.user_data = Some("#!/bin/sh\necho hi\n".into());
    with_script.user_data_name = Some("hello".into());
    with_script.tags.insert("Name".into(), "spoofed".into());

    let state = engine.up(&with_script, &CancellationToken::new()).await.unwrap();

    assert_eq!(state.user_data_name.as_deref(), Some("hello"));
    let tags = &state.resource("dev1").unwrap().inputs["tags"];
    assert_eq!(tags["Name"], "dev1");
    assert_eq!(tags["UserDataName"], "hello");
}

#[tokio::test]
async fn reporter_hears_progress_and_completion() {
    let provider = StubProvider::new();
    let store = MemoryStore::new();
    let reporter = RecordingReporter::default();
    let engine = ConvergenceEngine::new(&provider, &store, &reporter);

    engine.up(&spec("dev1"), &CancellationToken::new()).await.unwrap();

    let messages = reporter.messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.starts_with("step: creating")));
    assert_eq!(messages.last().map(String::as_str), Some("ok: instance 'dev1' is ready"));
}

#[tokio::test]
async fn concurrent_instances_get_independent_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::with_root(dir.path().to_path_buf());
    let provider = StubProvider::new();
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);
    let cancel = CancellationToken::new();

    let dev1 = spec("dev1");
    let dev2 = spec("dev2");
    let (a, b) = tokio::join!(engine.up(&dev1, &cancel), engine.up(&dev2, &cancel));

    assert!(a.unwrap().is_complete());
    assert!(b.unwrap().is_complete());
    assert!(dir.path().join("dev1").join("deployment.json").is_file());
    assert!(dir.path().join("dev2").join("deployment.json").is_file());
}

/// `aws` stand-in for a region where nothing exists: every call fails with a
/// not-found code.
#[derive(Default)]
struct EmptyRegionRunner {
    calls: std::sync::Mutex<Vec<String>>,
}

impl EmptyRegionRunner {
    fn answer(&self, args: &[&str]) -> std::process::Output {
        use std::os::unix::process::ExitStatusExt;
        self.calls.lock().unwrap().push(args.join(" "));
        std::process::Output {
            status: std::process::ExitStatus::from_raw(254 << 8),
            stdout: Vec::new(),
            stderr: b"An error occurred (InvalidInstanceID.NotFound) when calling the operation"
                .to_vec(),
        }
    }
}

impl CommandRunner for &EmptyRegionRunner {
    async fn run(&self, _: &str, args: &[&str]) -> anyhow::Result<std::process::Output> {
        Ok(self.answer(args))
    }

    async fn run_with_timeout(
        &self,
        _: &str,
        args: &[&str],
        _: std::time::Duration,
    ) -> anyhow::Result<std::process::Output> {
        Ok(self.answer(args))
    }

    async fn run_with_stdin(
        &self,
        _: &str,
        args: &[&str],
        _: &[u8],
    ) -> anyhow::Result<std::process::Output> {
        Ok(self.answer(args))
    }

    async fn run_status(
        &self,
        _: &str,
        _: &[&str],
        _: &[(&str, &str)],
    ) -> anyhow::Result<std::process::ExitStatus> {
        anyhow::bail!("not interactive")
    }
}

#[tokio::test]
async fn aws_destroy_under_another_region_keeps_the_record() {
    let store = MemoryStore::new();
    let mut record = deployed("dev1", "i-live");
    record.profile = "us".into();
    record.placement = Some(Placement::new("us-east-1", None));
    store.insert(record.clone());

    let runner = EmptyRegionRunner::default();
    let provider = AwsProvider::new(
        &runner,
        AwsSettings {
            region: "eu-west-1".into(),
            profile: None,
            ami: None,
            ssh_public_key_path: None,
            ingress: Vec::new(),
            egress: Vec::new(),
        },
    );
    let engine = ConvergenceEngine::new(&provider, &store, &NullReporter);

    let err = engine
        .destroy("dev1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(deployment_error(&err), DeploymentError::Misplaced { .. }));
    assert!(runner.calls.lock().unwrap().is_empty(), "no aws call may be made");
    assert_eq!(store.snapshot("dev1").unwrap(), record);
}
