//! Application service: enumerate instances and probe their live status.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use privatebox_common::{InstanceStatus, LifecycleState, RuntimeStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::ports::{DeploymentStateStore, ProviderInfo, StatusProbe};
use crate::domain::error::{DeploymentError, ProbeError};

/// Default number of probes in flight at once.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 16;

/// Tuning for [`list_with_status`].
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOptions {
    /// Maximum concurrent probes. Zero is treated as one.
    pub concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }
}

/// List every instance in `store` with its live status.
///
/// Probes run concurrently, at most `options.concurrency` at a time. An
/// instance whose record is missing, has no compute id, lives in another
/// region or account than `prober`, or whose probe fails is left out; a probe reporting `NotFound` keeps the instance with state
/// `unknown`. With `filter`, only instances in that state are returned.
/// Results are sorted by name.
///
/// # Errors
///
/// Fails only when the store cannot enumerate instances (for example
/// `StoreError::UnsupportedBackend`) or `cancel` fires.
pub async fn list_with_status(
    store: &impl DeploymentStateStore,
    prober: &(impl StatusProbe + ProviderInfo),
    filter: Option<LifecycleState>,
    options: DiscoveryOptions,
    cancel: &CancellationToken,
) -> Result<Vec<InstanceStatus>> {
    let names = store.list().await?;
    debug!(count = names.len(), "probing instances");

    let probes = stream::iter(names)
        .map(|name| async move {
            let status = probe_instance(store, prober, &name).await?;
            Some(InstanceStatus { name, status })
        })
        .buffer_unordered(options.concurrency.max(1))
        .filter_map(|found| async move { found })
        .filter(|found| {
            let keep = filter.is_none_or(|state| found.status.state == state);
            async move { keep }
        })
        .collect::<Vec<_>>();

    let mut found = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(DeploymentError::Cancelled("list".to_string()).into());
        }
        found = probes => found,
    };
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

/// Probe one instance; `None` excludes it from the listing.
async fn probe_instance(
    store: &impl DeploymentStateStore,
    prober: &(impl StatusProbe + ProviderInfo),
    name: &str,
) -> Option<RuntimeStatus> {
    let record = match store.get(name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(instance = %name, "no deployment record; skipping");
            return None;
        }
        Err(e) => {
            warn!(instance = %name, error = %e, "cannot read deployment record; skipping");
            return None;
        }
    };
    if let Err(e) = record.ensure_placement(&prober.placement()) {
        warn!(instance = %name, error = %e, "deployment is out of reach; skipping");
        return None;
    }
    let Some(id) = record.instance_id.filter(|id| !id.is_empty()) else {
        warn!(instance = %name, "deployment has no instance id; skipping");
        return None;
    };
    match prober.probe(&id).await {
        Ok(status) => Some(status),
        Err(e) if matches!(e.downcast_ref::<ProbeError>(), Some(ProbeError::NotFound(_))) => {
            debug!(instance = %name, resource_id = %id, "resource not found; state unknown");
            Some(RuntimeStatus::unknown(&id))
        }
        Err(e) => {
            warn!(instance = %name, resource_id = %id, error = %e, "status probe failed; skipping");
            None
        }
    }
}

/// Names of deployments created with the named boot script `script`.
///
/// # Errors
///
/// Fails when the store cannot enumerate instances.
pub async fn instances_using_boot_script(
    store: &impl DeploymentStateStore,
    script: &str,
) -> Result<Vec<String>> {
    let mut users = Vec::new();
    for name in store.list().await? {
        match store.get(&name).await {
            Ok(Some(record)) if record.user_data_name.as_deref() == Some(script) => {
                users.push(name);
            }
            Ok(_) => {}
            Err(e) => warn!(instance = %name, error = %e, "cannot read deployment record"),
        }
    }
    Ok(users)
}
