//! Application service: live status and power control for one instance.

use anyhow::Result;
use privatebox_common::RuntimeStatus;
use tracing::info;

use crate::application::ports::{
    DeploymentStateStore, PowerAction, PowerControl, ProviderInfo, StatusProbe,
};
use crate::domain::deployment::DeploymentState;
use crate::domain::error::{DeploymentError, ProbeError};

/// A deployment record paired with a fresh probe of its compute instance.
#[derive(Debug, Clone)]
pub struct InstanceDetail {
    pub deployment: DeploymentState,
    pub status: RuntimeStatus,
}

/// Load `name`'s record and probe its compute instance.
///
/// A probe reporting `NotFound` yields state `unknown`.
///
/// # Errors
///
/// Returns `DeploymentError::NotProvisioned` if there is no complete record,
/// `DeploymentError::Misplaced` if `prober` targets another region or
/// account, or the probe error for anything but `NotFound`.
pub async fn describe(
    store: &impl DeploymentStateStore,
    prober: &(impl StatusProbe + ProviderInfo),
    name: &str,
) -> Result<InstanceDetail> {
    let (deployment, id) = compute_id(store, prober, name).await?;
    let status = match prober.probe(&id).await {
        Ok(status) => status,
        Err(e) if matches!(e.downcast_ref::<ProbeError>(), Some(ProbeError::NotFound(_))) => {
            RuntimeStatus::unknown(&id)
        }
        Err(e) => return Err(e),
    };
    Ok(InstanceDetail { deployment, status })
}

/// Start or stop `name`'s compute instance.
///
/// # Errors
///
/// Returns `DeploymentError::NotProvisioned` if there is no complete record,
/// `DeploymentError::Misplaced` for a record in another region or account,
/// or the provider error.
pub async fn set_power(
    store: &impl DeploymentStateStore,
    provider: &(impl PowerControl + ProviderInfo),
    name: &str,
    action: PowerAction,
) -> Result<()> {
    let (_, id) = compute_id(store, provider, name).await?;
    info!(instance = %name, resource_id = %id, ?action, "changing power state");
    provider.set_power(&id, action).await
}

async fn compute_id(
    store: &impl DeploymentStateStore,
    provider: &impl ProviderInfo,
    name: &str,
) -> Result<(DeploymentState, String)> {
    let deployment = store
        .get(name)
        .await?
        .ok_or_else(|| DeploymentError::NotProvisioned(name.to_string()))?;
    deployment.ensure_placement(&provider.placement())?;
    let id = deployment
        .instance_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DeploymentError::NotProvisioned(name.to_string()))?;
    Ok((deployment, id))
}
