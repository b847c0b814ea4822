use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a compute instance as reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Unknown,
}

impl LifecycleState {
    /// Canonical lowercase name, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Unknown => "unknown",
        }
    }

    /// Map a provider state string to a lifecycle state.
    ///
    /// Unrecognized values map to `Unknown` rather than failing: providers
    /// add states over time and a status listing must not break on them.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        raw.parse().unwrap_or(LifecycleState::Unknown)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLifecycleState(pub String);

impl fmt::Display for UnknownLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown state '{}' (expected pending, running, stopping, stopped, shutting-down, terminated or unknown)",
            self.0
        )
    }
}

impl std::error::Error for UnknownLifecycleState {}

impl FromStr for LifecycleState {
    type Err = UnknownLifecycleState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(LifecycleState::Pending),
            "running" => Ok(LifecycleState::Running),
            "stopping" => Ok(LifecycleState::Stopping),
            "stopped" => Ok(LifecycleState::Stopped),
            "shutting-down" | "shutting_down" | "shuttingdown" => Ok(LifecycleState::ShuttingDown),
            "terminated" => Ok(LifecycleState::Terminated),
            "unknown" => Ok(LifecycleState::Unknown),
            other => Err(UnknownLifecycleState(other.to_string())),
        }
    }
}

/// Live runtime condition of a compute resource. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeStatus {
    /// Provider resource identifier (e.g. `i-0abc...`).
    pub resource_id: String,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    /// CPU utilization sample in percent, when the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    /// When this status was fetched.
    pub observed_at: DateTime<Utc>,
}

impl RuntimeStatus {
    /// Status for a resource the provider no longer knows about.
    #[must_use]
    pub fn unknown(resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            state: LifecycleState::Unknown,
            public_ip: None,
            private_ip: None,
            cpu_percent: None,
            observed_at: Utc::now(),
        }
    }
}

/// One row of an instance listing: the instance name and its live status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceStatus {
    pub name: String,
    pub status: RuntimeStatus,
}
