//! JSON output helpers for `--json` code paths.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::domain::error::{BuildError, ConfigError, DeploymentError, ProbeError, StoreError};

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Stable machine-readable code for an error, from its domain type.
#[must_use]
pub fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(e) = err.downcast_ref::<DeploymentError>() {
        return match e {
            DeploymentError::NotProvisioned(_) => "NOT_PROVISIONED",
            DeploymentError::Conflict { .. } => "CONFLICT",
            DeploymentError::Misplaced { .. } => "WRONG_PLACEMENT",
            DeploymentError::ResourceFailed { .. } => "RESOURCE_FAILED",
            DeploymentError::Cancelled(_) => "CANCELLED",
            DeploymentError::DestroyIncomplete { .. } => "DESTROY_INCOMPLETE",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "BUILD_ERROR";
    }
    if let Some(StoreError::UnsupportedBackend(_)) = err.downcast_ref::<StoreError>() {
        return "UNSUPPORTED_BACKEND";
    }
    if err.downcast_ref::<StoreError>().is_some() {
        return "STORE_ERROR";
    }
    if err.downcast_ref::<ProbeError>().is_some() {
        return "NOT_FOUND";
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return "CONFIG_ERROR";
    }
    "ERROR"
}

/// Pretty-print any serializable value to stdout.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("JSON serialization failed")?
    );
    Ok(())
}
