//! Thin wrapper over the `aws` CLI v2.
//!
//! Every call carries `--region`, the optional named `--profile` and
//! `--output json`, so the adapter never depends on ambient environment.

use std::process::Output;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use thiserror::Error;

use crate::application::ports::CommandRunner;

/// Matches the service error code in `aws` CLI stderr, e.g.
/// `An error occurred (InvalidInstanceID.NotFound) when calling ...`.
static ERROR_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"An error occurred \(([A-Za-z0-9.]+)\)").expect("valid regex")
});

/// Error codes meaning the target no longer exists.
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidKeyPair.NotFound",
    "InvalidAMIID.NotFound",
    "NoSuchEntity",
    "NotFoundException",
    "NoSuchKey",
    "404",
];

/// A failed `aws` invocation.
#[derive(Debug, Error)]
#[error("aws {command} failed{}: {message}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct AwsCliError {
    pub command: String,
    /// Service error code parsed from stderr, when present.
    pub code: Option<String>,
    pub message: String,
}

impl AwsCliError {
    fn from_output(args: &[&str], output: &Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = ERROR_CODE_RE
            .captures(&stderr)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .or_else(|| stderr.contains("(404)").then(|| "404".to_string()));
        Self {
            command: args.iter().take(2).copied().collect::<Vec<_>>().join(" "),
            code,
            message: stderr,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|c| NOT_FOUND_CODES.contains(&c))
    }
}

/// Whether `err` is an `aws` failure saying the target does not exist.
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AwsCliError>()
        .is_some_and(AwsCliError::is_not_found)
}

/// Region- and profile-scoped `aws` invoker.
pub struct AwsCli<R: CommandRunner> {
    runner: R,
    region: String,
    profile: Option<String>,
}

impl<R: CommandRunner> AwsCli<R> {
    pub fn new(runner: R, region: &str, profile: Option<&str>) -> Self {
        Self {
            runner,
            region: region.to_string(),
            profile: profile.map(str::to_string),
        }
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    fn full_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = args.to_vec();
        full.extend(["--region", self.region.as_str()]);
        if let Some(profile) = &self.profile {
            full.extend(["--profile", profile.as_str()]);
        }
        full.extend(["--output", "json"]);
        full
    }

    fn check(args: &[&str], output: Output) -> Result<Output> {
        if output.status.success() {
            Ok(output)
        } else {
            Err(AwsCliError::from_output(args, &output).into())
        }
    }

    /// Run `aws <args>`, failing with [`AwsCliError`] on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the CLI cannot be run or exits non-zero.
    pub async fn call(&self, args: &[&str]) -> Result<Output> {
        let output = self.runner.run("aws", &self.full_args(args)).await?;
        Self::check(args, output)
    }

    /// Like [`call`](Self::call) with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the CLI cannot be run, times out or exits non-zero.
    pub async fn call_with_timeout(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        let output = self
            .runner
            .run_with_timeout("aws", &self.full_args(args), timeout)
            .await?;
        Self::check(args, output)
    }

    /// Like [`call`](Self::call) with `input` piped to stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if the CLI cannot be run or exits non-zero.
    pub async fn call_with_stdin(&self, args: &[&str], input: &[u8]) -> Result<Output> {
        let output = self
            .runner
            .run_with_stdin("aws", &self.full_args(args), input)
            .await?;
        Self::check(args, output)
    }

    /// Run `aws <args>` and parse stdout as JSON. Empty output is `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or stdout is not valid JSON.
    pub async fn json(&self, args: &[&str]) -> Result<serde_json::Value> {
        let output = self.call(args).await?;
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing output of aws {}", args.join(" ")))
    }
}
