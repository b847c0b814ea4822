//! S3 implementation of `DeploymentStateStore`, driven through `aws s3`.
//!
//! Records live at `s3://<bucket>/<prefix>/<name>/deployment.json`, so each
//! instance still owns a disjoint key. Listing is not supported.

use anyhow::{Context, Result};

use crate::application::ports::{CommandRunner, DeploymentStateStore};
use crate::domain::deployment::DeploymentState;
use crate::domain::error::StoreError;
use crate::domain::instance::validate_instance_name;
use crate::infra::aws::cli::{AwsCli, is_not_found};
use crate::infra::state::file::RECORD_FILE;

pub struct S3StateStore<R: CommandRunner> {
    backend: String,
    bucket: String,
    prefix: String,
    cli: AwsCli<R>,
}

impl<R: CommandRunner> S3StateStore<R> {
    pub fn new(backend: &str, bucket: &str, prefix: &str, cli: AwsCli<R>) -> Self {
        Self {
            backend: backend.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
            cli,
        }
    }

    fn object_url(&self, name: &str) -> Result<String> {
        validate_instance_name(name)
            .map_err(|_| StoreError::InvalidPartition(name.to_string()))?;
        Ok(if self.prefix.is_empty() {
            format!("s3://{}/{name}/{RECORD_FILE}", self.bucket)
        } else {
            format!("s3://{}/{}/{name}/{RECORD_FILE}", self.bucket, self.prefix)
        })
    }
}

impl<R: CommandRunner> DeploymentStateStore for S3StateStore<R> {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn put(&self, state: &DeploymentState) -> Result<()> {
        let url = self.object_url(&state.name)?;
        let content = serde_json::to_vec_pretty(state).context("serializing deployment record")?;
        self.cli
            .call_with_stdin(&["s3", "cp", "-", &url], &content)
            .await
            .with_context(|| format!("uploading {url}"))?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<DeploymentState>> {
        let url = self.object_url(name)?;
        match self.cli.call(&["s3", "cp", &url, "-"]).await {
            Ok(output) => {
                let state = serde_json::from_slice(&output.stdout)
                    .with_context(|| format!("parsing deployment record {url}"))?;
                Ok(Some(state))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.context(format!("downloading {url}"))),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let url = self.object_url(name)?;
        self.cli
            .call(&["s3", "rm", &url])
            .await
            .with_context(|| format!("removing {url}"))?;
        Ok(())
    }
}
