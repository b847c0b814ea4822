//! Deployment state backends.

pub mod file;
pub mod s3;

use anyhow::Result;

use crate::application::ports::{CommandRunner, DeploymentStateStore};
use crate::domain::deployment::{DeploymentState, StateBackend};
use crate::domain::error::StoreError;
use crate::infra::aws::cli::AwsCli;

pub use file::FileStateStore;
pub use s3::S3StateStore;

/// The store selected by a profile's `state_backend` URL.
pub enum StateStore<R: CommandRunner> {
    File(FileStateStore),
    S3(S3StateStore<R>),
}

impl<R: CommandRunner> StateStore<R> {
    /// Open the backend named by `url`. `cli` is used by remote backends.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnsupportedBackend` for schemes without a store.
    pub fn open(url: &str, cli: AwsCli<R>) -> Result<Self> {
        match StateBackend::parse(url) {
            StateBackend::File(_) => Ok(StateStore::File(FileStateStore::open(url)?)),
            StateBackend::S3 { bucket, prefix } => {
                Ok(StateStore::S3(S3StateStore::new(url, &bucket, &prefix, cli)))
            }
            StateBackend::Other(other) => Err(StoreError::UnsupportedBackend(other).into()),
        }
    }
}

impl<R: CommandRunner> DeploymentStateStore for StateStore<R> {
    fn backend(&self) -> &str {
        match self {
            StateStore::File(s) => s.backend(),
            StateStore::S3(s) => s.backend(),
        }
    }

    async fn put(&self, state: &DeploymentState) -> Result<()> {
        match self {
            StateStore::File(s) => s.put(state).await,
            StateStore::S3(s) => s.put(state).await,
        }
    }

    async fn get(&self, name: &str) -> Result<Option<DeploymentState>> {
        match self {
            StateStore::File(s) => s.get(name).await,
            StateStore::S3(s) => s.get(name).await,
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self {
            StateStore::File(s) => s.delete(name).await,
            StateStore::S3(s) => s.delete(name).await,
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        match self {
            StateStore::File(s) => s.list().await,
            StateStore::S3(s) => s.list().await,
        }
    }
}
