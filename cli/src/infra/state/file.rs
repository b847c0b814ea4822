//! Local directory tree implementation of `DeploymentStateStore`.
//!
//! Each instance owns one directory, `<root>/<name>/`, holding
//! `deployment.json`. Writes are atomic (temp file + rename) and blocking
//! I/O runs inside `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::application::ports::DeploymentStateStore;
use crate::domain::deployment::{DeploymentState, partition_location};
use crate::domain::error::StoreError;
use crate::domain::instance::validate_instance_name;
use crate::infra::fs::{expand_home, write_atomic};

/// File name of the record inside a partition directory.
pub const RECORD_FILE: &str = "deployment.json";

/// Deployment records in a local directory tree, one partition per instance.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    backend: String,
    root: PathBuf,
}

impl FileStateStore {
    /// Open the store for a `file://` backend URL. `~/` is expanded.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnsupportedBackend` for non-`file://` URLs, or an
    /// error if the home directory is needed and unknown.
    pub fn open(backend: &str) -> Result<Self> {
        let path = backend
            .strip_prefix("file://")
            .ok_or_else(|| StoreError::UnsupportedBackend(backend.to_string()))?;
        Ok(Self {
            backend: backend.to_string(),
            root: expand_home(path)?,
        })
    }

    /// Store rooted at an explicit directory (used in tests).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            backend: format!("file://{}", root.display()),
            root,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `name`'s partition.
    fn partition(&self, name: &str) -> Result<PathBuf> {
        validate_instance_name(name)
            .map_err(|_| StoreError::InvalidPartition(name.to_string()))?;
        let location = partition_location(&self.backend, name);
        let path = location.strip_prefix("file://").unwrap_or(&location);
        expand_home(path)
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.partition(name)?.join(RECORD_FILE))
    }
}

fn load_sync(path: &Path) -> Result<Option<DeploymentState>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading deployment record {}", path.display()))?;
    let state = serde_json::from_str(&content)
        .with_context(|| format!("parsing deployment record {}", path.display()))?;
    Ok(Some(state))
}

fn remove_sync(partition: &Path) -> Result<()> {
    let record = partition.join(RECORD_FILE);
    if record.exists() {
        std::fs::remove_file(&record)
            .with_context(|| format!("removing deployment record {}", record.display()))?;
    }
    // Only an empty partition is removed; anything else left behind is not ours.
    if let Err(e) = std::fs::remove_dir(partition) {
        debug!(partition = %partition.display(), error = %e, "partition kept");
    }
    Ok(())
}

fn list_sync(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("listing state directory {}", root.display()))?
    {
        let entry = entry.with_context(|| format!("listing {}", root.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if path.join(RECORD_FILE).is_file() {
            names.push(name);
        } else if std::fs::read_dir(&path).is_ok_and(|mut d| d.next().is_none()) {
            warn!(partition = %name, "removing empty partition");
            if let Err(e) = std::fs::remove_dir(&path) {
                debug!(partition = %name, error = %e, "cannot remove empty partition");
            }
        }
    }
    names.sort();
    Ok(names)
}

impl DeploymentStateStore for FileStateStore {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn put(&self, state: &DeploymentState) -> Result<()> {
        let path = self.record_path(&state.name)?;
        let content = serde_json::to_vec_pretty(state).context("serializing deployment record")?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .context("state save task panicked")?
    }

    async fn get(&self, name: &str) -> Result<Option<DeploymentState>> {
        let path = self.record_path(name)?;
        tokio::task::spawn_blocking(move || load_sync(&path))
            .await
            .context("state load task panicked")?
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let partition = self.partition(name)?;
        tokio::task::spawn_blocking(move || remove_sync(&partition))
            .await
            .context("state delete task panicked")?
    }

    async fn list(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_sync(&root))
            .await
            .context("state list task panicked")?
    }
}
