//! Filesystem helpers shared by the file-backed adapters.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Expand a leading `~/` (or a bare `~`) to the home directory.
///
/// # Errors
///
/// Returns an error if the path needs expansion and the home directory
/// cannot be determined.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return home();
    }
    match path.strip_prefix("~/") {
        Some(rest) => Ok(home()?.join(rest)),
        None => Ok(PathBuf::from(path)),
    }
}

fn home() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))
}

/// Write `content` to `path` via a sibling temp file and rename, so readers
/// never observe a partial file. The file is created with mode 0600.
///
/// # Errors
///
/// Returns an error if the parent cannot be created or any write fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating directory {}", parent.display()))?;

    // NamedTempFile is created with mode 0600 on unix.
    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temp file in {}", parent.display()))?;
    temp.write_all(content)
        .with_context(|| format!("writing temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temp file for {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}
