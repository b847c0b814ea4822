//! Boot script resolution.

use anyhow::{Context, Result};

use crate::domain::config::AppConfig;
use crate::infra::fs::expand_home;

/// A resolved boot script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootScript {
    pub content: String,
    /// Set when the script came from the named scripts in config.
    pub name: Option<String>,
}

/// Resolve a `--user-data` argument: a named script from config wins,
/// otherwise the argument is read as a file path.
///
/// # Errors
///
/// Returns an error if the argument is neither a named script nor a
/// readable file.
pub fn resolve_boot_script(config: &AppConfig, arg: &str) -> Result<BootScript> {
    if let Some(content) = config.user_data.get(arg) {
        return Ok(BootScript {
            content: content.clone(),
            name: Some(arg.to_string()),
        });
    }
    let path = expand_home(arg)?;
    let content = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "'{arg}' is not a named boot script and cannot be read as a file ({})",
            path.display()
        )
    })?;
    Ok(BootScript {
        content,
        name: None,
    })
}
