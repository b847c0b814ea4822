//! Infrastructure implementation of the `ConfigStore` port.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::application::ports::ConfigStore;
use crate::domain::config::{AppConfig, Profile};
use crate::infra::fs::write_atomic;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "PRIVATEBOX_CONFIG";

/// Production implementation of `ConfigStore` that uses a YAML file on disk.
///
/// When the YAML file is absent, a legacy `config.json` in the same
/// directory is read instead; the next save writes YAML.
pub struct YamlConfigStore;

impl YamlConfigStore {
    fn load_from(path: &Path) -> Result<AppConfig> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            return serde_yaml::from_str(&content)
                .with_context(|| format!("cannot parse {}", path.display()));
        }
        let legacy = path.with_file_name("config.json");
        if legacy.exists() {
            debug!(path = %legacy.display(), "reading legacy JSON config");
            let content = std::fs::read_to_string(&legacy)
                .with_context(|| format!("cannot read {}", legacy.display()))?;
            return parse_legacy(&content)
                .with_context(|| format!("cannot parse {}", legacy.display()));
        }
        Ok(AppConfig::default())
    }
}

/// Parse a legacy JSON config: either the full multi-profile shape or a
/// single bare profile, which becomes profile `default`.
fn parse_legacy(content: &str) -> Result<AppConfig> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.get("profiles").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    let profile: Profile = serde_json::from_value(value)?;
    let mut config = AppConfig::default();
    config.add_profile("default", profile)?;
    Ok(config)
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<AppConfig> {
        Self::load_from(&self.path()?)
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        let path = self.path()?;
        let content = serde_yaml::to_string(config).context("cannot serialize config")?;
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("cannot write {}", path.display()))
    }

    fn path(&self) -> Result<PathBuf> {
        if let Ok(val) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(val));
        }
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".config").join("privatebox").join("config.yaml"))
    }
}
