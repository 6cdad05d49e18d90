//! CLI configuration.

use anyhow::Context;
use flare_db::DatabaseConfig;
use flare_notify::NotifyConfig;
use flare_triggers::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl CliConfig {
    /// Load from `path` if it exists, then apply `DATABASE_URL`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_yaml(&content)?
        } else {
            Self::default()
        };
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database = Some(match config.database.take() {
                Some(existing) => DatabaseConfig { url, ..existing },
                None => DatabaseConfig::new(url),
            });
        }
        Ok(config)
    }

    /// `config.yaml` in the platform configuration directory.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "flare", "flare")
            .context("could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("parsing configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_default_independently() {
        let config = CliConfig::from_yaml(
            "engine:\n  dispatch_timeout_ms: 1500\ndatabase:\n  url: postgres://localhost/flare\n",
        )
        .unwrap();
        assert_eq!(config.engine.dispatch_timeout_ms, 1500);
        assert_eq!(config.engine.portal_url, EngineConfig::default().portal_url);
        assert_eq!(config.database.unwrap().max_connections, 20);
        assert!(config.notify.channels.is_empty());
    }
}
