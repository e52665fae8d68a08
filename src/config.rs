//! Engine configuration, stored as TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::builder::BuilderConfig;
use crate::env;
use crate::item::Project;
use crate::launcher::multi::DEFAULT_POLL_INTERVAL;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceSettings {
    pub enabled: bool,
    /// Defaults to `<workspace>/.itemflow/items`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub atomic_writes: bool,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            atomic_writes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Project root; defaults to the current directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// Multi-launcher polling period
    pub poll_interval_ms: u64,
    pub persistence: PersistenceSettings,
    pub builders: Vec<BuilderConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            project_name: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            persistence: PersistenceSettings::default(),
            builders: BuilderConfig::defaults(),
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file {}", path.as_ref().display()))
    }

    pub fn workspace_path(&self, workspace_override: Option<PathBuf>) -> PathBuf {
        workspace_override
            .or_else(|| self.workspace.clone())
            .unwrap_or_else(|| std_env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Project rooted at the workspace, named after it unless configured
    pub fn project(&self, workspace: &Path) -> Project {
        let name = self.project_name.clone().unwrap_or_else(|| {
            workspace
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "workspace".to_string())
        });
        Project::new(name, workspace)
    }

    pub fn items_directory(&self, workspace: &Path) -> PathBuf {
        self.persistence
            .directory
            .clone()
            .unwrap_or_else(|| env::items_dir_path(workspace))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(config.persistence.enabled);
        assert!(config.builders.iter().any(|b| b.name() == "Basic"));
        assert!(config.builders.iter().any(|b| b.name() == "Multi Launcher"));
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("itemflow.toml");

        let mut original = EngineConfig::default();
        original.project_name = Some("demo".to_string());
        original.poll_interval_ms = 25;

        original.to_toml_file(&config_path).unwrap();
        let loaded = EngineConfig::from_toml_file(&config_path).unwrap();

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            poll_interval_ms = 10

            [[builders]]
            kind = "job_launcher"
            name = "Solver"
            executable = "solver ${inputFile}"
            input_extension = "in"
            check_executable = false
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert!(config.persistence.atomic_writes);
        assert_eq!(config.builders.len(), 1);
        assert!(matches!(
            &config.builders[0],
            BuilderConfig::JobLauncher { input_extension: Some(ext), check_executable: false, .. }
                if ext == "in"
        ));
    }

    #[test]
    fn test_project_naming() {
        let config = EngineConfig::default();
        let project = config.project(Path::new("/work/alpha"));
        assert_eq!(project.name, "alpha");
        assert_eq!(
            config.items_directory(Path::new("/work/alpha")),
            Path::new("/work/alpha/.itemflow/items")
        );
    }
}
