//! Builder table read from configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompositeItemBuilder, ItemBuilder};
use crate::item::{BasicItemBuilder, Entry, ItemType};
use crate::launcher::{JobLauncherBuilder, JobRunner, LauncherSettings, MultiLauncherBuilder};
use crate::manager::ItemManager;

fn default_true() -> bool {
    true
}

/// One registered item type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuilderConfig {
    Basic {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        item_type: ItemType,
        #[serde(default = "default_true")]
        publishable: bool,
        #[serde(default)]
        entries: Vec<Entry>,
    },
    JobLauncher {
        name: String,
        #[serde(default)]
        description: String,
        /// Command line template
        executable: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_extension: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
        #[serde(default = "default_true")]
        check_executable: bool,
        #[serde(default = "default_true")]
        publishable: bool,
    },
    MultiLauncher {
        name: String,
        #[serde(default)]
        description: String,
    },
}

impl BuilderConfig {
    pub fn name(&self) -> &str {
        match self {
            BuilderConfig::Basic { name, .. }
            | BuilderConfig::JobLauncher { name, .. }
            | BuilderConfig::MultiLauncher { name, .. } => name,
        }
    }

    /// The builders registered when no configuration names any
    pub fn defaults() -> Vec<BuilderConfig> {
        vec![
            BuilderConfig::Basic {
                name: "Basic".to_string(),
                description: "A plain list of named values".to_string(),
                item_type: ItemType::Basic,
                publishable: true,
                entries: vec![
                    Entry::new("Title", "Short title").required(),
                    Entry::new("Notes", "Free-form notes"),
                ],
            },
            BuilderConfig::JobLauncher {
                name: "Shell Job".to_string(),
                description: "Runs a shell command in the project".to_string(),
                executable: "cat ${inputFile}".to_string(),
                input_extension: None,
                timeout_secs: None,
                check_executable: true,
                publishable: true,
            },
            BuilderConfig::MultiLauncher {
                name: "Multi Launcher".to_string(),
                description: String::new(),
            },
        ]
    }
}

/// Builders instantiated from configuration, ready to register
#[derive(Default)]
pub struct BuilderCatalog {
    pub builders: Vec<Arc<dyn ItemBuilder>>,
    pub composites: Vec<Arc<dyn CompositeItemBuilder>>,
}

impl BuilderCatalog {
    pub fn from_configs(
        configs: &[BuilderConfig],
        runner: Arc<dyn JobRunner>,
        poll_interval: Duration,
    ) -> Self {
        let mut catalog = Self::default();

        for config in configs {
            match config {
                BuilderConfig::Basic {
                    name,
                    description,
                    item_type,
                    publishable,
                    entries,
                } => {
                    let builder = BasicItemBuilder::new(name.clone())
                        .with_description(description.clone())
                        .with_item_type(*item_type)
                        .with_entries(entries.clone())
                        .publishable(*publishable);
                    catalog.builders.push(Arc::new(builder));
                }
                BuilderConfig::JobLauncher {
                    name,
                    description,
                    executable,
                    input_extension,
                    timeout_secs,
                    check_executable,
                    publishable,
                } => {
                    let settings = LauncherSettings {
                        executable: executable.clone(),
                        input_extension: input_extension.clone(),
                        timeout: timeout_secs.map(Duration::from_secs),
                        check_executable: *check_executable,
                    };
                    let mut builder = JobLauncherBuilder::new(name.clone(), settings, runner.clone())
                        .publishable(*publishable);
                    if !description.is_empty() {
                        builder = builder.with_description(description.clone());
                    }
                    catalog.builders.push(Arc::new(builder));
                }
                BuilderConfig::MultiLauncher { name, description } => {
                    let mut builder =
                        MultiLauncherBuilder::new(name.clone()).with_poll_interval(poll_interval);
                    if !description.is_empty() {
                        builder = builder.with_description(description.clone());
                    }
                    catalog.composites.push(Arc::new(builder));
                }
            }
        }

        debug!(
            "Catalog holds {} builders and {} composites",
            catalog.builders.len(),
            catalog.composites.len()
        );
        catalog
    }

    /// Register everything with the manager. Returns how many were accepted.
    pub async fn register_all(self, manager: &ItemManager) -> usize {
        let mut accepted = 0;
        for builder in self.builders {
            let name = builder.name().to_string();
            if manager.register_builder(builder).await {
                accepted += 1;
            } else {
                warn!("Builder '{}' from configuration was not registered", name);
            }
        }
        for composite in self.composites {
            let name = composite.name().to_string();
            if manager.register_composite_builder(composite).await {
                accepted += 1;
            } else {
                warn!("Composite builder '{}' from configuration was not registered", name);
            }
        }
        accepted
    }
}
