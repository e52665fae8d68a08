//! Outward API used by front ends.
//!
//! Every call routes to the [`ItemManager`]. Lookup misses come back as
//! `None`/`false`/[`ItemStatus::InfoError`], never as errors.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::builder::BuilderCatalog;
use crate::config::EngineConfig;
use crate::item::{Form, ItemId, ItemStatus, ItemSummary, Project};
use crate::launcher::{JobRunner, ShellRunner};
use crate::manager::ItemManager;
use crate::messaging::parse_update_message;
use crate::persistence::{JsonFileProvider, JsonProviderConfig};

pub struct Facade {
    manager: Arc<ItemManager>,
    project: Option<Project>,
    poll_interval: Duration,
    next_client: AtomicU32,
}

impl Facade {
    pub fn new(manager: Arc<ItemManager>, project: Option<Project>) -> Self {
        Self {
            manager,
            project,
            poll_interval: crate::launcher::multi::DEFAULT_POLL_INTERVAL,
            next_client: AtomicU32::new(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build a manager from configuration, register the configured builders
    /// and load the stored items of the workspace project.
    pub async fn from_config(config: &EngineConfig, workspace: Option<PathBuf>) -> Result<Self> {
        Self::from_config_with_runner(config, workspace, Arc::new(ShellRunner::new())).await
    }

    pub async fn from_config_with_runner(
        config: &EngineConfig,
        workspace: Option<PathBuf>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self> {
        let workspace = config.workspace_path(workspace);
        std::fs::create_dir_all(&workspace).with_context(|| {
            format!("Failed to create workspace directory {}", workspace.display())
        })?;
        let project = config.project(&workspace);

        let mut manager = ItemManager::new();
        if config.persistence.enabled {
            let directory = config.items_directory(&workspace);
            let provider = JsonFileProvider::new(
                directory,
                JsonProviderConfig {
                    atomic_writes: config.persistence.atomic_writes,
                    ..Default::default()
                },
            );
            manager.set_persistence_provider(Arc::new(provider));
        }

        let catalog =
            BuilderCatalog::from_configs(&config.builders, runner, config.poll_interval());
        let registered = catalog.register_all(&manager).await;
        let loaded = manager.load_items(Some(project.clone())).await;
        info!(
            "Engine ready for project '{}': {} builders, {} stored items",
            project.name, registered, loaded
        );

        Ok(Self::new(Arc::new(manager), Some(project)).with_poll_interval(config.poll_interval()))
    }

    pub fn manager(&self) -> &Arc<ItemManager> {
        &self.manager
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    /// Hand out a client id for later update/process calls
    pub fn connect(&self) -> u32 {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        debug!("Client {} connected", id);
        id
    }

    pub async fn create_item(&self, item_type: &str) -> Option<ItemId> {
        self.create_item_in(item_type, None).await
    }

    /// Create an item in another project than the facade's own
    pub async fn create_item_in(
        &self,
        item_type: &str,
        project: Option<&Project>,
    ) -> Option<ItemId> {
        let project = project.or(self.project.as_ref());
        match self.manager.create_item(item_type, project).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Unable to create item of type '{}': {}", item_type, e);
                None
            }
        }
    }

    /// Create an item whose form is filled from a `key = value` file
    pub async fn import_file_as_item(&self, file: &Path, item_type: &str) -> Option<ItemId> {
        match self
            .manager
            .create_item_from_file(file, item_type, self.project.as_ref())
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Unable to import {} as '{}': {}", file.display(), item_type, e);
                None
            }
        }
    }

    pub async fn delete_item(&self, id: ItemId) -> bool {
        self.manager.delete_item(id).await
    }

    pub async fn get_item_status(&self, id: ItemId) -> Option<ItemStatus> {
        self.manager.item_status(id).await
    }

    pub async fn get_item(&self, id: ItemId) -> Option<Form> {
        self.manager.retrieve_item(id).await
    }

    pub async fn update_item(&self, form: Form, caller_id: u32) -> ItemStatus {
        debug!("Client {} updates item {}", caller_id, form.item_id);
        self.manager.update_item(form).await
    }

    pub async fn process_item(&self, id: ItemId, action: &str, caller_id: u32) -> ItemStatus {
        debug!("Client {} processes '{}' on item {}", caller_id, action, id);
        self.manager.process_item(id, action).await
    }

    pub async fn cancel_item_process(&self, id: ItemId, action: &str) -> ItemStatus {
        self.manager.cancel_item_process(id, action).await
    }

    pub fn get_available_item_types(&self) -> Vec<String> {
        let mut types = self.manager.available_builders();
        types.sort();
        types
    }

    pub async fn get_item_list(&self) -> Vec<ItemSummary> {
        self.manager.retrieve_item_list().await
    }

    pub async fn get_item_output_file(&self, id: ItemId) -> Option<PathBuf> {
        self.manager.output_file(id).await
    }

    /// Accept a `key=<json>` update. Every post goes to the addressed item;
    /// a malformed message is logged and nothing is applied.
    pub async fn post_update_message(&self, raw: &str) -> bool {
        let messages = match parse_update_message(raw) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Discarding update message: {}", e);
                return false;
            }
        };

        debug!("Posting {} update messages", messages.len());
        for message in &messages {
            self.manager.post_update_message(message).await;
        }
        true
    }

    /// Poll until the item leaves `Processing`. Returns the last status seen,
    /// or `None` when the item does not exist.
    pub async fn wait_for_item(&self, id: ItemId, timeout: Duration) -> Option<ItemStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.manager.item_status(id).await?;
            if status != ItemStatus::Processing || Instant::now() >= deadline {
                return Some(status);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Write every item to storage
    pub async fn shutdown(&self) -> usize {
        let written = self.manager.persist_items().await;
        info!("Persisted {} items on shutdown", written);
        written
    }
}
