use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, error, info, warn};

use super::registry::ItemRegistry;
use crate::builder::{BuilderRegistry, CompositeItemBuilder, ItemBuilder};
use crate::item::{
    DisabledItem, Form, Item, ItemEvent, ItemId, ItemListener, ItemRecord, ItemStatus,
    ItemSummary, ItemType, Project,
};
use crate::messaging::Message;
use crate::persistence::PersistenceProvider;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("No builder registered for item type '{0}'")]
    UnknownItemType(String),

    #[error("Builder '{0}' could not build an item")]
    BuildFailed(String),

    #[error("Item {0} not found")]
    ItemNotFound(ItemId),
}

/// Owns every live item, numbers them, and keeps storage in step.
///
/// Persistence failures are logged and never fail the operation that
/// triggered them.
pub struct ItemManager {
    registry: Arc<RwLock<ItemRegistry>>,
    builders: BuilderRegistry,
    provider: Option<Arc<dyn PersistenceProvider>>,
    project: RwLock<Option<Project>>,
    events_tx: ItemListener,
    events_rx: Mutex<mpsc::UnboundedReceiver<ItemEvent>>,
}

impl ItemManager {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            registry: Arc::new(RwLock::new(ItemRegistry::new())),
            builders: BuilderRegistry::new(),
            provider: None,
            project: RwLock::new(None),
            events_tx,
            events_rx: Mutex::new(events_rx),
        }
    }

    pub fn with_persistence(mut self, provider: Arc<dyn PersistenceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn set_persistence_provider(&mut self, provider: Arc<dyn PersistenceProvider>) {
        self.provider = Some(provider);
    }

    pub fn builders(&self) -> &BuilderRegistry {
        &self.builders
    }

    /// Project used when a caller does not name one
    pub async fn project(&self) -> Option<Project> {
        self.project.read().await.clone()
    }

    /// Register a builder. Disabled items that were waiting for it are
    /// rebuilt and re-enabled.
    pub async fn register_builder(&self, builder: Arc<dyn ItemBuilder>) -> bool {
        if !self.builders.register(builder.clone()) {
            return false;
        }
        self.enable_orphans(builder.as_ref()).await;
        true
    }

    pub async fn register_composite_builder(&self, builder: Arc<dyn CompositeItemBuilder>) -> bool {
        if !self.builders.register_composite(builder.clone()) {
            return false;
        }
        self.enable_orphans(builder.as_ref()).await;
        true
    }

    pub fn unregister_builder(&self, name: &str) -> bool {
        self.builders.unregister(name)
    }

    pub fn available_builders(&self) -> Vec<String> {
        self.builders.publishable_names()
    }

    pub fn available_builders_of_type(&self, item_type: ItemType) -> Vec<String> {
        self.builders.names_of_type(item_type)
    }

    async fn enable_orphans(&self, builder: &dyn ItemBuilder) {
        let project = self.project().await;
        let mut registry = self.registry.write().await;

        let orphans: Vec<ItemRecord> = registry
            .iter()
            .filter(|item| !item.is_enabled() && item.builder_name() == builder.name())
            .map(|item| item.snapshot())
            .collect();

        for record in orphans {
            match self.rebuild(builder, &record, project.as_ref()) {
                Some(mut item) => {
                    let form = item.form();
                    let status = item.submit_form(form);
                    registry.replace(record.id, item);
                    info!(
                        "Re-enabled item {} now that '{}' is registered: {}",
                        record.id,
                        builder.name(),
                        status
                    );
                }
                None => warn!(
                    "Builder '{}' refused to rebuild item {}",
                    builder.name(),
                    record.id
                ),
            }
        }
    }

    /// Build a fresh item and give it the persisted state
    fn rebuild(
        &self,
        builder: &dyn ItemBuilder,
        record: &ItemRecord,
        project: Option<&Project>,
    ) -> Option<Box<dyn Item>> {
        let mut item = builder.build(project)?;
        item.restore(record);
        item.set_enabled(true);
        item.add_listener(self.events_tx.clone());
        Some(item)
    }

    /// Create an item with the named builder. Without an explicit project
    /// the manager's loaded project is used.
    pub async fn create_item(
        &self,
        builder_name: &str,
        project: Option<&Project>,
    ) -> Result<ItemId, ManagerError> {
        let builder = self
            .builders
            .get(builder_name)
            .ok_or_else(|| ManagerError::UnknownItemType(builder_name.to_string()))?;

        let project = match project {
            Some(project) => Some(project.clone()),
            None => self.project().await,
        };
        let mut item = builder
            .build(project.as_ref())
            .ok_or_else(|| ManagerError::BuildFailed(builder_name.to_string()))?;
        item.add_listener(self.events_tx.clone());

        let (id, record) = {
            let mut registry = self.registry.write().await;
            let id = registry.insert_new(item);
            (id, registry.get(id).map(|item| item.snapshot()))
        };

        if let (Some(provider), Some(record)) = (&self.provider, record)
            && let Err(e) = provider.persist_item(&record).await
        {
            error!("Failed to persist new item {}: {}", id, e);
        }

        info!("Created item {} with builder '{}'", id, builder_name);
        Ok(id)
    }

    /// Create an item and load its form from a `key = value` file
    pub async fn create_item_from_file(
        &self,
        path: &Path,
        builder_name: &str,
        project: Option<&Project>,
    ) -> Result<ItemId, ManagerError> {
        let id = self.create_item(builder_name, project).await?;

        let (status, record) = {
            let mut registry = self.registry.write().await;
            let item = registry.get_mut(id).ok_or(ManagerError::ItemNotFound(id))?;
            let status = item.load_input(path);
            (status, status.is_good().then(|| item.snapshot()))
        };
        debug!("Item {} loaded from {}: {}", id, path.display(), status);

        if let Some(record) = record {
            self.store(&record).await;
        }
        Ok(id)
    }

    pub async fn delete_item(&self, id: ItemId) -> bool {
        let removed = self.registry.write().await.remove(id);
        let Some(mut item) = removed else {
            debug!("No item {} to delete", id);
            return false;
        };

        item.cancel();
        if let Some(provider) = &self.provider
            && let Err(e) = provider.delete_item(&item.snapshot()).await
        {
            warn!("Failed to delete stored item {}: {}", id, e);
        }

        info!("Deleted item {}", id);
        true
    }

    pub async fn item_status(&self, id: ItemId) -> Option<ItemStatus> {
        self.registry.read().await.get(id).map(|item| item.status())
    }

    pub async fn retrieve_item(&self, id: ItemId) -> Option<Form> {
        self.registry.read().await.get(id).map(|item| item.form())
    }

    pub async fn snapshot(&self, id: ItemId) -> Option<ItemRecord> {
        self.registry.read().await.get(id).map(|item| item.snapshot())
    }

    pub async fn retrieve_item_list(&self) -> Vec<ItemSummary> {
        self.registry.read().await.summaries()
    }

    pub async fn output_file(&self, id: ItemId) -> Option<PathBuf> {
        self.registry
            .read()
            .await
            .get(id)
            .and_then(|item| item.output_file())
    }

    pub async fn item_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Submit a form to the item it names. Good results are persisted.
    pub async fn update_item(&self, form: Form) -> ItemStatus {
        let id = form.item_id;
        let (status, record) = {
            let mut registry = self.registry.write().await;
            let Some(item) = registry.get_mut(id) else {
                warn!("Form '{}' names unknown item {}", form.name, id);
                return ItemStatus::InfoError;
            };
            let status = item.submit_form(form);
            (status, status.is_good().then(|| item.snapshot()))
        };

        if let Some(record) = record {
            self.store(&record).await;
        }
        self.dispatch_events().await;
        status
    }

    pub async fn process_item(&self, id: ItemId, action: &str) -> ItemStatus {
        if id == 0 || action.trim().is_empty() {
            return ItemStatus::InfoError;
        }

        let status = {
            let mut registry = self.registry.write().await;
            let Some(item) = registry.get_mut(id) else {
                warn!("Cannot process unknown item {}", id);
                return ItemStatus::InfoError;
            };
            blocking_section(|| item.process(action))
        };

        debug!("Item {} '{}': {}", id, action, status);
        self.dispatch_events().await;
        status
    }

    pub async fn cancel_item_process(&self, id: ItemId, action: &str) -> ItemStatus {
        let mut registry = self.registry.write().await;
        let Some(item) = registry.get_mut(id) else {
            return ItemStatus::InfoError;
        };
        debug!("Cancelling '{}' on item {}", action, id);
        item.cancel()
    }

    /// Hand an update message to the item it targets
    pub async fn post_update_message(&self, message: &Message) -> bool {
        let accepted = {
            let mut registry = self.registry.write().await;
            let Some(item) = registry.get_mut(message.item_id) else {
                warn!("Update message for unknown item {}", message.item_id);
                return false;
            };
            item.update(message)
        };
        self.dispatch_events().await;
        accepted
    }

    /// Let every item rescan its project
    pub async fn reload_item_data(&self) {
        let mut registry = self.registry.write().await;
        for item in registry.iter_mut() {
            item.reload_project_data();
        }
        debug!("Reloaded project data for {} items", registry.len());
    }

    /// Load every stored item. Items whose builder is missing come back
    /// disabled. Gaps between the loaded ids become reusable.
    pub async fn load_items(&self, project: Option<Project>) -> usize {
        if let Some(project) = project {
            if let Some(provider) = &self.provider
                && let Err(e) = provider.set_default_project(&project).await
            {
                warn!("Failed to set default project {}: {}", project.name, e);
            }
            *self.project.write().await = Some(project);
        }

        let Some(provider) = &self.provider else {
            return 0;
        };
        let records = match provider.load_items().await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load items: {}", e);
                return 0;
            }
        };

        let project = self.project().await;
        let mut registry = self.registry.write().await;
        let mut loaded = 0;

        for record in records {
            let rebuilt = self
                .builders
                .get(&record.builder_name)
                .and_then(|builder| self.rebuild(builder.as_ref(), &record, project.as_ref()));

            let item: Box<dyn Item> = match rebuilt {
                Some(item) => item,
                None => {
                    warn!(
                        "Item {} needs builder '{}', which is unavailable; item disabled",
                        record.id, record.builder_name
                    );
                    let mut item = DisabledItem::new(record);
                    item.add_listener(self.events_tx.clone());
                    Box::new(item)
                }
            };

            match registry.insert_loaded(item) {
                Ok(()) => loaded += 1,
                Err(item) => warn!("Skipping stored item with duplicate id {}", item.id()),
            }
        }

        registry.defragment();
        info!(
            "Loaded {} items; next id {}",
            loaded,
            registry.allocator().next_sequential()
        );
        loaded
    }

    /// Write every live item to storage. Returns how many were written.
    pub async fn persist_items(&self) -> usize {
        let Some(provider) = &self.provider else {
            return 0;
        };
        let records: Vec<ItemRecord> = self
            .registry
            .read()
            .await
            .iter()
            .map(|item| item.snapshot())
            .collect();

        let results = join_all(records.iter().map(|record| provider.update_item(record))).await;
        let mut written = 0;
        for (record, result) in records.iter().zip(results) {
            match result {
                Ok(()) => written += 1,
                Err(e) => error!("Failed to persist item {}: {}", record.id, e),
            }
        }
        debug!("Persisted {} of {} items", written, records.len());
        written
    }

    async fn store(&self, record: &ItemRecord) {
        if let Some(provider) = &self.provider
            && let Err(e) = provider.update_item(record).await
        {
            error!("Failed to persist item {}: {}", record.id, e);
        }
    }

    /// Drain item notifications. A project change makes every item rescan.
    async fn dispatch_events(&self) {
        let mut project_changed = false;
        {
            let mut rx = self.events_rx.lock().await;
            while let Ok(event) = rx.try_recv() {
                match event {
                    ItemEvent::ProjectChanged { item_id } => {
                        debug!("Item {} changed the project", item_id);
                        project_changed = true;
                    }
                }
            }
        }

        if project_changed {
            self.reload_item_data().await;
        }
    }
}

/// Item actions run synchronously and may write files. On a multi-threaded
/// runtime the worker is handed off for the duration; a current-thread
/// runtime cannot do that, so the action runs inline there.
fn blocking_section<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl Default for ItemManager {
    fn default() -> Self {
        Self::new()
    }
}
