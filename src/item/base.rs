use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::form::{Component, Form, Resource};
use super::status::ItemStatus;
use super::types::{FormCell, ItemId, ItemRecord, ItemType, Project, StatusCell};
use crate::messaging::{Message, MessageType};

/// Notifications an item sends to whoever manages it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemEvent {
    /// The item wrote into its project; other items may want to rescan it
    ProjectChanged { item_id: ItemId },
}

pub type ItemListener = mpsc::UnboundedSender<ItemEvent>;

/// State shared by every item kind.
///
/// The status and form live in shared cells so background runs can publish
/// progress while callers read snapshots.
#[derive(Debug)]
pub struct ItemCore {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub builder_name: String,
    pub item_type: ItemType,
    pub enabled: bool,
    pub status: StatusCell,
    pub form: FormCell,
    pub project: Option<Project>,
    pub output_file: Option<PathBuf>,
    pub messages: Vec<Message>,
    listeners: Vec<ItemListener>,
}

impl ItemCore {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        builder_name: impl Into<String>,
        item_type: ItemType,
        form: Form,
        project: Option<Project>,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        let mut form = form;
        if form.name.is_empty() {
            form.name = name.clone();
        }
        if form.description.is_empty() {
            form.description = description.clone();
        }

        Self {
            id: 0,
            name,
            description,
            builder_name: builder_name.into(),
            item_type,
            enabled: true,
            status: StatusCell::default(),
            form: FormCell::new(form),
            project,
            output_file: None,
            messages: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn set_id(&mut self, id: ItemId) {
        self.id = id;
        self.form.update(|form| {
            form.id = id;
            form.item_id = id;
        });
    }

    /// Whether a submitted form targets this item's form
    pub fn matches(&self, form: &Form) -> bool {
        let current = self.form.get();
        form.id == current.id && form.item_id == current.item_id && form.name == current.name
    }

    /// Review and, if acceptable, store a submitted form.
    ///
    /// An `InfoError` review leaves the stored form unchanged.
    pub fn submit_with<F>(&mut self, mut form: Form, review: F) -> ItemStatus
    where
        F: FnOnce(&Form) -> ItemStatus,
    {
        if !self.enabled {
            return ItemStatus::InfoError;
        }
        if !self.matches(&form) {
            warn!(
                "Rejected form '{}' (item {}) submitted to item {}",
                form.name, form.item_id, self.id
            );
            self.status.set(ItemStatus::InfoError);
            return ItemStatus::InfoError;
        }

        let status = review(&form);
        if status != ItemStatus::InfoError {
            form.ready = status == ItemStatus::ReadyToProcess;
            self.form.replace(form);
        }
        self.status.set(status);
        debug!("Item {} reviewed form: {}", self.id, status);
        status
    }

    pub fn add_listener(&mut self, listener: ItemListener) {
        self.listeners.push(listener);
    }

    pub fn notify_project_changed(&mut self) {
        let event = ItemEvent::ProjectChanged { item_id: self.id };
        self.listeners.retain(|l| l.send(event.clone()).is_ok());
    }

    pub fn listeners(&self) -> &[ItemListener] {
        &self.listeners
    }

    /// Copy with fresh status/form cells so the copy evolves independently
    pub fn deep_copy(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            builder_name: self.builder_name.clone(),
            item_type: self.item_type,
            enabled: self.enabled,
            status: self.status.detached(),
            form: self.form.detached(),
            project: self.project.clone(),
            output_file: self.output_file.clone(),
            messages: self.messages.clone(),
            listeners: Vec::new(),
        }
    }

    pub fn record(&self) -> ItemRecord {
        ItemRecord {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            builder_name: self.builder_name.clone(),
            item_type: self.item_type,
            status: self.status.get(),
            enabled: self.enabled,
            form: self.form.get(),
            output_file: self.output_file.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Adopt persisted state. The builder name and item type stay as built.
    pub fn restore(&mut self, record: &ItemRecord) {
        self.id = record.id;
        self.name = record.name.clone();
        self.description = record.description.clone();
        self.output_file = record.output_file.clone();
        let mut form = record.form.clone();
        form.id = record.id;
        form.item_id = record.id;
        self.form.replace(form);
        // An interrupted run does not survive a restart
        let status = match record.status {
            ItemStatus::Processing | ItemStatus::NeedsInfo => ItemStatus::ReadyToProcess,
            other => other,
        };
        self.status.set(status);
    }
}

/// A long-lived, configurable unit of work.
///
/// Items are driven through their form: `submit_form` reviews a
/// configuration, `process` starts a run, `status` reports progress.
pub trait Item: Send + Sync {
    fn core(&self) -> &ItemCore;
    fn core_mut(&mut self) -> &mut ItemCore;

    /// Review and store a new configuration.
    fn submit_form(&mut self, form: Form) -> ItemStatus;

    /// Start the named action.
    fn process(&mut self, action: &str) -> ItemStatus;

    /// Independent copy with its own status and form.
    fn duplicate(&self) -> Box<dyn Item>;

    fn id(&self) -> ItemId {
        self.core().id
    }

    fn set_id(&mut self, id: ItemId) {
        self.core_mut().set_id(id);
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    /// Rename the item. The form keeps its own name.
    fn set_name(&mut self, name: &str) {
        self.core_mut().name = name.to_string();
    }

    fn description(&self) -> &str {
        &self.core().description
    }

    fn builder_name(&self) -> &str {
        &self.core().builder_name
    }

    fn item_type(&self) -> ItemType {
        self.core().item_type
    }

    fn is_enabled(&self) -> bool {
        self.core().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.core_mut().enabled = enabled;
    }

    fn status(&self) -> ItemStatus {
        if !self.is_enabled() {
            return ItemStatus::InfoError;
        }
        self.core().status.get()
    }

    fn form(&self) -> Form {
        self.core().form.get()
    }

    fn available_actions(&self) -> Vec<String> {
        self.core().form.get().actions
    }

    fn output_file(&self) -> Option<PathBuf> {
        self.core().output_file.clone()
    }

    /// Stop a run. Items without a cancellable run just report their status.
    fn cancel(&mut self) -> ItemStatus {
        self.status()
    }

    /// Absorb an update message. File events are mirrored into the first
    /// resource component of the form.
    fn update(&mut self, message: &Message) -> bool {
        let core = self.core_mut();
        if message.message_type.is_file_event() {
            let path = PathBuf::from(&message.content);
            core.form.update(|form| {
                let Some(resources) = form.components.iter_mut().find_map(|c| match c {
                    Component::Resources(r) => Some(r),
                    _ => None,
                }) else {
                    return;
                };
                match message.message_type {
                    MessageType::FileDeleted => {
                        resources.remove_path(&path);
                    }
                    _ => {
                        resources.add(Resource::from_path(&path));
                    }
                }
            });
        }
        debug!(
            "Item {} received {:?}: {}",
            core.id, message.message_type, message.content
        );
        core.messages.push(message.clone());
        true
    }

    /// Re-read project files that feed the form.
    fn reload_project_data(&mut self) {}

    fn add_listener(&mut self, listener: ItemListener) {
        self.core_mut().add_listener(listener);
    }

    /// Load `key = value` lines from a file into the form and submit it.
    fn load_input(&mut self, path: &Path) -> ItemStatus {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read input file {}: {}", path.display(), e);
                return ItemStatus::InfoError;
            }
        };
        let mut form = self.form();
        let applied = form.apply_key_values(&text);
        debug!(
            "Applied {} entries from {} to item {}",
            applied,
            path.display(),
            self.id()
        );
        self.submit_form(form)
    }

    fn snapshot(&self) -> ItemRecord {
        self.core().record()
    }

    fn restore(&mut self, record: &ItemRecord) {
        self.core_mut().restore(record);
    }
}

/// Stand-in for a persisted item whose builder is not registered.
///
/// It keeps the persisted record intact and refuses all work until the
/// builder appears and the item is rebuilt.
pub struct DisabledItem {
    core: ItemCore,
    record: ItemRecord,
}

impl DisabledItem {
    pub fn new(record: ItemRecord) -> Self {
        let mut core = ItemCore::new(
            record.name.clone(),
            record.description.clone(),
            record.builder_name.clone(),
            record.item_type,
            record.form.clone(),
            None,
        );
        core.set_id(record.id);
        core.enabled = false;
        core.output_file = record.output_file.clone();
        Self { core, record }
    }

    pub fn record(&self) -> &ItemRecord {
        &self.record
    }
}

impl Item for DisabledItem {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }

    fn submit_form(&mut self, _form: Form) -> ItemStatus {
        ItemStatus::InfoError
    }

    fn process(&mut self, action: &str) -> ItemStatus {
        debug!(
            "Item {} is disabled ({} not registered); refusing '{}'",
            self.core.id, self.core.builder_name, action
        );
        ItemStatus::InfoError
    }

    fn duplicate(&self) -> Box<dyn Item> {
        Box::new(DisabledItem::new(self.record.clone()))
    }

    fn set_enabled(&mut self, _enabled: bool) {}

    fn update(&mut self, _message: &Message) -> bool {
        false
    }

    fn snapshot(&self) -> ItemRecord {
        let mut record = self.record.clone();
        record.id = self.core.id;
        record.enabled = false;
        record
    }

    fn restore(&mut self, record: &ItemRecord) {
        self.record = record.clone();
        self.core.restore(record);
    }
}
