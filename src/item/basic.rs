use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use super::base::{Item, ItemCore};
use super::form::{Component, DataComponent, Entry, Form, ResourceComponent, Resource};
use super::status::ItemStatus;
use super::types::{ItemType, Project};
use crate::builder::ItemBuilder;

pub const PARAMETERS: &str = "Parameters";
pub const OUTPUT_FILES: &str = "Output Files";
pub const EXPORT_KEY_VALUE: &str = "Export to key-value pair output";
pub const EXPORT_JSON: &str = "Export to JSON";

/// A plain data item: a list of entries that can be exported to the project
/// as `key=value` lines or as JSON.
pub struct BasicItem {
    core: ItemCore,
}

impl BasicItem {
    pub fn new(
        name: &str,
        description: &str,
        item_type: ItemType,
        entries: Vec<Entry>,
        project: Option<Project>,
    ) -> Self {
        let mut parameters = DataComponent::new(1, PARAMETERS, "Item parameters");
        parameters.entries = entries;

        let form = Form::new(name, description)
            .with_component(Component::Data(parameters))
            .with_component(Component::Resources(ResourceComponent::new(2, OUTPUT_FILES)))
            .with_actions([EXPORT_KEY_VALUE, EXPORT_JSON]);

        Self {
            core: ItemCore::new(name, description, name, item_type, form, project),
        }
    }

    fn review(form: &Form) -> ItemStatus {
        if form.entries().all(Entry::is_satisfied) {
            ItemStatus::ReadyToProcess
        } else {
            ItemStatus::InfoError
        }
    }

    fn export_path(&self, extension: &str) -> Option<PathBuf> {
        let project = self.core.project.as_ref()?;
        let stem = self.core.form.get().name.replace(' ', "_");
        Some(project.file(format!("{}_{}.{}", stem, self.core.id, extension)))
    }

    fn render_key_values(form: &Form) -> String {
        form.entries()
            .map(|e| format!("{}={}\n", e.key(), e.value))
            .collect()
    }

    fn render_json(form: &Form) -> Result<String, serde_json::Error> {
        let map: Map<String, Value> = form
            .entries()
            .map(|e| (e.key().to_string(), Value::String(e.value.clone())))
            .collect();
        serde_json::to_string_pretty(&Value::Object(map))
    }

    fn export(&mut self, action: &str) -> ItemStatus {
        let (extension, contents) = {
            let form = self.core.form.get();
            if action == EXPORT_JSON {
                match Self::render_json(&form) {
                    Ok(json) => ("json", json),
                    Err(e) => {
                        warn!("Failed to render item {} as JSON: {}", self.core.id, e);
                        return ItemStatus::InfoError;
                    }
                }
            } else {
                ("dat", Self::render_key_values(&form))
            }
        };

        let Some(path) = self.export_path(extension) else {
            warn!("Item {} has no project to export into", self.core.id);
            return ItemStatus::InfoError;
        };

        if let Err(e) = std::fs::write(&path, contents) {
            warn!("Failed to write {}: {}", path.display(), e);
            return ItemStatus::InfoError;
        }

        info!("Item {} exported to {}", self.core.id, path.display());
        self.core.form.update(|form| {
            if let Some(outputs) = form.resources_mut(OUTPUT_FILES) {
                outputs.add(Resource::from_path(&path));
            }
        });
        self.core.output_file = Some(path);
        self.core.notify_project_changed();
        ItemStatus::Processed
    }
}

impl Item for BasicItem {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }

    fn submit_form(&mut self, form: Form) -> ItemStatus {
        self.core.submit_with(form, Self::review)
    }

    fn process(&mut self, action: &str) -> ItemStatus {
        if !self.core.enabled {
            return ItemStatus::InfoError;
        }

        let status = if !self.core.form.get().has_action(action) {
            warn!("Item {} has no action '{}'", self.core.id, action);
            ItemStatus::InfoError
        } else if !self.core.status.get().can_process() {
            warn!(
                "Item {} is {} and cannot run '{}'",
                self.core.id,
                self.core.status.get(),
                action
            );
            ItemStatus::InfoError
        } else {
            self.core.status.set(ItemStatus::Processing);
            self.export(action)
        };

        self.core.status.set(status);
        status
    }

    fn duplicate(&self) -> Box<dyn Item> {
        Box::new(BasicItem {
            core: self.core.deep_copy(),
        })
    }
}

/// Builds [`BasicItem`]s with a fixed set of entries
#[derive(Clone, Debug)]
pub struct BasicItemBuilder {
    name: String,
    description: String,
    item_type: ItemType,
    publishable: bool,
    entries: Vec<Entry>,
}

impl BasicItemBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            item_type: ItemType::Basic,
            publishable: true,
            entries: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_item_type(mut self, item_type: ItemType) -> Self {
        self.item_type = item_type;
        self
    }

    pub fn with_entries(mut self, entries: Vec<Entry>) -> Self {
        self.entries = entries;
        self
    }

    pub fn publishable(mut self, publishable: bool) -> Self {
        self.publishable = publishable;
        self
    }
}

impl ItemBuilder for BasicItemBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn item_type(&self) -> ItemType {
        self.item_type
    }

    fn is_publishable(&self) -> bool {
        self.publishable
    }

    fn build(&self, project: Option<&Project>) -> Option<Box<dyn Item>> {
        let description = if self.description.is_empty() {
            format!("A {} item", self.name)
        } else {
            self.description.clone()
        };
        Some(Box::new(BasicItem::new(
            &self.name,
            &description,
            self.item_type,
            self.entries.clone(),
            project.cloned(),
        )))
    }
}
