use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::types::ItemId;

/// A single named, typed value inside a [`DataComponent`]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Entry {
    pub name: String,
    pub description: String,
    pub value: String,
    pub default_value: String,
    /// Discrete choices; empty means any value is accepted
    pub allowed_values: Vec<String>,
    pub required: bool,
    /// Key used when the entry is exported instead of its name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Entry {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        self.default_value = value.clone();
        self.value = value;
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Key used for exports
    pub fn key(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.name)
    }

    pub fn is_allowed(&self, value: &str) -> bool {
        self.allowed_values.is_empty() || self.allowed_values.iter().any(|v| v == value)
    }

    /// Set the value if it is one of the allowed values.
    pub fn set_value(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if !self.is_allowed(&value) {
            return false;
        }
        self.value = value;
        true
    }

    /// Required entries must be non-blank; non-blank values must be allowed.
    pub fn is_satisfied(&self) -> bool {
        let value = self.value.trim();
        if value.is_empty() {
            return !self.required;
        }
        self.is_allowed(value)
    }
}

/// An ordered list of entries
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DataComponent {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub entries: Vec<Entry>,
}

impl DataComponent {
    pub fn new(id: u32, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.entry(name).map(|e| e.value.as_str())
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<String>) -> bool {
        self.entry_mut(name).is_some_and(|e| e.set_value(value))
    }

    pub fn is_satisfied(&self) -> bool {
        self.entries.iter().all(Entry::is_satisfied)
    }
}

/// A file produced or consumed by an item
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub path: PathBuf,
}

impl Resource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { name, path }
    }
}

/// Ordered list of output resources
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct ResourceComponent {
    pub id: u32,
    pub name: String,
    pub resources: Vec<Resource>,
}

impl ResourceComponent {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            resources: Vec::new(),
        }
    }

    /// Add a resource unless one with the same path is already listed.
    pub fn add(&mut self, resource: Resource) -> bool {
        if self.resources.iter().any(|r| r.path == resource.path) {
            return false;
        }
        self.resources.push(resource);
        true
    }

    pub fn remove_path(&mut self, path: &Path) -> bool {
        let before = self.resources.len();
        self.resources.retain(|r| r.path != path);
        before != self.resources.len()
    }

    pub fn clear(&mut self) {
        self.resources.clear();
    }

    pub fn first(&self) -> Option<&Resource> {
        self.resources.first()
    }
}

/// A master name and the details attached to it
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MasterDetailsPair {
    pub master: String,
    pub details: DataComponent,
}

/// A list of masters, each chosen from a set of templates and carrying its
/// own copy of that template's details, plus a shared set of global entries.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct MasterDetailsComponent {
    pub id: u32,
    pub name: String,
    pub globals: DataComponent,
    pub templates: Vec<MasterDetailsPair>,
    pub masters: Vec<MasterDetailsPair>,
}

impl MasterDetailsComponent {
    pub fn new(id: u32, name: impl Into<String>, globals: DataComponent) -> Self {
        Self {
            id,
            name: name.into(),
            globals,
            templates: Vec::new(),
            masters: Vec::new(),
        }
    }

    pub fn template_names(&self) -> Vec<String> {
        self.templates.iter().map(|t| t.master.clone()).collect()
    }

    pub fn template(&self, master: &str) -> Option<&MasterDetailsPair> {
        self.templates.iter().find(|t| t.master == master)
    }

    /// Append a master built from the named template. Returns its index.
    pub fn add_master(&mut self, master: &str) -> Option<usize> {
        let pair = self.template(master)?.clone();
        self.masters.push(pair);
        Some(self.masters.len() - 1)
    }

    pub fn remove_master(&mut self, index: usize) -> Option<MasterDetailsPair> {
        (index < self.masters.len()).then(|| self.masters.remove(index))
    }

    pub fn number_of_masters(&self) -> usize {
        self.masters.len()
    }

    pub fn master_at(&self, index: usize) -> Option<&str> {
        self.masters.get(index).map(|p| p.master.as_str())
    }

    pub fn details_at(&self, index: usize) -> Option<&DataComponent> {
        self.masters.get(index).map(|p| &p.details)
    }

    pub fn details_at_mut(&mut self, index: usize) -> Option<&mut DataComponent> {
        self.masters.get_mut(index).map(|p| &mut p.details)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Component {
    Data(DataComponent),
    Resources(ResourceComponent),
    MasterDetails(MasterDetailsComponent),
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::Data(c) => &c.name,
            Component::Resources(c) => &c.name,
            Component::MasterDetails(c) => &c.name,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Component::Data(c) => c.id,
            Component::Resources(c) => c.id,
            Component::MasterDetails(c) => c.id,
        }
    }
}

/// The configuration surface of an item
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Form {
    pub id: ItemId,
    pub item_id: ItemId,
    pub name: String,
    pub description: String,
    pub components: Vec<Component>,
    pub actions: Vec<String>,
    pub ready: bool,
}

impl Form {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn component(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn component_named(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    pub fn data(&self, name: &str) -> Option<&DataComponent> {
        self.components.iter().find_map(|c| match c {
            Component::Data(d) if d.name == name => Some(d),
            _ => None,
        })
    }

    pub fn data_mut(&mut self, name: &str) -> Option<&mut DataComponent> {
        self.components.iter_mut().find_map(|c| match c {
            Component::Data(d) if d.name == name => Some(d),
            _ => None,
        })
    }

    pub fn resources(&self, name: &str) -> Option<&ResourceComponent> {
        self.components.iter().find_map(|c| match c {
            Component::Resources(r) if r.name == name => Some(r),
            _ => None,
        })
    }

    pub fn resources_mut(&mut self, name: &str) -> Option<&mut ResourceComponent> {
        self.components.iter_mut().find_map(|c| match c {
            Component::Resources(r) if r.name == name => Some(r),
            _ => None,
        })
    }

    pub fn master_details(&self, name: &str) -> Option<&MasterDetailsComponent> {
        self.components.iter().find_map(|c| match c {
            Component::MasterDetails(m) if m.name == name => Some(m),
            _ => None,
        })
    }

    pub fn master_details_mut(&mut self, name: &str) -> Option<&mut MasterDetailsComponent> {
        self.components.iter_mut().find_map(|c| match c {
            Component::MasterDetails(m) if m.name == name => Some(m),
            _ => None,
        })
    }

    /// All entries of all data components, in form order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.components
            .iter()
            .filter_map(|c| match c {
                Component::Data(d) => Some(d.entries.iter()),
                _ => None,
            })
            .flatten()
    }

    /// Set the first entry with this name across all data components and
    /// master/details globals.
    pub fn set_value(&mut self, name: &str, value: &str) -> bool {
        self.components.iter_mut().any(|c| match c {
            Component::Data(d) => d.set_value(name, value),
            Component::MasterDetails(m) => m.globals.set_value(name, value),
            Component::Resources(_) => false,
        })
    }

    /// Apply one `key=value` assignment.
    ///
    /// Besides entry names, master/details rows are addressed by component
    /// name: `Jobs+=<template>` appends a row built from that template and
    /// `Jobs[<i>].<entry>=<value>` sets an entry of row `i`.
    pub fn assign(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim();
        if let Some(component) = key.strip_suffix('+') {
            return self
                .master_details_mut(component.trim())
                .is_some_and(|md| md.add_master(value.trim()).is_some());
        }
        if let Some((component, index, entry)) = row_key(key) {
            return self
                .master_details_mut(component)
                .and_then(|md| md.details_at_mut(index))
                .is_some_and(|details| details.set_value(entry, value));
        }
        self.set_value(key, value)
    }

    /// Apply `key = value` lines with [`Form::assign`]. Blank lines and
    /// lines starting with `#` are skipped. Returns the number applied.
    pub fn apply_key_values(&mut self, text: &str) -> usize {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .filter(|(key, value)| self.assign(key, value.trim()))
            .count()
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

/// Split `Name[i].entry` into its parts
fn row_key(key: &str) -> Option<(&str, usize, &str)> {
    let (head, entry) = key.split_once("].")?;
    let (component, index) = head.split_once('[')?;
    let index = index.trim().parse().ok()?;
    Some((component.trim(), index, entry.trim()))
}
