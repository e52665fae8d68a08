use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;

use super::form::Form;
use super::status::ItemStatus;

/// Identifier handed out by the item manager. Live ids are always >= 1.
pub type ItemId = u32;

/// Category of an item, used to filter builders
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ItemType {
    #[default]
    Basic,
    Model,
    Simulation,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Basic => f.write_str("Basic"),
            ItemType::Model => f.write_str("Model"),
            ItemType::Simulation => f.write_str("Simulation"),
        }
    }
}

/// The workspace items read inputs from and write outputs to
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    /// File names directly under the project root, sorted. An extension
    /// filter is matched without the leading dot.
    pub fn list_files(&self, extension: Option<&str>) -> Vec<String> {
        let Ok(dir) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut names: Vec<String> = dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| match extension {
                Some(ext) => path.extension().is_some_and(|e| e == ext),
                None => true,
            })
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }
}

/// Serialized state of an item, as handed to persistence providers
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemRecord {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub builder_name: String,
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub enabled: bool,
    pub form: Form,
    pub output_file: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

/// Id and name of a live item
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ItemSummary {
    pub id: ItemId,
    pub name: String,
    pub builder_name: String,
}

/// Shared status slot: one writer publishes, any number of readers take
/// snapshots.
#[derive(Clone, Debug)]
pub struct StatusCell {
    tx: Arc<watch::Sender<ItemStatus>>,
}

impl StatusCell {
    pub fn new(initial: ItemStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> ItemStatus {
        *self.tx.borrow()
    }

    pub fn set(&self, status: ItemStatus) -> ItemStatus {
        self.tx.send_replace(status)
    }

    pub fn subscribe(&self) -> watch::Receiver<ItemStatus> {
        self.tx.subscribe()
    }

    /// A fresh cell holding the current value
    pub fn detached(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(ItemStatus::InfoError)
    }
}

/// Shared form slot. Background runs append resources through it while
/// callers read copies.
#[derive(Clone, Debug, Default)]
pub struct FormCell {
    inner: Arc<RwLock<Form>>,
}

impl FormCell {
    pub fn new(form: Form) -> Self {
        Self {
            inner: Arc::new(RwLock::new(form)),
        }
    }

    pub fn get(&self) -> Form {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, form: Form) -> Form {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, form)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Form) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// A fresh cell holding a copy of the current form
    pub fn detached(&self) -> Self {
        Self::new(self.get())
    }
}

/// Lock a std mutex, recovering the guard if a holder panicked
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
