//! Persistence of item records.
//!
//! The item manager talks to storage only through [`PersistenceProvider`];
//! [`JsonFileProvider`] keeps one JSON file per item.

pub mod json;

pub use json::{JsonFileProvider, JsonProviderConfig};

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::item::{ItemId, ItemRecord, Project};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize item {id}: {source}")]
    Serialization {
        id: ItemId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Item {0} is not persisted")]
    NotFound(ItemId),
}

/// Storage for item records.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Store a newly created item
    async fn persist_item(&self, item: &ItemRecord) -> Result<(), PersistenceError>;

    /// Store the current state of an existing item
    async fn update_item(&self, item: &ItemRecord) -> Result<(), PersistenceError>;

    async fn delete_item(&self, item: &ItemRecord) -> Result<(), PersistenceError>;

    /// All stored records, ordered by id
    async fn load_items(&self) -> Result<Vec<ItemRecord>, PersistenceError>;

    async fn set_default_project(&self, project: &Project) -> Result<(), PersistenceError>;
}
