use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{PersistenceError, PersistenceProvider};
use crate::env;
use crate::item::{ItemRecord, Project};

/// Configuration for the JSON file provider
#[derive(Debug, Clone)]
pub struct JsonProviderConfig {
    /// Write to a temporary file and rename it into place
    pub atomic_writes: bool,
    /// Move storage under the project's `.itemflow/items` when a default
    /// project is set
    pub follow_project: bool,
}

impl Default for JsonProviderConfig {
    fn default() -> Self {
        Self {
            atomic_writes: true,
            follow_project: false,
        }
    }
}

/// Stores each item as `item_<id>.json` in one directory
pub struct JsonFileProvider {
    directory: RwLock<PathBuf>,
    pub config: JsonProviderConfig,
}

impl JsonFileProvider {
    pub fn new(directory: impl Into<PathBuf>, config: JsonProviderConfig) -> Self {
        Self {
            directory: RwLock::new(directory.into()),
            config,
        }
    }

    /// Provider storing under the project's `.itemflow/items`
    pub fn for_project(project: &Project) -> Self {
        Self::new(
            env::items_dir_path(&project.root),
            JsonProviderConfig {
                follow_project: true,
                ..Default::default()
            },
        )
    }

    pub fn directory(&self) -> PathBuf {
        self.directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn ensure_directory(&self, dir: &Path) -> Result<(), PersistenceError> {
        async_fs::create_dir_all(dir)
            .await
            .map_err(|source| PersistenceError::Io {
                path: dir.to_path_buf(),
                source,
            })
    }

    async fn write_record(&self, record: &ItemRecord) -> Result<(), PersistenceError> {
        let dir = self.directory();
        self.ensure_directory(&dir).await?;

        let data = serde_json::to_vec_pretty(record).map_err(|source| {
            PersistenceError::Serialization {
                id: record.id,
                source,
            }
        })?;

        let target = env::item_file_path(&dir, record.id);
        let write_path = if self.config.atomic_writes {
            target.with_extension(format!(
                "{}.{}",
                env::persistence::ITEM_FILE_EXTENSION,
                env::persistence::TEMP_FILE_EXTENSION
            ))
        } else {
            target.clone()
        };

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PersistenceError::Io { path, source }
        };

        let mut file = async_fs::File::create(&write_path)
            .await
            .map_err(io_err(&write_path))?;
        file.write_all(&data).await.map_err(io_err(&write_path))?;
        file.sync_all().await.map_err(io_err(&write_path))?;
        drop(file);

        if self.config.atomic_writes {
            async_fs::rename(&write_path, &target)
                .await
                .map_err(io_err(&target))?;
        }

        debug!("Wrote item {} to {}", record.id, target.display());
        Ok(())
    }
}

#[async_trait]
impl PersistenceProvider for JsonFileProvider {
    async fn persist_item(&self, item: &ItemRecord) -> Result<(), PersistenceError> {
        self.write_record(item).await
    }

    async fn update_item(&self, item: &ItemRecord) -> Result<(), PersistenceError> {
        self.write_record(item).await
    }

    async fn delete_item(&self, item: &ItemRecord) -> Result<(), PersistenceError> {
        let path = env::item_file_path(&self.directory(), item.id);
        match async_fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::NotFound(item.id))
            }
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }

    async fn load_items(&self) -> Result<Vec<ItemRecord>, PersistenceError> {
        let dir = self.directory();
        let mut entries = match async_fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(PersistenceError::Io { path: dir, source }),
        };

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(PersistenceError::Io {
                        path: dir.clone(),
                        source,
                    });
                }
            };

            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = env::item_id_from_file_name(&file_name) else {
                continue;
            };

            let path = entry.path();
            let data = match async_fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Skipping unreadable item file {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<ItemRecord>(&data) {
                Ok(record) if record.id == id => records.push(record),
                Ok(record) => warn!(
                    "Skipping {}: it holds item {}",
                    path.display(),
                    record.id
                ),
                Err(e) => warn!("Skipping corrupt item file {}: {}", path.display(), e),
            }
        }

        records.sort_by_key(|r| r.id);
        info!("Loaded {} item records from {}", records.len(), dir.display());
        Ok(records)
    }

    async fn set_default_project(&self, project: &Project) -> Result<(), PersistenceError> {
        if self.config.follow_project {
            let dir = env::items_dir_path(&project.root);
            debug!("Item storage follows project {} to {}", project.name, dir.display());
            *self.directory.write().unwrap_or_else(PoisonError::into_inner) = dir;
        }
        Ok(())
    }
}
