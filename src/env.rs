//! Environment constants and path utilities for itemflow.
//!
//! This module centralizes the directory and file names used for
//! configuration discovery and item persistence.

use std::path::{Path, PathBuf};

use crate::item::ItemId;

/// Main application directory name (hidden directory like .git)
pub const ITEMFLOW_DIR_NAME: &str = ".itemflow";

/// Configuration file name inside an itemflow directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name in a workspace root
pub const WORKSPACE_CONFIG_FILE_NAME: &str = "itemflow.toml";

/// System-wide configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/itemflow";

/// Persistence directory and file names
pub mod persistence {
    /// Items directory name within .itemflow
    pub const ITEMS_DIR_NAME: &str = "items";

    /// Prefix of per-item record files
    pub const ITEM_FILE_PREFIX: &str = "item_";

    /// Extension of per-item record files
    pub const ITEM_FILE_EXTENSION: &str = "json";

    /// Extension of files being written before they are renamed into place
    pub const TEMP_FILE_EXTENSION: &str = "tmp";
}

/// Build the .itemflow directory path from a workspace root
pub fn itemflow_dir_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(ITEMFLOW_DIR_NAME)
}

/// Build the items directory path from a workspace root
pub fn items_dir_path(workspace_root: &Path) -> PathBuf {
    itemflow_dir_path(workspace_root).join(persistence::ITEMS_DIR_NAME)
}

/// Build the record file path for one item
pub fn item_file_path(items_dir: &Path, id: ItemId) -> PathBuf {
    items_dir.join(format!(
        "{}{}.{}",
        persistence::ITEM_FILE_PREFIX,
        id,
        persistence::ITEM_FILE_EXTENSION
    ))
}

/// Parse the item id out of a record file name
pub fn item_id_from_file_name(file_name: &str) -> Option<ItemId> {
    file_name
        .strip_prefix(persistence::ITEM_FILE_PREFIX)?
        .strip_suffix(persistence::ITEM_FILE_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(ITEMFLOW_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(ITEMFLOW_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build the workspace-root config file path
pub fn workspace_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(WORKSPACE_CONFIG_FILE_NAME)
}

/// Build the system-wide config file path
pub fn system_config_file_path() -> PathBuf {
    Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_construction() {
        let workspace = Path::new("/test/workspace");

        assert_eq!(
            itemflow_dir_path(workspace),
            Path::new("/test/workspace/.itemflow")
        );

        assert_eq!(
            items_dir_path(workspace),
            Path::new("/test/workspace/.itemflow/items")
        );

        assert_eq!(
            item_file_path(&items_dir_path(workspace), 42),
            Path::new("/test/workspace/.itemflow/items/item_42.json")
        );
    }

    #[test]
    fn test_item_id_from_file_name() {
        assert_eq!(item_id_from_file_name("item_42.json"), Some(42));
        assert_eq!(item_id_from_file_name("item_42.json.tmp"), None);
        assert_eq!(item_id_from_file_name("item_x.json"), None);
        assert_eq!(item_id_from_file_name("other.json"), None);
    }

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.itemflow/config.toml")
        );

        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.itemflow/config.toml")
        );

        assert_eq!(
            workspace_config_file_path(current_dir),
            Path::new("/current/project/itemflow.toml")
        );

        assert_eq!(
            system_config_file_path(),
            Path::new("/etc/itemflow/config.toml")
        );
    }
}
