//! Item builders and the registry that resolves them by name.

pub mod catalog;
pub mod registry;

pub use catalog::{BuilderCatalog, BuilderConfig};
pub use registry::BuilderRegistry;

use std::sync::Arc;

use crate::item::{Item, ItemType, Project};

/// Produces new items of one named kind.
pub trait ItemBuilder: Send + Sync {
    /// Name under which the builder is registered and items are created
    fn name(&self) -> &str;

    fn item_type(&self) -> ItemType;

    /// Whether the builder is listed among the available item types
    fn is_publishable(&self) -> bool {
        true
    }

    /// Builders whose items wrap other builders' items
    fn is_composite(&self) -> bool {
        false
    }

    /// Build a fresh item, or `None` if the builder cannot produce one in
    /// this context.
    fn build(&self, project: Option<&Project>) -> Option<Box<dyn Item>>;
}

/// A builder whose items are assembled from other builders' items.
///
/// The registry hands every composite the full builder set whenever a new
/// builder is registered.
pub trait CompositeItemBuilder: ItemBuilder {
    fn add_builders(&self, builders: Vec<Arc<dyn ItemBuilder>>);

    fn has_builders(&self) -> bool;
}
