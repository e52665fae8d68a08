use std::collections::BTreeMap;

use super::ids::IdAllocator;
use crate::item::{Item, ItemId, ItemSummary};

/// Live items keyed by id, plus the allocator that numbers them
#[derive(Default)]
pub struct ItemRegistry {
    items: BTreeMap<ItemId, Box<dyn Item>>,
    ids: IdAllocator,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number a new item and take ownership of it
    pub fn insert_new(&mut self, mut item: Box<dyn Item>) -> ItemId {
        let id = self.ids.allocate();
        item.set_id(id);
        self.items.insert(id, item);
        id
    }

    /// Take a loaded item under the id it was persisted with. Returns the
    /// item back if the id is invalid or taken.
    pub fn insert_loaded(&mut self, item: Box<dyn Item>) -> Result<(), Box<dyn Item>> {
        let id = item.id();
        if id == 0 || self.items.contains_key(&id) {
            return Err(item);
        }
        self.items.insert(id, item);
        Ok(())
    }

    pub fn replace(&mut self, id: ItemId, item: Box<dyn Item>) -> Option<Box<dyn Item>> {
        self.items.get_mut(&id).map(|slot| std::mem::replace(slot, item))
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Box<dyn Item>> {
        let item = self.items.remove(&id)?;
        self.ids.release(id);
        Some(item)
    }

    pub fn get(&self, id: ItemId) -> Option<&dyn Item> {
        self.items.get(&id).map(|item| item.as_ref())
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Box<dyn Item>> {
        self.items.get_mut(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Item> {
        self.items.values().map(|item| item.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Item>> {
        self.items.values_mut()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn summaries(&self) -> Vec<ItemSummary> {
        self.iter()
            .map(|item| ItemSummary {
                id: item.id(),
                name: item.name().to_string(),
                builder_name: item.builder_name().to_string(),
            })
            .collect()
    }

    /// Make the gaps between live ids reusable
    pub fn defragment(&mut self) {
        let ids = self.ids();
        self.ids.rebuild_from(ids);
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.ids
    }
}
