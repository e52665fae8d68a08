use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::{CompositeItemBuilder, ItemBuilder};
use crate::item::ItemType;

/// Builders keyed by name. The first registration of a name wins.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: DashMap<String, Arc<dyn ItemBuilder>>,
    composites: RwLock<Vec<Arc<dyn CompositeItemBuilder>>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder. Returns `false` if the name is already taken.
    pub fn register(&self, builder: Arc<dyn ItemBuilder>) -> bool {
        let name = builder.name().to_string();
        let inserted = match self.builders.entry(name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(builder);
                true
            }
        };

        if !inserted {
            warn!("Builder '{}' is already registered; keeping the first", name);
            return false;
        }

        info!("Registered item builder '{}'", name);
        self.notify_composites();
        true
    }

    /// Register a composite builder. It is offered the current builder set
    /// right away and again on every later registration.
    pub fn register_composite(&self, builder: Arc<dyn CompositeItemBuilder>) -> bool {
        if self.contains(builder.name()) {
            warn!(
                "Builder '{}' is already registered; keeping the first",
                builder.name()
            );
            return false;
        }
        self.composites
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(builder.clone());
        self.register(builder)
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.builders.remove(name).is_some();
        if removed {
            self.composites
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|c| c.name() != name);
            debug!("Unregistered item builder '{}'", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ItemBuilder>> {
        self.builders.get(name).map(|b| b.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// All builders, sorted by name
    pub fn all(&self) -> Vec<Arc<dyn ItemBuilder>> {
        let mut builders: Vec<_> = self.builders.iter().map(|b| b.value().clone()).collect();
        builders.sort_by(|a, b| a.name().cmp(b.name()));
        builders
    }

    /// Names of publishable builders, sorted
    pub fn publishable_names(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|b| b.is_publishable())
            .map(|b| b.name().to_string())
            .collect()
    }

    pub fn names_of_type(&self, item_type: ItemType) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|b| b.is_publishable() && b.item_type() == item_type)
            .map(|b| b.name().to_string())
            .collect()
    }

    fn notify_composites(&self) {
        let composites = self
            .composites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if composites.is_empty() {
            return;
        }

        let all = self.all();
        for composite in composites {
            composite.add_builders(all.clone());
            debug!(
                "Composite builder '{}' now has builders: {}",
                composite.name(),
                composite.has_builders()
            );
        }
    }
}
