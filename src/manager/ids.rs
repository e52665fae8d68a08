use std::collections::BTreeSet;

use crate::item::ItemId;

/// Hands out item ids. Released ids are reused, smallest first, before the
/// sequential counter advances.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_sequential: ItemId,
    reusable: BTreeSet<ItemId>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_sequential: 1,
            reusable: BTreeSet::new(),
        }
    }

    pub fn allocate(&mut self) -> ItemId {
        if let Some(id) = self.reusable.pop_first() {
            return id;
        }
        let id = self.next_sequential;
        self.next_sequential += 1;
        id
    }

    /// Return an id to the pool
    pub fn release(&mut self, id: ItemId) {
        if id == 0 || id >= self.next_sequential {
            return;
        }
        self.reusable.insert(id);
    }

    /// Rebuild from the set of live ids: the counter moves past the largest
    /// one and every gap below it becomes reusable.
    pub fn rebuild_from<I>(&mut self, live: I)
    where
        I: IntoIterator<Item = ItemId>,
    {
        let live: BTreeSet<ItemId> = live.into_iter().filter(|id| *id > 0).collect();
        let max = live.last().copied().unwrap_or(0);

        self.next_sequential = max + 1;
        self.reusable = (1..max).filter(|id| !live.contains(id)).collect();
    }

    pub fn next_sequential(&self) -> ItemId {
        self.next_sequential
    }

    pub fn reusable(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.reusable.iter().copied()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
