//! Typed component columns.
//!
//! Each registered component type gets one [`Column`], a vector of optional
//! slots indexed by entity index. A slot remembers the generation that wrote
//! it, so lookups through a stale handle miss instead of reading the next
//! occupant's data. Iterating the slot vector front to back yields entities
//! in ascending index order, which the deterministic passes rely on.

use std::any::Any;

use crate::entity::{EntityAllocator, EntityId};

// ---------------------------------------------------------------------------
// AnyColumn
// ---------------------------------------------------------------------------

/// Type-erased operations the world performs on every column.
pub(crate) trait AnyColumn: Send + Sync {
    fn remove_entity(&mut self, entity: EntityId) -> bool;
    /// Drop rows whose entity is no longer alive. Returns rows removed.
    fn retain_alive(&mut self, allocator: &EntityAllocator) -> usize;
    fn contains(&self, entity: EntityId) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: T,
}

/// Storage for one component type.
#[derive(Debug, Clone)]
pub struct Column<T> {
    slots: Vec<Option<Slot<T>>>,
    len: usize,
}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Column<T> {
    /// Insert or overwrite. Returns the previous value for the same entity.
    pub fn insert(&mut self, entity: EntityId, value: T) -> Option<T> {
        let idx = entity.index() as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        let slot = Slot {
            generation: entity.generation(),
            value,
        };
        match self.slots[idx].replace(slot) {
            Some(prev) if prev.generation == entity.generation() => Some(prev.value),
            Some(_) => None,
            None => {
                self.len += 1;
                None
            }
        }
    }

    pub fn get(&self, entity: EntityId) -> Option<&T> {
        match self.slots.get(entity.index() as usize)? {
            Some(slot) if slot.generation == entity.generation() => Some(&slot.value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        match self.slots.get_mut(entity.index() as usize)? {
            Some(slot) if slot.generation == entity.generation() => Some(&mut slot.value),
            _ => None,
        }
    }

    pub fn take(&mut self, entity: EntityId) -> Option<T> {
        let cell = self.slots.get_mut(entity.index() as usize)?;
        if cell.as_ref()?.generation != entity.generation() {
            return None;
        }
        self.len -= 1;
        cell.take().map(|slot| slot.value)
    }

    /// Rows in ascending entity order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.slots.iter().enumerate().filter_map(|(idx, cell)| {
            cell.as_ref()
                .map(|slot| (EntityId::new(idx as u32, slot.generation), &slot.value))
        })
    }

    /// Mutable rows in ascending entity order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(idx, cell)| {
            cell.as_mut()
                .map(|slot| (EntityId::new(idx as u32, slot.generation), &mut slot.value))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T: Send + Sync + 'static> AnyColumn for Column<T> {
    fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.take(entity).is_some()
    }

    fn retain_alive(&mut self, allocator: &EntityAllocator) -> usize {
        let mut removed = 0;
        for (idx, cell) in self.slots.iter_mut().enumerate() {
            let stale = cell
                .as_ref()
                .is_some_and(|slot| !allocator.is_alive(EntityId::new(idx as u32, slot.generation)));
            if stale {
                *cell = None;
                removed += 1;
            }
        }
        self.len -= removed;
        removed
    }

    fn contains(&self, entity: EntityId) -> bool {
        self.get(entity).is_some()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
