//! Entity identities and their allocator.
//!
//! An [`EntityId`] packs a 32-bit slot index and a 32-bit generation into a
//! `u64`. Freeing a slot bumps its generation, so a handle held across a
//! despawn is detected as stale instead of silently aliasing the next
//! occupant of the slot.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Generational entity handle.
///
/// Layout: `[generation: u32 | index: u32]`. Ordering is by index first and
/// generation second, which is the order every deterministic pass in the
/// engine iterates in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl Ord for EntityId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.index(), self.generation()).cmp(&(other.index(), other.generation()))
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// AllocatorState
// ---------------------------------------------------------------------------

/// Plain-data image of an [`EntityAllocator`], captured with every snapshot
/// so that a rollback reproduces entity identities exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorState {
    pub generations: Vec<u32>,
    pub alive: Vec<bool>,
    /// Free slots in FIFO order.
    pub free_indices: Vec<u32>,
}

impl AllocatorState {
    /// Entities marked alive in this image, ascending.
    pub fn live_entities(&self) -> Vec<EntityId> {
        self.alive
            .iter()
            .zip(&self.generations)
            .enumerate()
            .filter(|(_, (alive, _))| **alive)
            .map(|(idx, (_, &gen))| EntityId::new(idx as u32, gen))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Hands out [`EntityId`]s and recycles freed slots.
///
/// Freed slots are reused in FIFO order so that generation churn is spread
/// across slots rather than concentrated on the most recently freed one.
#[derive(Debug, Default, Clone)]
pub struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free_indices: VecDeque<u32>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id, reusing the oldest free slot if there is one.
    pub fn allocate(&mut self) -> EntityId {
        match self.free_indices.pop_front() {
            Some(index) => {
                self.alive[index as usize] = true;
                EntityId::new(index, self.generations[index as usize])
            }
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(0);
                self.alive.push(true);
                EntityId::new(index, 0)
            }
        }
    }

    /// Free `id`'s slot. Returns `false` when `id` is stale or already dead.
    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let idx = id.index() as usize;
        self.alive[idx] = false;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_indices.push_back(id.index());
        true
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        let idx = id.index() as usize;
        idx < self.generations.len() && self.alive[idx] && self.generations[idx] == id.generation()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }

    /// All live entities in ascending order.
    pub fn live_entities(&self) -> Vec<EntityId> {
        self.state().live_entities()
    }

    pub fn state(&self) -> AllocatorState {
        AllocatorState {
            generations: self.generations.clone(),
            alive: self.alive.clone(),
            free_indices: self.free_indices.iter().copied().collect(),
        }
    }

    /// Rebuild an allocator from a captured image.
    ///
    /// Images whose vectors disagree in length are padded with dead slots so
    /// the allocator never indexes out of bounds.
    pub fn from_state(state: &AllocatorState) -> Self {
        let len = state.generations.len().max(state.alive.len());
        let mut generations = state.generations.clone();
        let mut alive = state.alive.clone();
        generations.resize(len, 0);
        alive.resize(len, false);
        let free_indices = state
            .free_indices
            .iter()
            .copied()
            .filter(|&i| (i as usize) < len && !alive[i as usize])
            .collect();
        Self {
            generations,
            alive,
            free_indices,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
