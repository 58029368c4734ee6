//! Rewind ECS -- deterministic entity/component store with byte-image
//! snapshots.
//!
//! Entities are generational ids. Components live in per-type columns indexed
//! by entity index, so every iteration runs in ascending entity order.
//! Singletons live beside them as typed resources. Any plain-data type can
//! be declared [`Snapshotable`](snapshot::Snapshotable) and is then captured,
//! restored and hashed as raw bytes. All simulation math goes through the
//! [`fixed`] module.
//!
//! # Quick Start
//!
//! ```
//! use bytemuck::{Pod, Zeroable};
//! use rewind_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
//! #[repr(C)]
//! struct Position(FxVec3);
//!
//! impl Snapshotable for Position {}
//!
//! let mut world = World::new();
//! world.register_snapshotable::<Position>("position").unwrap();
//!
//! let e = world.spawn();
//! world.insert(e, Position(FxVec3::new(Fx::ONE, Fx::ZERO, Fx::ZERO))).unwrap();
//! let before = world.state_hash();
//!
//! world.get_mut::<Position>(e).unwrap().0.x += Fx::ONE;
//! assert_ne!(world.state_hash(), before);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod fixed;
pub mod snapshot;
pub mod storage;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world and snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    #[error("name '{name}' is already registered for a different type")]
    DuplicateName { name: String },

    #[error("'{name}' is already registered as a {registered:?}")]
    KindMismatch {
        name: String,
        registered: component::ComponentKind,
    },

    /// A snapshot record names a type the world has not registered as
    /// snapshotable.
    #[error("snapshot record references unregistered type tag {tag:?}")]
    UnknownTypeTag { tag: component::ComponentTypeId },

    #[error("snapshot bytes for '{component}' have length {actual}, expected {expected}")]
    ImageLength {
        component: String,
        expected: usize,
        actual: usize,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{ComponentInfo, ComponentKind, ComponentRegistry, ComponentTypeId};
    pub use crate::entity::{AllocatorState, EntityId};
    pub use crate::fixed::{Fx, FxQuat, FxVec3};
    pub use crate::snapshot::{
        ComponentRecord, EntityImage, ResourceImage, RestoreReport, SchemaEntry, SnapshotEntry,
        SnapshotRegistry, Snapshotable, ValidationFailure, WorldImage,
    };
    pub use crate::storage::Column;
    pub use crate::world::{Storable, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
