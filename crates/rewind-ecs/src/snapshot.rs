//! Byte-image snapshots of the world.
//!
//! A type opts into snapshots by implementing [`Snapshotable`] and being
//! registered once with [`World::register_snapshotable`] (per-entity
//! components) or [`World::register_snapshotable_resource`] (singletons).
//! Registration records a small table of monomorphised capture, restore and
//! validate functions, so capture walks that table instead of knowing any
//! concrete type.
//!
//! # Image layout
//!
//! A [`WorldImage`] holds the allocator state, one [`ResourceImage`] per
//! captured singleton, and one [`EntityImage`] per live entity in ascending
//! id order. An entity image is a tightly packed byte buffer plus a
//! `(type, offset, len)` record for every component it contains.
//!
//! # Restore order
//!
//! Restore is type-major: registered types are visited in ascending
//! priority (ties broken by registration order) and each writes back every
//! entity's bytes before the next type starts. Validation runs after all
//! bytes are written and is advisory.
//!
//! # Example
//!
//! ```
//! use bytemuck::{Pod, Zeroable};
//! use rewind_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
//! #[repr(C)]
//! struct Health(u32);
//!
//! impl Snapshotable for Health {
//!     const PRIORITY: i32 = 100;
//! }
//!
//! let mut world = World::new();
//! world.register_snapshotable::<Health>("health").unwrap();
//! let e = world.spawn();
//! world.insert(e, Health(10)).unwrap();
//!
//! let image = world.capture_image();
//! world.insert(e, Health(1)).unwrap();
//! world.restore_image(&image).unwrap();
//! assert_eq!(world.get::<Health>(e), Some(&Health(10)));
//! ```

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::component::{ComponentKind, ComponentTypeId};
use crate::entity::{AllocatorState, EntityId};
use crate::storage::Column;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshotable
// ---------------------------------------------------------------------------

/// Plain-data type whose raw bytes are captured every tick.
pub trait Snapshotable: Pod + Send + Sync + 'static {
    /// Lower values are restored first.
    const PRIORITY: i32 = 100;
    /// Whether the value feeds the determinism hash.
    const INCLUDE_IN_HASH: bool = true;

    /// Post-restore sanity check. Failures are reported, never fatal.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registration table
// ---------------------------------------------------------------------------

type CaptureComponentFn = fn(&World, EntityId, &mut Vec<u8>) -> bool;
type RestoreComponentFn = fn(&mut World, EntityId, &[u8]) -> Result<(), EcsError>;
type ValidateComponentFn = fn(&World, EntityId) -> Option<Result<(), String>>;
type HashComponentsFn = fn(&World, &mut blake3::Hasher);

type CaptureResourceFn = fn(&World, &mut Vec<u8>) -> bool;
type RestoreResourceFn = fn(&mut World, &[u8]) -> Result<(), EcsError>;
type ValidateResourceFn = fn(&World) -> Option<Result<(), String>>;

#[derive(Clone, Copy)]
enum Accessors {
    Component {
        capture: CaptureComponentFn,
        restore: RestoreComponentFn,
        validate: ValidateComponentFn,
        hash: HashComponentsFn,
    },
    Resource {
        capture: CaptureResourceFn,
        restore: RestoreResourceFn,
        validate: ValidateResourceFn,
    },
}

impl std::fmt::Debug for Accessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Accessors::Component { .. } => f.write_str("Accessors::Component"),
            Accessors::Resource { .. } => f.write_str("Accessors::Resource"),
        }
    }
}

/// One row of the registration table.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub type_id: ComponentTypeId,
    pub name: String,
    pub size: usize,
    pub priority: i32,
    pub include_in_hash: bool,
    pub kind: ComponentKind,
    accessors: Accessors,
}

/// Registered snapshotable types, kept in restore order.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRegistry {
    entries: Vec<SnapshotEntry>,
}

impl SnapshotRegistry {
    /// Entries in ascending priority, ties in registration order.
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn entry(&self, type_id: ComponentTypeId) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.type_id == type_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Description of the table, suitable for embedding next to persisted
    /// images so a reader can check it matches its own registrations.
    pub fn schema(&self) -> Vec<SchemaEntry> {
        self.entries
            .iter()
            .map(|e| SchemaEntry {
                type_id: e.type_id,
                name: e.name.clone(),
                size: e.size as u32,
                priority: e.priority,
                include_in_hash: e.include_in_hash,
                kind: e.kind,
            })
            .collect()
    }

    fn add(&mut self, entry: SnapshotEntry) {
        if self.entry(entry.type_id).is_some() {
            return;
        }
        self.entries.push(entry);
        // Stable sort keeps registration order among equal priorities.
        self.entries.sort_by_key(|e| e.priority);
    }
}

/// Serializable description of one registered type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub type_id: ComponentTypeId,
    pub name: String,
    pub size: u32,
    pub priority: i32,
    pub include_in_hash: bool,
    pub kind: ComponentKind,
}

// -- monomorphised accessors ------------------------------------------------

fn capture_component<T: Snapshotable>(world: &World, entity: EntityId, out: &mut Vec<u8>) -> bool {
    match world.get::<T>(entity) {
        Some(value) => {
            out.extend_from_slice(bytemuck::bytes_of(value));
            true
        }
        None => false,
    }
}

fn decode<T: Snapshotable>(bytes: &[u8]) -> Result<T, EcsError> {
    bytemuck::try_pod_read_unaligned::<T>(bytes).map_err(|_| EcsError::ImageLength {
        component: std::any::type_name::<T>().to_owned(),
        expected: std::mem::size_of::<T>(),
        actual: bytes.len(),
    })
}

fn restore_component<T: Snapshotable>(world: &mut World, entity: EntityId, bytes: &[u8]) -> Result<(), EcsError> {
    let value = decode::<T>(bytes)?;
    world.insert(entity, value)?;
    Ok(())
}

fn validate_component<T: Snapshotable>(world: &World, entity: EntityId) -> Option<Result<(), String>> {
    world.get::<T>(entity).map(Snapshotable::validate)
}

fn hash_components<T: Snapshotable>(world: &World, hasher: &mut blake3::Hasher) {
    if let Some(column) = world.column::<T>() {
        hash_column(column, hasher);
    }
}

fn hash_column<T: Snapshotable>(column: &Column<T>, hasher: &mut blake3::Hasher) {
    for (entity, value) in column.iter() {
        hasher.update(&entity.to_raw().to_le_bytes());
        hasher.update(bytemuck::bytes_of(value));
    }
}

fn capture_resource<T: Snapshotable>(world: &World, out: &mut Vec<u8>) -> bool {
    match world.resource::<T>() {
        Some(value) => {
            out.extend_from_slice(bytemuck::bytes_of(value));
            true
        }
        None => false,
    }
}

fn restore_resource<T: Snapshotable>(world: &mut World, bytes: &[u8]) -> Result<(), EcsError> {
    let value = decode::<T>(bytes)?;
    world.insert_resource(value);
    Ok(())
}

fn validate_resource<T: Snapshotable>(world: &World) -> Option<Result<(), String>> {
    world.resource::<T>().map(Snapshotable::validate)
}

// ---------------------------------------------------------------------------
// Image types
// ---------------------------------------------------------------------------

/// Location of one component inside an [`EntityImage`]'s byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub type_id: ComponentTypeId,
    pub offset: u32,
    pub len: u32,
}

/// Packed bytes of every snapshotable component on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityImage {
    pub entity: EntityId,
    pub records: Vec<ComponentRecord>,
    pub bytes: Vec<u8>,
}

impl EntityImage {
    pub fn component_bytes(&self, type_id: ComponentTypeId) -> Option<&[u8]> {
        let record = self.records.iter().find(|r| r.type_id == type_id)?;
        let start = record.offset as usize;
        self.bytes.get(start..start + record.len as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceImage {
    pub type_id: ComponentTypeId,
    pub bytes: Vec<u8>,
}

/// Complete byte image of the snapshotable part of a [`World`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldImage {
    pub allocator: AllocatorState,
    pub resources: Vec<ResourceImage>,
    /// Sorted by entity id.
    pub entities: Vec<EntityImage>,
}

impl WorldImage {
    pub fn entity(&self, entity: EntityId) -> Option<&EntityImage> {
        self.entities
            .binary_search_by(|img| img.entity.cmp(&entity))
            .ok()
            .map(|i| &self.entities[i])
    }

    pub fn resource_bytes(&self, type_id: ComponentTypeId) -> Option<&[u8]> {
        self.resources
            .iter()
            .find(|r| r.type_id == type_id)
            .map(|r| r.bytes.as_slice())
    }

    /// Total captured payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.resources.iter().map(|r| r.bytes.len()).sum::<usize>()
            + self.entities.iter().map(|e| e.bytes.len()).sum::<usize>()
    }

    /// Determinism hash of this image under `registry`. Equals
    /// [`World::state_hash`] of the world the image was captured from.
    pub fn state_hash(&self, registry: &SnapshotRegistry) -> String {
        let mut hasher = blake3::Hasher::new();
        for entry in registry.entries().iter().filter(|e| e.include_in_hash) {
            match entry.kind {
                ComponentKind::Resource => {
                    if let Some(bytes) = self.resource_bytes(entry.type_id) {
                        hasher.update(bytes);
                    }
                }
                ComponentKind::Component => {
                    for img in &self.entities {
                        if let Some(bytes) = img.component_bytes(entry.type_id) {
                            hasher.update(&img.entity.to_raw().to_le_bytes());
                            hasher.update(bytes);
                        }
                    }
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

// ---------------------------------------------------------------------------
// RestoreReport
// ---------------------------------------------------------------------------

/// A validation predicate that failed after restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    /// `None` for resources.
    pub entity: Option<EntityId>,
    pub component: String,
    pub message: String,
}

/// Outcome of writing an image back into a world.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Component and resource values written.
    pub restored: usize,
    /// Snapshotable components detached because the image did not have them.
    pub detached: usize,
    /// Entities in the image that are not alive in the world; skipped.
    pub missing_entities: Vec<EntityId>,
    pub validation_failures: Vec<ValidationFailure>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.missing_entities.is_empty() && self.validation_failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// World snapshot impl
// ---------------------------------------------------------------------------

impl World {
    /// Register a per-entity component whose bytes are snapshotted.
    pub fn register_snapshotable<T: Snapshotable>(&mut self, name: &str) -> Result<ComponentTypeId, EcsError> {
        let id = self.register_component::<T>(name)?;
        self.snapshot_registry.add(SnapshotEntry {
            type_id: id,
            name: name.to_owned(),
            size: std::mem::size_of::<T>(),
            priority: T::PRIORITY,
            include_in_hash: T::INCLUDE_IN_HASH,
            kind: ComponentKind::Component,
            accessors: Accessors::Component {
                capture: capture_component::<T>,
                restore: restore_component::<T>,
                validate: validate_component::<T>,
                hash: hash_components::<T>,
            },
        });
        Ok(id)
    }

    /// Register a singleton resource whose bytes are snapshotted.
    pub fn register_snapshotable_resource<T: Snapshotable>(
        &mut self,
        name: &str,
    ) -> Result<ComponentTypeId, EcsError> {
        let id = self.register_resource::<T>(name)?;
        self.snapshot_registry.add(SnapshotEntry {
            type_id: id,
            name: name.to_owned(),
            size: std::mem::size_of::<T>(),
            priority: T::PRIORITY,
            include_in_hash: T::INCLUDE_IN_HASH,
            kind: ComponentKind::Resource,
            accessors: Accessors::Resource {
                capture: capture_resource::<T>,
                restore: restore_resource::<T>,
                validate: validate_resource::<T>,
            },
        });
        Ok(id)
    }

    /// Capture every registered snapshotable value plus allocator state.
    pub fn capture_image(&self) -> WorldImage {
        let mut resources = Vec::new();
        for entry in &self.snapshot_registry.entries {
            if let Accessors::Resource { capture, .. } = entry.accessors {
                let mut bytes = Vec::with_capacity(entry.size);
                if capture(self, &mut bytes) {
                    resources.push(ResourceImage {
                        type_id: entry.type_id,
                        bytes,
                    });
                }
            }
        }

        let entities = self
            .entities()
            .into_iter()
            .map(|entity| self.capture_entity(entity))
            .collect();

        WorldImage {
            allocator: self.allocator.state(),
            resources,
            entities,
        }
    }

    /// Pack one entity's snapshotable components in priority order.
    pub fn capture_entity(&self, entity: EntityId) -> EntityImage {
        let mut records = Vec::new();
        let mut bytes = Vec::new();
        for entry in &self.snapshot_registry.entries {
            if let Accessors::Component { capture, .. } = entry.accessors {
                let offset = bytes.len();
                if capture(self, entity, &mut bytes) {
                    records.push(ComponentRecord {
                        type_id: entry.type_id,
                        offset: offset as u32,
                        len: (bytes.len() - offset) as u32,
                    });
                }
            }
        }
        EntityImage {
            entity,
            records,
            bytes,
        }
    }

    /// Write an image's bytes back into live entities and resources.
    ///
    /// Entity identities are left alone: image entities that are not alive
    /// are skipped and reported, and live entities absent from the image keep
    /// their values. For an entity present in the image, any registered
    /// snapshotable component the image lacks is detached.
    ///
    /// The image is checked against the registration table before anything
    /// is written, so an error leaves the world untouched.
    pub fn restore_image(&mut self, image: &WorldImage) -> Result<RestoreReport, EcsError> {
        self.check_image(image)?;
        let entries = self.snapshot_registry.entries.clone();
        let mut report = RestoreReport::default();

        let (present, missing): (Vec<&EntityImage>, Vec<&EntityImage>) =
            image.entities.iter().partition(|img| self.is_alive(img.entity));
        for img in &missing {
            tracing::warn!(entity = %img.entity, "snapshot entity is not alive; skipped");
        }
        report.missing_entities = missing.iter().map(|img| img.entity).collect();

        for entry in &entries {
            match entry.accessors {
                Accessors::Resource { restore, .. } => {
                    if let Some(bytes) = image.resource_bytes(entry.type_id) {
                        restore(self, bytes)?;
                        report.restored += 1;
                    }
                }
                Accessors::Component { restore, .. } => {
                    for img in &present {
                        match img.component_bytes(entry.type_id) {
                            Some(bytes) => {
                                restore(self, img.entity, bytes)?;
                                report.restored += 1;
                            }
                            None => {
                                if self.detach_by_id(entry.type_id, img.entity) {
                                    report.detached += 1;
                                }
                            }
                        }
                    }
                }
            }
        }

        report.validation_failures = self.validate_snapshotables();
        tracing::trace!(
            restored = report.restored,
            detached = report.detached,
            missing = report.missing_entities.len(),
            "image restored"
        );
        Ok(report)
    }

    /// Restore allocator state first, then bytes. Entities spawned after
    /// the image was captured are removed and entities despawned since are
    /// brought back under their original ids.
    pub fn rewind_to_image(&mut self, image: &WorldImage) -> Result<RestoreReport, EcsError> {
        self.check_image(image)?;
        self.restore_allocator(&image.allocator);
        self.restore_image(image)
    }

    /// Run every registered validation predicate against live values.
    pub fn validate_snapshotables(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        for entry in &self.snapshot_registry.entries {
            match entry.accessors {
                Accessors::Resource { validate, .. } => {
                    if let Some(Err(message)) = validate(self) {
                        tracing::warn!(component = %entry.name, %message, "resource failed validation");
                        failures.push(ValidationFailure {
                            entity: None,
                            component: entry.name.clone(),
                            message,
                        });
                    }
                }
                Accessors::Component { validate, .. } => {
                    for entity in self.entities() {
                        if !self.has_by_id(entry.type_id, entity) {
                            continue;
                        }
                        if let Some(Err(message)) = validate(self, entity) {
                            tracing::warn!(%entity, component = %entry.name, %message, "component failed validation");
                            failures.push(ValidationFailure {
                                entity: Some(entity),
                                component: entry.name.clone(),
                                message,
                            });
                        }
                    }
                }
            }
        }
        failures
    }

    /// BLAKE3 over every hash-participating value in priority order, as a
    /// hex string. Components contribute `entity id ++ bytes` per entity in
    /// ascending id order.
    pub fn state_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for entry in self.snapshot_registry.entries.iter().filter(|e| e.include_in_hash) {
            match entry.accessors {
                Accessors::Resource { capture, .. } => {
                    let mut bytes = Vec::with_capacity(entry.size);
                    if capture(self, &mut bytes) {
                        hasher.update(&bytes);
                    }
                }
                Accessors::Component { hash, .. } => hash(self, &mut hasher),
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    fn check_image(&self, image: &WorldImage) -> Result<(), EcsError> {
        let check = |type_id: ComponentTypeId, kind: ComponentKind, len: usize| -> Result<(), EcsError> {
            let entry = self
                .snapshot_registry
                .entry(type_id)
                .filter(|e| e.kind == kind)
                .ok_or(EcsError::UnknownTypeTag { tag: type_id })?;
            if entry.size != len {
                return Err(EcsError::ImageLength {
                    component: entry.name.clone(),
                    expected: entry.size,
                    actual: len,
                });
            }
            Ok(())
        };

        for res in &image.resources {
            check(res.type_id, ComponentKind::Resource, res.bytes.len())?;
        }
        for img in &image.entities {
            for record in &img.records {
                check(record.type_id, ComponentKind::Component, record.len as usize)?;
                let end = record.offset as usize + record.len as usize;
                if end > img.bytes.len() {
                    return Err(EcsError::ImageLength {
                        component: format!("{:?}", record.type_id),
                        expected: end,
                        actual: img.bytes.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
