//! The [`World`]: entities, their components, and singleton resources.

use std::any::Any;
use std::collections::BTreeMap;

use crate::component::{ComponentKind, ComponentRegistry, ComponentTypeId};
use crate::entity::{AllocatorState, EntityAllocator, EntityId};
use crate::snapshot::SnapshotRegistry;
use crate::storage::{AnyColumn, Column};
use crate::EcsError;

/// Marker bound for anything the world can store.
pub trait Storable: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Storable for T {}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Top-level container for simulation state.
///
/// Components must be registered before they are attached. Resources are
/// registered on first insert if nobody registered them explicitly.
pub struct World {
    pub(crate) allocator: EntityAllocator,
    pub(crate) registry: ComponentRegistry,
    pub(crate) snapshot_registry: SnapshotRegistry,
    columns: BTreeMap<ComponentTypeId, Box<dyn AnyColumn>>,
    resources: BTreeMap<ComponentTypeId, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_count())
            .field("component_types", &self.columns.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::new(),
            registry: ComponentRegistry::new(),
            snapshot_registry: SnapshotRegistry::default(),
            columns: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn snapshot_registry(&self) -> &SnapshotRegistry {
        &self.snapshot_registry
    }

    /// Register a component type that is not captured by snapshots.
    pub fn register_component<T: Storable>(&mut self, name: &str) -> Result<ComponentTypeId, EcsError> {
        let id = self.registry.register::<T>(name, ComponentKind::Component)?;
        self.columns
            .entry(id)
            .or_insert_with(|| Box::new(Column::<T>::default()));
        Ok(id)
    }

    /// Register a resource type that is not captured by snapshots.
    pub fn register_resource<T: Storable>(&mut self, name: &str) -> Result<ComponentTypeId, EcsError> {
        self.registry.register::<T>(name, ComponentKind::Resource)
    }

    // -- entity lifecycle ---------------------------------------------------

    pub fn spawn(&mut self) -> EntityId {
        self.allocator.allocate()
    }

    /// Despawn `entity` and drop all of its components.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), EcsError> {
        if !self.allocator.deallocate(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        for column in self.columns.values_mut() {
            column.remove_entity(entity);
        }
        Ok(())
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.allocator.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Live entities in ascending order.
    pub fn entities(&self) -> Vec<EntityId> {
        self.allocator.live_entities()
    }

    pub fn allocator_state(&self) -> AllocatorState {
        self.allocator.state()
    }

    /// Replace the allocator with a captured image and drop every component
    /// row whose entity is not alive under it.
    ///
    /// Entities spawned after the image was taken disappear; entities that
    /// were despawned since come back with their original id and no
    /// components until their data is written back.
    pub fn restore_allocator(&mut self, state: &AllocatorState) -> usize {
        self.allocator = EntityAllocator::from_state(state);
        let mut purged = 0;
        for column in self.columns.values_mut() {
            purged += column.retain_alive(&self.allocator);
        }
        if purged > 0 {
            tracing::debug!(purged, "dropped component rows of entities absent from allocator image");
        }
        purged
    }

    // -- component access ---------------------------------------------------

    /// Attach or overwrite a component. Returns the previous value.
    pub fn insert<T: Storable>(&mut self, entity: EntityId, value: T) -> Result<Option<T>, EcsError> {
        if !self.allocator.is_alive(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        let column = self.column_mut_or_err::<T>()?;
        Ok(column.insert(entity, value))
    }

    pub fn remove<T: Storable>(&mut self, entity: EntityId) -> Result<Option<T>, EcsError> {
        if !self.allocator.is_alive(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        let column = self.column_mut_or_err::<T>()?;
        Ok(column.take(entity))
    }

    pub fn get<T: Storable>(&self, entity: EntityId) -> Option<&T> {
        self.column::<T>()?.get(entity)
    }

    pub fn get_mut<T: Storable>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.column_mut::<T>()?.get_mut(entity)
    }

    pub fn has<T: Storable>(&self, entity: EntityId) -> bool {
        self.get::<T>(entity).is_some()
    }

    pub fn column<T: Storable>(&self) -> Option<&Column<T>> {
        let id = self.registry.lookup::<T>()?;
        self.columns.get(&id)?.as_any().downcast_ref::<Column<T>>()
    }

    pub fn column_mut<T: Storable>(&mut self) -> Option<&mut Column<T>> {
        let id = self.registry.lookup::<T>()?;
        self.columns
            .get_mut(&id)?
            .as_any_mut()
            .downcast_mut::<Column<T>>()
    }

    /// Every `(entity, &T)` row in ascending entity order. Empty if `T` was
    /// never registered.
    pub fn query<T: Storable>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.column::<T>().into_iter().flat_map(|c| c.iter())
    }

    pub fn query_mut<T: Storable>(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.column_mut::<T>().into_iter().flat_map(|c| c.iter_mut())
    }

    /// Entities carrying `T`, ascending.
    pub fn entities_with<T: Storable>(&self) -> Vec<EntityId> {
        self.query::<T>().map(|(e, _)| e).collect()
    }

    pub(crate) fn detach_by_id(&mut self, id: ComponentTypeId, entity: EntityId) -> bool {
        self.columns
            .get_mut(&id)
            .is_some_and(|column| column.remove_entity(entity))
    }

    pub(crate) fn has_by_id(&self, id: ComponentTypeId, entity: EntityId) -> bool {
        self.columns
            .get(&id)
            .is_some_and(|column| column.contains(entity))
    }

    fn column_mut_or_err<T: Storable>(&mut self) -> Result<&mut Column<T>, EcsError> {
        let Some(id) = self.registry.lookup::<T>() else {
            return Err(EcsError::UnknownComponent {
                name: std::any::type_name::<T>().to_owned(),
                registered: self.registry.registered_names().join(", "),
            });
        };
        self.columns
            .get_mut(&id)
            .and_then(|c| c.as_any_mut().downcast_mut::<Column<T>>())
            .ok_or_else(|| EcsError::UnknownComponent {
                name: std::any::type_name::<T>().to_owned(),
                registered: String::new(),
            })
    }

    // -- resources ----------------------------------------------------------

    /// Store a singleton, registering its type under its Rust name if needed.
    pub fn insert_resource<T: Storable>(&mut self, value: T) -> Option<T> {
        let id = self.resource_id::<T>();
        self.resources
            .insert(id, Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|prev| *prev)
    }

    pub fn resource<T: Storable>(&self) -> Option<&T> {
        let id = self.registry.lookup::<T>()?;
        self.resources.get(&id)?.downcast_ref::<T>()
    }

    pub fn resource_mut<T: Storable>(&mut self) -> Option<&mut T> {
        let id = self.registry.lookup::<T>()?;
        self.resources.get_mut(&id)?.downcast_mut::<T>()
    }

    pub fn has_resource<T: Storable>(&self) -> bool {
        self.resource::<T>().is_some()
    }

    pub fn remove_resource<T: Storable>(&mut self) -> Option<T> {
        let id = self.registry.lookup::<T>()?;
        let boxed = self.resources.remove(&id)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }

    /// Fetch a singleton, inserting `init()` first if it is missing.
    pub fn resource_or_insert_with<T: Storable>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        let id = self.resource_id::<T>();
        let slot = self
            .resources
            .entry(id)
            .or_insert_with(|| Box::new(init()));
        // Slots are keyed by T's own id, so the downcast cannot miss.
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("resource slot holds a type other than {}", std::any::type_name::<T>()),
        }
    }

    /// Id of `T`, registering it as a resource on first use. A name clash
    /// with an unrelated type falls back to a suffixed name.
    fn resource_id<T: Storable>(&mut self) -> ComponentTypeId {
        if let Some(id) = self.registry.lookup::<T>() {
            return id;
        }
        let base = std::any::type_name::<T>();
        let mut attempt = 0usize;
        loop {
            let name = if attempt == 0 {
                base.to_owned()
            } else {
                format!("{base}#{attempt}")
            };
            match self.registry.register::<T>(&name, ComponentKind::Resource) {
                Ok(id) => return id,
                Err(_) => attempt += 1,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
