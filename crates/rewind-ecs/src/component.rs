//! Component and resource type registration.
//!
//! Every type stored in a [`World`](crate::world::World), whether attached to
//! entities or held as a singleton resource, is registered once under a
//! stable name. Registration hands back a [`ComponentTypeId`], a dense index
//! that snapshot records use as their type tag.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EcsError;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Dense identifier of a registered type, assigned in registration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentKind / ComponentInfo
// ---------------------------------------------------------------------------

/// Where values of a registered type live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Zero or one value per entity.
    Component,
    /// Exactly one value per world.
    Resource,
}

/// Metadata about a registered type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentTypeId,
    pub name: String,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    pub kind: ComponentKind,
    pub type_id: TypeId,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Maps Rust types and names to [`ComponentTypeId`]s.
///
/// Registering the same Rust type twice returns the first id. Reusing a name
/// for a different type is an error.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_name: HashMap<String, ComponentTypeId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: 'static>(
        &mut self,
        name: &str,
        kind: ComponentKind,
    ) -> Result<ComponentTypeId, EcsError> {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            let info = &self.infos[existing.index()];
            if info.kind != kind {
                return Err(EcsError::KindMismatch {
                    name: info.name.clone(),
                    registered: info.kind,
                });
            }
            return Ok(existing);
        }
        if self.by_name.contains_key(name) {
            return Err(EcsError::DuplicateName {
                name: name.to_owned(),
            });
        }

        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: name.to_owned(),
            size: std::mem::size_of::<T>(),
            kind,
            type_id: rust_type_id,
        });
        self.by_type.insert(rust_type_id, id);
        self.by_name.insert(name.to_owned(), id);
        tracing::trace!(component = name, id = id.0, ?kind, "registered type");
        Ok(id)
    }

    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Names of all registered types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Pos;
    struct Vel;
    struct Clock;

    #[test]
    fn ids_follow_registration_order() {
        let mut reg = ComponentRegistry::new();
        let p = reg.register::<Pos>("position", ComponentKind::Component).unwrap();
        let v = reg.register::<Vel>("velocity", ComponentKind::Component).unwrap();
        assert_eq!(p.index(), 0);
        assert_eq!(v.index(), 1);
        assert_eq!(reg.lookup::<Vel>(), Some(v));
        assert_eq!(reg.lookup_by_name("position"), Some(p));
    }

    #[test]
    fn reregistering_a_type_returns_existing_id() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register::<Pos>("position", ComponentKind::Component).unwrap();
        let b = reg.register::<Pos>("pos_alias", ComponentKind::Component).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup_by_name("pos_alias"), None);
    }

    #[test]
    fn name_collision_is_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Pos>("thing", ComponentKind::Component).unwrap();
        let err = reg.register::<Vel>("thing", ComponentKind::Component).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateName { .. }), "got {err:?}");
    }

    #[test]
    fn kind_is_fixed_at_first_registration() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Clock>("clock", ComponentKind::Resource).unwrap();
        let err = reg.register::<Clock>("clock", ComponentKind::Component).unwrap_err();
        assert!(matches!(err, EcsError::KindMismatch { .. }), "got {err:?}");
        assert_eq!(reg.registered_names(), vec!["clock"]);
    }
}
