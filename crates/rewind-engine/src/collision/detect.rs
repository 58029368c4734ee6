//! Candidate collection and ordering.
//!
//! Every dynamic collider is tested against every static collider and every
//! other dynamic collider, each unordered pair exactly once. Candidates come
//! out as [`CollisionEvent`]s seen from side A, where A is the dynamic
//! entity of a dynamic/static pair and the lower-indexed entity of a
//! dynamic/dynamic pair.

use std::cmp::Ordering;

use rewind_ecs::prelude::*;

use crate::components::{
    CollisionBounds, CollisionEvent, CollisionResponse, LayerMatrix, StaticCollider, Transform,
    ALL_LAYERS,
};

/// World-space box and filtering data for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collider {
    pub entity: EntityId,
    pub center: FxVec3,
    pub min: FxVec3,
    pub max: FxVec3,
    pub tolerance: Fx,
    pub layer: u32,
    pub collides_with: u32,
}

impl Collider {
    pub fn new(entity: EntityId, position: FxVec3, bounds: &CollisionBounds) -> Self {
        let center = position + bounds.offset;
        let half = bounds.half_extents();
        Self {
            entity,
            center,
            min: center - half,
            max: center + half,
            tolerance: bounds.tolerance,
            layer: 1,
            collides_with: ALL_LAYERS,
        }
    }

    pub fn with_layers(mut self, layer: u32, collides_with: u32) -> Self {
        self.layer = layer;
        self.collides_with = collides_with;
        self
    }
}

/// Colliders split by role, each list in ascending entity order.
#[derive(Debug, Clone, Default)]
pub struct ColliderSet {
    pub dynamic: Vec<Collider>,
    pub statics: Vec<Collider>,
}

/// Collect colliders from the world.
///
/// Dynamic: bounds, response and transform, without a set static flag.
/// Static: bounds and transform with a set static flag. A static without a
/// response sits on layer 1 and accepts every layer.
pub fn gather_colliders(world: &World) -> ColliderSet {
    let mut set = ColliderSet::default();
    for (entity, bounds) in world.query::<CollisionBounds>() {
        let Some(transform) = world.get::<Transform>(entity) else {
            continue;
        };
        let collider = Collider::new(entity, transform.position, bounds);
        let response = world.get::<CollisionResponse>(entity);
        let is_static = world
            .get::<StaticCollider>(entity)
            .is_some_and(StaticCollider::is_static);

        match (is_static, response) {
            (true, Some(r)) => set.statics.push(collider.with_layers(r.layer, r.collides_with)),
            (true, None) => set.statics.push(collider),
            (false, Some(r)) => set.dynamic.push(collider.with_layers(r.layer, r.collides_with)),
            (false, None) => {}
        }
    }
    set
}

/// Layer filter: the matrix and the per-entity masks must both permit the
/// pair, each as a symmetric OR.
pub fn layers_permit(matrix: &LayerMatrix, a: &Collider, b: &Collider) -> bool {
    matrix.allows(a.layer, b.layer)
        && (a.collides_with & b.layer != 0 || b.collides_with & a.layer != 0)
}

/// Box overlap test. On a hit, returns the contact from `a`'s side: the
/// normal pushes `a` out of `b` along the axis of least overlap.
///
/// Every axis must overlap by more than the larger of the two tolerances;
/// touching boxes do not collide. Ties on the least-overlap axis resolve to
/// x, then y, then z. When the centres coincide on that axis the entity with
/// the lower index takes the negative side.
pub fn overlap(a: &Collider, b: &Collider) -> Option<CollisionEvent> {
    let tolerance = a.tolerance.max(b.tolerance);
    let lo = a.min.max(b.min);
    let hi = a.max.min(b.max);
    let extent = hi - lo;

    let mut axis = 0;
    for i in 0..3 {
        if extent.get(i) <= tolerance {
            return None;
        }
        if extent.get(i) < extent.get(axis) {
            axis = i;
        }
    }

    let negative = match a.center.get(axis).cmp(&b.center.get(axis)) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => a.entity.index() < b.entity.index(),
    };

    Some(CollisionEvent {
        entity: a.entity,
        other: b.entity,
        point: (lo + hi) * Fx::HALF,
        normal: FxVec3::axis(axis, negative),
        depth: extent.get(axis),
        layer: a.layer,
        other_layer: b.layer,
    })
}

/// Run the pair tests. The result is unordered; pass it through
/// [`sort_candidates`] before use.
pub fn detect(set: &ColliderSet, matrix: &LayerMatrix) -> Vec<CollisionEvent> {
    let mut candidates = Vec::new();

    for a in &set.dynamic {
        for b in &set.statics {
            if layers_permit(matrix, a, b) {
                candidates.extend(overlap(a, b));
            }
        }
    }

    for (i, first) in set.dynamic.iter().enumerate() {
        for second in &set.dynamic[i + 1..] {
            let (a, b) = if first.entity.index() <= second.entity.index() {
                (first, second)
            } else {
                (second, first)
            };
            if layers_permit(matrix, a, b) {
                candidates.extend(overlap(a, b));
            }
        }
    }

    candidates
}

/// Total order: A index, B index, depth descending, then generations.
pub fn candidate_order(x: &CollisionEvent, y: &CollisionEvent) -> Ordering {
    x.entity
        .index()
        .cmp(&y.entity.index())
        .then(x.other.index().cmp(&y.other.index()))
        .then(y.depth.cmp(&x.depth))
        .then(x.entity.generation().cmp(&y.entity.generation()))
        .then(x.other.generation().cmp(&y.other.generation()))
}

pub fn sort_candidates(candidates: &mut [CollisionEvent]) {
    candidates.sort_by(candidate_order);
}

/// Gather, test and sort in one call.
pub fn detect_candidates(world: &World) -> Vec<CollisionEvent> {
    let default_matrix = LayerMatrix::default();
    let matrix = world.resource::<LayerMatrix>().unwrap_or(&default_matrix);
    let mut candidates = detect(&gather_colliders(world), matrix);
    sort_candidates(&mut candidates);
    candidates
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
