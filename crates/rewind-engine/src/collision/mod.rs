//! Collision pipeline: Detect, Sort, Resolve, Persist-contacts.
//!
//! One pass per tick, after movement:
//!
//! 1. **Detect** ([`detect`]) gathers dynamic and static colliders and runs
//!    the AABB pair tests.
//! 2. **Sort** orders candidates by `(A index, B index, depth desc)` with
//!    generations as the final tie-break, so the result never depends on the
//!    order the candidates were produced in.
//! 3. **Resolve** drops candidates past the per-tick cap, fills both
//!    entities' [`CollisionEvents`] buffers, and applies each dynamic
//!    entity's [`CollisionResponse`] once per buffered event
//!    ([`response`]). [`CollisionState`] is then updated ([`grounding`]).
//! 4. **Persist** copies every event buffer into [`CollisionContacts`].
//!
//! Event and contact buffers are plain components outside the snapshot
//! table; the tick loop clears them after a rollback.

pub mod detect;
pub mod grounding;
pub mod response;

use rewind_ecs::prelude::*;
use serde::Serialize;

use crate::components::{
    CollisionContacts, CollisionEvent, CollisionEvents, CollisionResponse, CollisionState,
    LayerMatrix, Movement, Transform,
};
use crate::config::CollisionConfig;

pub use detect::{detect_candidates, sort_candidates, Collider, ColliderSet};
pub use grounding::GroundRules;

/// System name reported in tick diagnostics.
pub const COLLISION_SYSTEM_NAME: &str = "collision";

// ---------------------------------------------------------------------------
// Settings / stats
// ---------------------------------------------------------------------------

/// [`CollisionConfig`] converted to fixed point for a given tick length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionSettings {
    pub max_collisions_per_tick: usize,
    pub event_capacity: usize,
    pub contact_capacity: usize,
    pub ground: GroundRules,
    pub rest_speed_sq: Fx,
    pub dt: Fx,
}

impl CollisionSettings {
    pub fn new(config: &CollisionConfig, dt: Fx) -> Self {
        let rest = Fx::from_f64(config.rest_speed_epsilon);
        Self {
            max_collisions_per_tick: config.max_collisions_per_tick,
            event_capacity: config.event_capacity,
            contact_capacity: config.contact_capacity,
            ground: GroundRules {
                slope_threshold: Fx::from_f64(config.slope_threshold),
                grace: dt.mul_int(i64::from(config.grounded_grace_ticks)),
            },
            rest_speed_sq: rest * rest,
            dt,
        }
    }
}

impl Default for CollisionSettings {
    fn default() -> Self {
        Self::new(&CollisionConfig::default(), Fx::from_ratio(1, 60))
    }
}

/// Counters from one collision pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollisionStats {
    /// Candidates produced by detection.
    pub candidates: usize,
    /// Candidates cut by the per-tick cap.
    pub dropped: usize,
    /// Events written into buffers, both sides counted.
    pub events: usize,
    /// Events lost to full buffers.
    pub overflowed: usize,
    /// Response applications.
    pub responses: usize,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the full pass for `tick`.
pub fn run_collision(world: &mut World, tick: u64, settings: &CollisionSettings) -> CollisionStats {
    let colliders = detect::gather_colliders(world);
    let default_matrix = LayerMatrix::default();
    let matrix = world.resource::<LayerMatrix>().unwrap_or(&default_matrix);
    let candidates = detect::detect(&colliders, matrix);
    let dynamic: Vec<EntityId> = colliders.dynamic.iter().map(|c| c.entity).collect();
    resolve(world, &dynamic, candidates, tick, settings)
}

/// Sort, resolve and persist an externally produced candidate list. The
/// input order does not matter.
pub fn resolve_candidates(
    world: &mut World,
    candidates: Vec<CollisionEvent>,
    tick: u64,
    settings: &CollisionSettings,
) -> CollisionStats {
    let dynamic: Vec<EntityId> = detect::gather_colliders(world)
        .dynamic
        .iter()
        .map(|c| c.entity)
        .collect();
    resolve(world, &dynamic, candidates, tick, settings)
}

fn resolve(
    world: &mut World,
    dynamic: &[EntityId],
    mut candidates: Vec<CollisionEvent>,
    tick: u64,
    settings: &CollisionSettings,
) -> CollisionStats {
    sort_candidates(&mut candidates);
    let mut stats = CollisionStats {
        candidates: candidates.len(),
        ..CollisionStats::default()
    };
    if candidates.len() > settings.max_collisions_per_tick {
        stats.dropped = candidates.len() - settings.max_collisions_per_tick;
        tracing::debug!(
            tick,
            kept = settings.max_collisions_per_tick,
            dropped = stats.dropped,
            "collision candidates truncated"
        );
        candidates.truncate(settings.max_collisions_per_tick);
    }

    clear_events(world);
    for &entity in dynamic {
        if !world.has::<CollisionEvents>(entity) {
            insert_or_warn(world, entity, CollisionEvents::default());
        }
    }
    for candidate in &candidates {
        for event in [*candidate, candidate.mirrored()] {
            if push_event(world, event, settings.event_capacity) {
                stats.events += 1;
            } else {
                stats.overflowed += 1;
            }
        }
    }

    for &entity in dynamic {
        stats.responses += respond(world, entity, tick, settings);
    }

    persist_contacts(world, settings.contact_capacity);

    tracing::trace!(
        tick,
        candidates = stats.candidates,
        events = stats.events,
        responses = stats.responses,
        "collision pass"
    );
    stats
}

/// Apply every buffered event to one dynamic entity and update its
/// [`CollisionState`]. Returns the number of events applied.
fn respond(world: &mut World, entity: EntityId, tick: u64, settings: &CollisionSettings) -> usize {
    let events = world
        .get::<CollisionEvents>(entity)
        .map(|buffer| buffer.0.clone())
        .unwrap_or_default();
    let (Some(response), Some(mut transform)) = (
        world.get::<CollisionResponse>(entity).copied(),
        world.get::<Transform>(entity).copied(),
    ) else {
        return 0;
    };
    let mut movement = world.get::<Movement>(entity).copied();

    for event in &events {
        response::apply_response(
            response.kind(),
            event,
            &mut transform,
            movement.as_mut(),
            response.bounciness,
            response.friction,
            settings.rest_speed_sq,
        );
    }

    if let Some(slot) = world.get_mut::<Transform>(entity) {
        *slot = transform;
    }
    if let (Some(updated), Some(slot)) = (movement, world.get_mut::<Movement>(entity)) {
        *slot = updated;
    }

    if !world.has::<CollisionState>(entity) {
        insert_or_warn(world, entity, CollisionState::default());
    }
    if let Some(state) = world.get_mut::<CollisionState>(entity) {
        grounding::record_penetration(state, &events);
        grounding::update_ground_state(state, &events, settings.ground, settings.dt);
        state.last_position = transform.position;
        state.last_velocity = movement.map_or(FxVec3::ZERO, |m| m.velocity);
        state.last_tick = tick;
    }
    events.len()
}

fn push_event(world: &mut World, event: CollisionEvent, capacity: usize) -> bool {
    if let Some(buffer) = world.get_mut::<CollisionEvents>(event.entity) {
        if buffer.0.len() >= capacity {
            return false;
        }
        buffer.0.push(event);
        return true;
    }
    world
        .insert(event.entity, CollisionEvents(vec![event]))
        .is_ok()
}

fn clear_events(world: &mut World) {
    if let Some(column) = world.column_mut::<CollisionEvents>() {
        for (_, buffer) in column.iter_mut() {
            buffer.0.clear();
        }
    }
}

fn persist_contacts(world: &mut World, capacity: usize) {
    let lists: Vec<(EntityId, Vec<CollisionEvent>)> = world
        .query::<CollisionEvents>()
        .map(|(entity, events)| (entity, events.0.iter().take(capacity).copied().collect()))
        .collect();

    if let Some(column) = world.column_mut::<CollisionContacts>() {
        for (_, contacts) in column.iter_mut() {
            contacts.0.clear();
        }
    }
    for (entity, list) in lists {
        match world.get_mut::<CollisionContacts>(entity) {
            Some(contacts) => contacts.0 = list,
            None => insert_or_warn(world, entity, CollisionContacts(list)),
        }
    }
}

/// Empty every event and contact buffer. Used after a rollback, since the
/// buffers are not part of the snapshot.
pub fn clear_collision_buffers(world: &mut World) {
    clear_events(world);
    if let Some(column) = world.column_mut::<CollisionContacts>() {
        for (_, contacts) in column.iter_mut() {
            contacts.0.clear();
        }
    }
}

fn insert_or_warn<T: Storable>(world: &mut World, entity: EntityId, value: T) {
    if let Err(err) = world.insert(entity, value) {
        tracing::warn!(%entity, %err, "collision buffer insert failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{register_engine_types, CollisionBounds, ResponseKind, StaticCollider};

    fn world() -> World {
        let mut world = World::new();
        register_engine_types(&mut world).unwrap();
        world.insert_resource(LayerMatrix::default());
        world
    }

    fn unit_box(world: &mut World, at: FxVec3, velocity: FxVec3, kind: ResponseKind) -> EntityId {
        let e = world.spawn();
        world.insert(e, Transform::from_position(at)).unwrap();
        world.insert(e, Movement::new(velocity)).unwrap();
        world.insert(e, CollisionBounds::default()).unwrap();
        world.insert(e, CollisionResponse::new(kind)).unwrap();
        e
    }

    fn wall(world: &mut World, at: FxVec3, size: FxVec3) -> EntityId {
        let e = world.spawn();
        world.insert(e, Transform::from_position(at)).unwrap();
        world.insert(e, CollisionBounds::new(size)).unwrap();
        world.insert(e, StaticCollider::STATIC).unwrap();
        e
    }

    #[test]
    fn stop_separates_overlapping_unit_boxes() {
        let mut w = world();
        let a = unit_box(&mut w, FxVec3::ZERO, FxVec3::X, ResponseKind::Stop);
        let b = wall(&mut w, FxVec3::new(Fx::HALF, Fx::ZERO, Fx::ZERO), FxVec3::ONE);

        let stats = run_collision(&mut w, 1, &CollisionSettings::default());
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.events, 2);

        let pos = w.get::<Transform>(a).unwrap().position;
        assert_eq!(pos.x, -Fx::HALF);
        assert!(w.get::<Movement>(a).unwrap().velocity.x.is_zero());

        // Zero overlap now: the boxes touch and no longer collide.
        let stats = run_collision(&mut w, 2, &CollisionSettings::default());
        assert_eq!(stats.candidates, 0);
        assert_eq!(w.get::<Transform>(b).unwrap().position.x, Fx::HALF);
    }

    #[test]
    fn both_sides_receive_mirrored_events_and_contacts_persist() {
        let mut w = world();
        let a = unit_box(&mut w, FxVec3::ZERO, FxVec3::ZERO, ResponseKind::None);
        let b = wall(&mut w, FxVec3::new(Fx::HALF, Fx::ZERO, Fx::ZERO), FxVec3::ONE);

        run_collision(&mut w, 1, &CollisionSettings::default());
        let ea = w.get::<CollisionEvents>(a).unwrap().0.clone();
        let eb = w.get::<CollisionEvents>(b).unwrap().0.clone();
        assert_eq!(ea.len(), 1);
        assert_eq!(eb, vec![ea[0].mirrored()]);
        assert_eq!(w.get::<CollisionContacts>(a).unwrap().0, ea);

        // None: trigger only.
        assert_eq!(w.get::<Transform>(a).unwrap().position, FxVec3::ZERO);

        w.get_mut::<Transform>(a).unwrap().position = FxVec3::splat(Fx::from_int(10));
        run_collision(&mut w, 2, &CollisionSettings::default());
        assert!(w.get::<CollisionEvents>(a).unwrap().0.is_empty());
        assert!(w.get::<CollisionContacts>(a).unwrap().0.is_empty());
        assert!(w.get::<CollisionContacts>(b).unwrap().0.is_empty());
    }

    #[test]
    fn candidate_cap_and_buffer_capacity_truncate() {
        let mut w = world();
        let floor = wall(
            &mut w,
            FxVec3::ZERO,
            FxVec3::new(Fx::from_int(100), Fx::ONE, Fx::from_int(100)),
        );
        for i in 0..6 {
            unit_box(
                &mut w,
                FxVec3::new(Fx::from_int(i * 3), Fx::HALF, Fx::ZERO),
                FxVec3::ZERO,
                ResponseKind::Stop,
            );
        }

        let mut settings = CollisionSettings::default();
        settings.max_collisions_per_tick = 4;
        settings.event_capacity = 3;
        let stats = run_collision(&mut w, 1, &settings);
        assert_eq!(stats.candidates, 6);
        assert_eq!(stats.dropped, 2);
        // Four dynamic-side events fit; the floor keeps three of its four.
        assert_eq!(stats.events, 7);
        assert_eq!(stats.overflowed, 1);
        assert_eq!(w.get::<CollisionEvents>(floor).unwrap().0.len(), 3);
    }

    #[test]
    fn landing_on_the_floor_grounds_the_entity() {
        let mut w = world();
        let body = unit_box(
            &mut w,
            FxVec3::new(Fx::ZERO, Fx::from_ratio(9, 10), Fx::ZERO),
            -FxVec3::UP,
            ResponseKind::Stop,
        );
        wall(&mut w, FxVec3::ZERO, FxVec3::new(Fx::from_int(10), Fx::ONE, Fx::from_int(10)));

        run_collision(&mut w, 7, &CollisionSettings::default());
        let state = *w.get::<CollisionState>(body).unwrap();
        assert!(state.is_grounded());
        assert_eq!(state.ground_normal, FxVec3::UP);
        assert_eq!(state.last_tick, 7);
        assert_eq!(state.last_position.y, Fx::ONE);
        assert!(w.get::<Movement>(body).unwrap().velocity.is_zero());
    }

    #[test]
    fn clearing_buffers_empties_events_and_contacts() {
        let mut w = world();
        let a = unit_box(&mut w, FxVec3::ZERO, FxVec3::ZERO, ResponseKind::Stop);
        wall(&mut w, FxVec3::new(Fx::HALF, Fx::ZERO, Fx::ZERO), FxVec3::ONE);
        run_collision(&mut w, 1, &CollisionSettings::default());
        assert!(!w.get::<CollisionContacts>(a).unwrap().0.is_empty());

        clear_collision_buffers(&mut w);
        assert!(w.get::<CollisionEvents>(a).unwrap().0.is_empty());
        assert!(w.get::<CollisionContacts>(a).unwrap().0.is_empty());
    }
}
