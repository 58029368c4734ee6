//! Grounded/airborne tracking.

use rewind_ecs::prelude::*;

use crate::components::{CollisionEvent, CollisionState};

/// Thresholds for ground detection, already in fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundRules {
    /// Minimum `normal.y` of a walkable contact.
    pub slope_threshold: Fx,
    /// Airborne time after which the grounded flag drops.
    pub grace: Fx,
}

/// The walkable contact with the largest up component, if any clears the
/// slope threshold. Earlier events win ties.
pub fn best_ground_contact<'a>(
    events: &'a [CollisionEvent],
    slope_threshold: Fx,
) -> Option<&'a CollisionEvent> {
    let mut best: Option<&CollisionEvent> = None;
    for event in events {
        if event.normal.y <= slope_threshold {
            continue;
        }
        if best.map_or(true, |b| event.normal.y > b.normal.y) {
            best = Some(event);
        }
    }
    best
}

/// Fold this tick's contacts into `state`.
///
/// A walkable contact grounds the entity and resets the airborne timer.
/// Otherwise the timer advances by `dt`, and once it passes the grace period
/// the entity is airborne and its ground normal returns to straight up.
pub fn update_ground_state(
    state: &mut CollisionState,
    events: &[CollisionEvent],
    rules: GroundRules,
    dt: Fx,
) {
    match best_ground_contact(events, rules.slope_threshold) {
        Some(contact) => {
            state.set_grounded(true);
            state.ground_normal = contact.normal;
            state.ground_point = contact.point;
            state.time_since_grounded = Fx::ZERO;
        }
        None => {
            state.time_since_grounded += dt;
            if state.time_since_grounded > rules.grace {
                state.set_grounded(false);
                state.ground_normal = FxVec3::UP;
            }
        }
    }
}

/// Record the deepest contact of the tick, or clear the penetration fields
/// when there was none.
pub fn record_penetration(state: &mut CollisionState, events: &[CollisionEvent]) {
    let mut deepest: Option<&CollisionEvent> = None;
    for event in events {
        if deepest.map_or(true, |d| event.depth > d.depth) {
            deepest = Some(event);
        }
    }
    match deepest {
        Some(event) => {
            state.penetration_depth = event.depth;
            state.penetration_normal = event.normal;
        }
        None => {
            state.penetration_depth = Fx::ZERO;
            state.penetration_normal = FxVec3::ZERO;
        }
    }
}
