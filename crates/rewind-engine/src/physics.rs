//! Gravity integration.
//!
//! Semi-implicit Euler: this pass only changes velocity, and
//! [`movement`](crate::movement) advances positions from the result. An
//! entity takes part when it carries both [`Physics`] and [`Movement`], is
//! affected by gravity, and is not marked static.
//!
//! ```text
//! a = (override or global gravity) * gravity_scale * mass
//! v += a * dt
//! |v| <= terminal_velocity   (when terminal_velocity > 0)
//! ```

use rewind_ecs::prelude::*;

use crate::components::{GlobalGravity, Movement, Physics, StaticCollider};

/// System name reported in tick diagnostics.
pub const PHYSICS_SYSTEM_NAME: &str = "physics";

/// Integrate gravity into velocities. Returns the number of entities
/// updated.
pub fn integrate_gravity(world: &mut World, dt: Fx) -> usize {
    let global = world
        .resource::<GlobalGravity>()
        .map_or(FxVec3::ZERO, GlobalGravity::effective);

    let updates: Vec<(EntityId, FxVec3, Fx)> = world
        .query::<Physics>()
        .filter(|(_, physics)| physics.affected_by_gravity())
        .map(|(entity, physics)| {
            let gravity = physics.gravity_override().unwrap_or(global);
            let accel = gravity * physics.gravity_scale * physics.mass;
            (entity, accel * dt, physics.terminal_velocity)
        })
        .collect();

    let mut updated = 0;
    for (entity, dv, terminal) in updates {
        if world
            .get::<StaticCollider>(entity)
            .is_some_and(StaticCollider::is_static)
        {
            continue;
        }
        let Some(movement) = world.get_mut::<Movement>(entity) else {
            continue;
        };
        let mut velocity = movement.velocity + dv;
        if terminal.is_positive() {
            velocity = velocity.clamp_length(terminal);
        }
        movement.velocity = velocity;
        updated += 1;
    }
    updated
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
