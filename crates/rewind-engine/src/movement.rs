//! Position integration from velocity.

use rewind_ecs::prelude::*;

use crate::components::{Movement, StaticCollider, Transform};

pub const MOVEMENT_SYSTEM_NAME: &str = "movement";

/// Advance `position += velocity * dt` for every non-static entity with
/// [`Transform`] and [`Movement`], and refresh the moving flag. Returns the
/// number of entities visited.
pub fn integrate_movement(world: &mut World, dt: Fx) -> usize {
    let mut steps: Vec<(EntityId, FxVec3)> = Vec::new();
    if let Some(column) = world.column_mut::<Movement>() {
        for (entity, movement) in column.iter_mut() {
            movement.set_moving(!movement.velocity.is_zero());
            steps.push((entity, movement.velocity * dt));
        }
    }

    let mut moved = 0;
    for (entity, delta) in steps {
        if world
            .get::<StaticCollider>(entity)
            .is_some_and(StaticCollider::is_static)
        {
            continue;
        }
        if let Some(transform) = world.get_mut::<Transform>(entity) {
            transform.position += delta;
            moved += 1;
        }
    }
    moved
}
