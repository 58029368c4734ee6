//! Per-event response application.

use rewind_ecs::prelude::*;

use crate::components::{CollisionEvent, Movement, ResponseKind, Transform};

/// Apply one contact to a dynamic entity.
///
/// `rest_speed_sq` is the squared speed below which a stopped entity comes
/// to rest. An entity without [`Movement`] is only pushed out.
pub fn apply_response(
    kind: ResponseKind,
    event: &CollisionEvent,
    transform: &mut Transform,
    movement: Option<&mut Movement>,
    bounciness: Fx,
    friction: Fx,
    rest_speed_sq: Fx,
) {
    let n = event.normal;
    match kind {
        ResponseKind::None => {}
        ResponseKind::Destroy => {
            if let Some(m) = movement {
                m.halt();
            }
        }
        ResponseKind::Stop => {
            transform.position += n * event.depth;
            if let Some(m) = movement {
                remove_inward(&mut m.velocity, n);
                if m.velocity.length_squared() < rest_speed_sq {
                    m.halt();
                }
            }
        }
        ResponseKind::Slide => {
            transform.position += n * event.depth;
            if let Some(m) = movement {
                remove_inward(&mut m.velocity, n);
                let normal_part = n * m.velocity.dot(n);
                let tangent = m.velocity - normal_part;
                m.velocity = normal_part + tangent * (Fx::ONE - friction);
            }
        }
        ResponseKind::Bounce => {
            transform.position += n * event.depth;
            if let Some(m) = movement {
                let vn = m.velocity.dot(n);
                if vn.is_negative() {
                    m.velocity -= n * (vn * (Fx::ONE + bounciness));
                }
            }
        }
    }
}

/// Drop the velocity component heading into the surface.
fn remove_inward(velocity: &mut FxVec3, normal: FxVec3) {
    let vn = velocity.dot(normal);
    if vn.is_negative() {
        *velocity -= normal * vn;
    }
}
