//! Rewind Engine -- fixed-tick simulation core with rollback.
//!
//! Built on [`rewind_ecs`]: a fixed-timestep [`TickLoop`](tick::TickLoop)
//! that runs user systems, gravity, movement and an AABB collision pipeline
//! every tick, snapshots the world after each one, and can restore any tick
//! inside the rollback window and re-simulate forward with the retained
//! inputs. All simulation math is fixed point, so identical inputs give
//! bit-identical state hashes.
//!
//! # Quick Start
//!
//! ```
//! use rewind_engine::prelude::*;
//!
//! let mut world = World::new();
//! register_engine_types(&mut world).unwrap();
//!
//! let ball = world.spawn();
//! world.insert(ball, Transform::from_position(FxVec3::new(Fx::ZERO, Fx::from_int(3), Fx::ZERO))).unwrap();
//! world.insert(ball, Movement::default()).unwrap();
//! world.insert(ball, Physics::default()).unwrap();
//! world.insert(ball, CollisionBounds::default()).unwrap();
//! world.insert(ball, CollisionResponse::new(ResponseKind::Stop)).unwrap();
//!
//! let floor = world.spawn();
//! world.insert(floor, Transform::default()).unwrap();
//! world.insert(floor, CollisionBounds::new(FxVec3::new(Fx::from_int(20), Fx::ONE, Fx::from_int(20)))).unwrap();
//! world.insert(floor, StaticCollider::STATIC).unwrap();
//!
//! let mut tick_loop = TickLoop::new(world, EngineConfig::default()).unwrap();
//! tick_loop.run_ticks(120);
//!
//! let state = tick_loop.world().get::<CollisionState>(ball).unwrap();
//! assert!(state.is_grounded());
//! ```

#![deny(unsafe_code)]

pub mod collision;
pub mod components;
pub mod config;
pub mod movement;
pub mod physics;
pub mod snapshot;
pub mod tick;

/// Re-export the ECS crate for convenience.
pub use rewind_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from building a tick loop.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("engine type registration failed: {0}")]
    Registration(#[from] rewind_ecs::EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use rewind_ecs::prelude::*;

    pub use crate::collision::{
        run_collision, CollisionSettings, CollisionStats, COLLISION_SYSTEM_NAME,
    };
    pub use crate::components::{
        register_engine_types, CollisionBounds, CollisionContacts, CollisionEvent,
        CollisionEvents, CollisionResponse, CollisionState, GlobalGravity, LayerMatrix, Movement,
        Physics, ResponseKind, SimulationTime, StaticCollider, Transform, ALL_LAYERS,
    };
    pub use crate::config::{CollisionConfig, ConfigError, EngineConfig};
    pub use crate::movement::{integrate_movement, MOVEMENT_SYSTEM_NAME};
    pub use crate::physics::{integrate_gravity, PHYSICS_SYSTEM_NAME};
    pub use crate::snapshot::{
        decode_history, encode_history, SnapshotError, SnapshotHistory, TickSnapshot,
    };
    pub use crate::tick::{
        FrameReport, InputFrame, PlayerInput, RollbackError, RollbackReport, ScheduleError,
        SystemFn, TickContext, TickDiagnostics, TickLoop,
    };
    pub use crate::EngineError;
}
