//! Simulation components and singleton resources.
//!
//! Every type here that takes part in rollback is `#[repr(C)]` plain data
//! deriving [`bytemuck::Pod`], with explicit padding fields so the layout has
//! no implicit gaps. Padding fields are private, so these types are built
//! through constructors or `Default` rather than struct literals.
//!
//! Restore priorities (lower first):
//!
//! | Priority | Type |
//! |---|---|
//! | 0 | [`SimulationTime`] |
//! | 5 | [`GlobalGravity`], [`LayerMatrix`] |
//! | 10 | [`Physics`] |
//! | 15 | [`StaticCollider`] |
//! | 20 | [`CollisionBounds`] |
//! | 25 | [`CollisionResponse`] |
//! | 30 | [`Movement`] |
//! | 35 | [`Transform`] |
//! | 40 | [`CollisionState`] |
//!
//! Game-specific snapshotable types should use priorities of 100 and above.

use bytemuck::{Pod, Zeroable};
use rewind_ecs::prelude::*;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Transform / Movement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    pub position: FxVec3,
    pub rotation: FxQuat,
    pub scale: FxVec3,
}

impl Transform {
    pub fn from_position(position: FxVec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: FxVec3::ZERO,
            rotation: FxQuat::IDENTITY,
            scale: FxVec3::ONE,
        }
    }
}

impl Snapshotable for Transform {
    const PRIORITY: i32 = 35;

    fn validate(&self) -> Result<(), String> {
        if self.rotation.length_squared().is_zero() {
            return Err("rotation quaternion is zero".to_owned());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Movement {
    pub velocity: FxVec3,
    moving: u32,
    _pad: u32,
}

impl Movement {
    pub fn new(velocity: FxVec3) -> Self {
        Self {
            velocity,
            moving: u32::from(!velocity.is_zero()),
            _pad: 0,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.moving != 0
    }

    pub fn set_moving(&mut self, moving: bool) {
        self.moving = u32::from(moving);
    }

    /// Zero the velocity and clear the moving flag.
    pub fn halt(&mut self) {
        self.velocity = FxVec3::ZERO;
        self.moving = 0;
    }
}

impl Snapshotable for Movement {
    const PRIORITY: i32 = 30;
}

// ---------------------------------------------------------------------------
// Physics
// ---------------------------------------------------------------------------

/// Per-entity gravity parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Physics {
    pub gravity_override: FxVec3,
    pub mass: Fx,
    pub gravity_scale: Fx,
    /// Maximum speed after integration. Zero means unlimited.
    pub terminal_velocity: Fx,
    affected_by_gravity: u8,
    use_gravity_override: u8,
    _pad: [u8; 6],
}

impl Default for Physics {
    fn default() -> Self {
        Self {
            gravity_override: FxVec3::ZERO,
            mass: Fx::ONE,
            gravity_scale: Fx::ONE,
            terminal_velocity: Fx::ZERO,
            affected_by_gravity: 1,
            use_gravity_override: 0,
            _pad: [0; 6],
        }
    }
}

impl Physics {
    pub fn with_terminal_velocity(mut self, terminal_velocity: Fx) -> Self {
        self.terminal_velocity = terminal_velocity;
        self
    }

    pub fn with_mass(mut self, mass: Fx) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_gravity_scale(mut self, scale: Fx) -> Self {
        self.gravity_scale = scale;
        self
    }

    pub fn with_gravity_override(mut self, gravity: FxVec3) -> Self {
        self.gravity_override = gravity;
        self.use_gravity_override = 1;
        self
    }

    pub fn exempt(mut self) -> Self {
        self.affected_by_gravity = 0;
        self
    }

    pub fn affected_by_gravity(&self) -> bool {
        self.affected_by_gravity != 0
    }

    /// The override vector, if one is in use.
    pub fn gravity_override(&self) -> Option<FxVec3> {
        (self.use_gravity_override != 0).then_some(self.gravity_override)
    }
}

impl Snapshotable for Physics {
    const PRIORITY: i32 = 10;

    fn validate(&self) -> Result<(), String> {
        if !self.mass.is_positive() {
            return Err(format!("mass must be positive, got {}", self.mass));
        }
        if self.terminal_velocity.is_negative() {
            return Err(format!("terminal velocity is negative: {}", self.terminal_velocity));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collision components
// ---------------------------------------------------------------------------

/// Axis-aligned box centred on `Transform::position + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CollisionBounds {
    pub size: FxVec3,
    pub offset: FxVec3,
    /// Penetration up to this depth on every axis is ignored.
    pub tolerance: Fx,
}

impl CollisionBounds {
    pub fn new(size: FxVec3) -> Self {
        Self {
            size,
            offset: FxVec3::ZERO,
            tolerance: Fx::ZERO,
        }
    }

    pub fn cube(edge: Fx) -> Self {
        Self::new(FxVec3::splat(edge))
    }

    pub fn half_extents(&self) -> FxVec3 {
        self.size * Fx::HALF
    }
}

impl Default for CollisionBounds {
    fn default() -> Self {
        Self::cube(Fx::ONE)
    }
}

impl Snapshotable for CollisionBounds {
    const PRIORITY: i32 = 20;

    fn validate(&self) -> Result<(), String> {
        let s = self.size;
        if !(s.x.is_positive() && s.y.is_positive() && s.z.is_positive()) {
            return Err(format!("bounds size must be positive on every axis, got {s:?}"));
        }
        Ok(())
    }
}

/// How a dynamic entity reacts to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u8)]
pub enum ResponseKind {
    /// Trigger semantics: events fire, nothing moves.
    None = 0,
    #[default]
    Stop = 1,
    Slide = 2,
    Bounce = 3,
    Destroy = 4,
}

impl ResponseKind {
    /// Unknown tags decode as [`ResponseKind::None`].
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => Self::Stop,
            2 => Self::Slide,
            3 => Self::Bounce,
            4 => Self::Destroy,
            _ => Self::None,
        }
    }
}

/// All layer bits.
pub const ALL_LAYERS: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CollisionResponse {
    /// In `[0, 1]`.
    pub bounciness: Fx,
    /// In `[0, 1]`.
    pub friction: Fx,
    /// Layer bits this entity occupies.
    pub layer: u32,
    /// Layer bits this entity wants to hit.
    pub collides_with: u32,
    kind: u8,
    _pad: [u8; 7],
}

impl CollisionResponse {
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            bounciness: Fx::ZERO,
            friction: Fx::ZERO,
            layer: 1,
            collides_with: ALL_LAYERS,
            kind: kind as u8,
            _pad: [0; 7],
        }
    }

    pub fn with_layers(mut self, layer: u32, collides_with: u32) -> Self {
        self.layer = layer;
        self.collides_with = collides_with;
        self
    }

    pub fn with_bounciness(mut self, bounciness: Fx) -> Self {
        self.bounciness = bounciness;
        self
    }

    pub fn with_friction(mut self, friction: Fx) -> Self {
        self.friction = friction;
        self
    }

    pub fn kind(&self) -> ResponseKind {
        ResponseKind::from_u8(self.kind)
    }

    pub fn set_kind(&mut self, kind: ResponseKind) {
        self.kind = kind as u8;
    }
}

impl Default for CollisionResponse {
    fn default() -> Self {
        Self::new(ResponseKind::Stop)
    }
}

impl Snapshotable for CollisionResponse {
    const PRIORITY: i32 = 25;

    fn validate(&self) -> Result<(), String> {
        let unit = |v: Fx| v >= Fx::ZERO && v <= Fx::ONE;
        if !unit(self.bounciness) || !unit(self.friction) {
            return Err(format!(
                "bounciness {} and friction {} must lie in [0, 1]",
                self.bounciness, self.friction
            ));
        }
        Ok(())
    }
}

/// Marks an entity as immovable collision geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct StaticCollider {
    is_static: u32,
}

impl StaticCollider {
    pub const STATIC: Self = Self { is_static: 1 };

    pub fn is_static(&self) -> bool {
        self.is_static != 0
    }
}

impl Default for StaticCollider {
    fn default() -> Self {
        Self::STATIC
    }
}

impl Snapshotable for StaticCollider {
    const PRIORITY: i32 = 15;
}

/// Grounded/airborne tracking and last-contact bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CollisionState {
    pub ground_normal: FxVec3,
    pub ground_point: FxVec3,
    pub last_position: FxVec3,
    pub last_velocity: FxVec3,
    pub penetration_normal: FxVec3,
    /// Seconds since the last walkable contact.
    pub time_since_grounded: Fx,
    pub penetration_depth: Fx,
    pub last_tick: u64,
    grounded: u8,
    _pad: [u8; 7],
}

impl Default for CollisionState {
    fn default() -> Self {
        Self {
            ground_normal: FxVec3::UP,
            ground_point: FxVec3::ZERO,
            last_position: FxVec3::ZERO,
            last_velocity: FxVec3::ZERO,
            penetration_normal: FxVec3::ZERO,
            time_since_grounded: Fx::ZERO,
            penetration_depth: Fx::ZERO,
            last_tick: 0,
            grounded: 0,
            _pad: [0; 7],
        }
    }
}

impl CollisionState {
    pub fn is_grounded(&self) -> bool {
        self.grounded != 0
    }

    pub fn set_grounded(&mut self, grounded: bool) {
        self.grounded = u8::from(grounded);
    }
}

impl Snapshotable for CollisionState {
    const PRIORITY: i32 = 40;
}

// ---------------------------------------------------------------------------
// Per-tick buffers (never snapshotted)
// ---------------------------------------------------------------------------

/// One resolved contact, seen from `entity`'s side.
///
/// `normal` points away from `other`, so pushing `entity` along it by
/// `depth` separates the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollisionEvent {
    pub entity: EntityId,
    pub other: EntityId,
    pub point: FxVec3,
    pub normal: FxVec3,
    pub depth: Fx,
    pub layer: u32,
    pub other_layer: u32,
}

impl CollisionEvent {
    /// The same contact seen from the other entity.
    pub fn mirrored(&self) -> Self {
        Self {
            entity: self.other,
            other: self.entity,
            point: self.point,
            normal: -self.normal,
            depth: self.depth,
            layer: self.other_layer,
            other_layer: self.layer,
        }
    }
}

/// Contacts produced this tick. Cleared at the start of every collision
/// pass and capped at the configured capacity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionEvents(pub Vec<CollisionEvent>);

/// Copy of the previous tick's [`CollisionEvents`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionContacts(pub Vec<CollisionEvent>);

// ---------------------------------------------------------------------------
// Singletons
// ---------------------------------------------------------------------------

/// Authoritative simulation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SimulationTime {
    pub tick: u64,
    pub last_confirmed_tick: u64,
    pub delta: Fx,
    pub elapsed: Fx,
    pub tick_rate: u32,
    pub max_rollback_window: u32,
}

impl SimulationTime {
    pub fn new(tick_rate: u32, max_rollback_window: u32) -> Self {
        Self {
            tick: 0,
            last_confirmed_tick: 0,
            delta: Fx::from_ratio(1, i64::from(tick_rate.max(1))),
            elapsed: Fx::ZERO,
            tick_rate,
            max_rollback_window,
        }
    }
}

impl Default for SimulationTime {
    fn default() -> Self {
        Self::new(60, 8)
    }
}

impl Snapshotable for SimulationTime {
    const PRIORITY: i32 = 0;

    fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick rate is zero".to_owned());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct GlobalGravity {
    pub gravity: FxVec3,
    pub scale: Fx,
    enabled: u8,
    _pad: [u8; 7],
}

impl GlobalGravity {
    pub fn new(gravity: FxVec3, scale: Fx) -> Self {
        Self {
            gravity,
            scale,
            enabled: 1,
            _pad: [0; 7],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = u8::from(enabled);
    }

    /// `gravity * scale`, or zero when disabled.
    pub fn effective(&self) -> FxVec3 {
        if self.is_enabled() {
            self.gravity * self.scale
        } else {
            FxVec3::ZERO
        }
    }
}

impl Default for GlobalGravity {
    /// (0, -9.81, 0) at scale 1.
    fn default() -> Self {
        Self::new(
            FxVec3::new(Fx::ZERO, -Fx::from_ratio(981, 100), Fx::ZERO),
            Fx::ONE,
        )
    }
}

impl Snapshotable for GlobalGravity {
    const PRIORITY: i32 = 5;
}

/// Per-layer collidable-with masks. Row `i` lists the layers that layer
/// `i` collides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct LayerMatrix {
    pub rows: [u32; 32],
}

impl LayerMatrix {
    /// No layer collides with anything.
    pub fn empty() -> Self {
        Self { rows: [0; 32] }
    }

    /// Let layers `a` and `b` (bit indices) collide. Only row `a` is
    /// touched; the pair test is symmetric anyway.
    pub fn enable(&mut self, a: u32, b: u32) {
        if let Some(row) = self.rows.get_mut(a as usize) {
            *row |= 1 << (b % 32);
        }
    }

    /// Symmetric OR test between two layer bitmasks: true if any layer of
    /// `a` lists any layer of `b`, or the other way round.
    pub fn allows(&self, a: u32, b: u32) -> bool {
        self.lists(a, b) || self.lists(b, a)
    }

    fn lists(&self, from: u32, to: u32) -> bool {
        (0..32).any(|bit| from & (1 << bit) != 0 && self.rows[bit] & to != 0)
    }
}

impl Default for LayerMatrix {
    /// Every layer collides with every layer.
    fn default() -> Self {
        Self {
            rows: [ALL_LAYERS; 32],
        }
    }
}

impl Snapshotable for LayerMatrix {
    const PRIORITY: i32 = 5;
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register every engine type with `world`. Idempotent.
pub fn register_engine_types(world: &mut World) -> Result<(), EcsError> {
    world.register_snapshotable_resource::<SimulationTime>("simulation_time")?;
    world.register_snapshotable_resource::<GlobalGravity>("global_gravity")?;
    world.register_snapshotable_resource::<LayerMatrix>("layer_matrix")?;
    world.register_snapshotable::<Physics>("physics")?;
    world.register_snapshotable::<StaticCollider>("static_collider")?;
    world.register_snapshotable::<CollisionBounds>("collision_bounds")?;
    world.register_snapshotable::<CollisionResponse>("collision_response")?;
    world.register_snapshotable::<Movement>("movement")?;
    world.register_snapshotable::<Transform>("transform")?;
    world.register_snapshotable::<CollisionState>("collision_state")?;
    world.register_component::<CollisionEvents>("collision_events")?;
    world.register_component::<CollisionContacts>("collision_contacts")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
