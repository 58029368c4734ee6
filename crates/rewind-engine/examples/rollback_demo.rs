//! Headless rollback demo -- a player slides across a floor among bouncing
//! crates; the input for an earlier tick arrives late and the loop rolls
//! back to re-simulate it.
//!
//! Run with:
//!   cargo run --example rollback_demo -p rewind-engine
//!
//! Environment:
//!   RUST_LOG                 -- log filter (default `info`)
//!   REWIND_TICK_RATE         -- ticks per second
//!   REWIND_ROLLBACK_WINDOW   -- ticks of history kept for rollback

use std::time::Duration;

use anyhow::Context;
use rewind_engine::prelude::*;

const JUMP: u32 = 1;

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

struct Scene {
    world: World,
    player: EntityId,
}

fn build_scene() -> anyhow::Result<Scene> {
    let mut world = World::new();
    register_engine_types(&mut world)?;

    let player = world.spawn();
    world.insert(player, Transform::from_position(FxVec3::new(Fx::ZERO, Fx::from_int(2), Fx::ZERO)))?;
    world.insert(player, Movement::default())?;
    world.insert(player, Physics::default())?;
    world.insert(player, CollisionBounds::default())?;
    world.insert(player, CollisionResponse::new(ResponseKind::Slide).with_friction(Fx::from_ratio(1, 10)))?;

    for i in 0..6 {
        let crate_box = world.spawn();
        let position = FxVec3::new(Fx::from_int(3 + i * 2), Fx::from_int(2 + i), Fx::ZERO);
        world.insert(crate_box, Transform::from_position(position))?;
        world.insert(crate_box, Movement::default())?;
        world.insert(crate_box, Physics::default())?;
        world.insert(crate_box, CollisionBounds::default())?;
        world.insert(crate_box, CollisionResponse::new(ResponseKind::Bounce).with_bounciness(Fx::HALF))?;
    }

    let floor = world.spawn();
    world.insert(floor, Transform::default())?;
    world.insert(floor, CollisionBounds::new(FxVec3::new(Fx::from_int(60), Fx::ONE, Fx::from_int(60))))?;
    world.insert(floor, StaticCollider::STATIC)?;

    Ok(Scene { world, player })
}

/// Player 0 drives the first entity with a collision response.
fn steering(world: &mut World, ctx: &TickContext<'_>) {
    let Some(input) = ctx.input.player(0).copied() else {
        return;
    };
    let Some(player) = world.entities_with::<CollisionResponse>().first().copied() else {
        return;
    };
    let grounded = world
        .get::<CollisionState>(player)
        .is_some_and(CollisionState::is_grounded);
    if let Some(movement) = world.get_mut::<Movement>(player) {
        movement.velocity.x = input.motion.x;
        if grounded && input.pressed(JUMP) {
            movement.velocity.y = Fx::from_int(5);
        }
    }
}

fn walk_right() -> InputFrame {
    InputFrame::new().with_player(
        0,
        PlayerInput {
            motion: FxVec3::new(Fx::ONE, Fx::ZERO, Fx::ZERO),
            ..PlayerInput::default()
        },
    )
}

fn jump_right() -> InputFrame {
    InputFrame::new().with_player(
        0,
        PlayerInput {
            motion: FxVec3::new(Fx::from_int(2), Fx::ZERO, Fx::ZERO),
            buttons: JUMP,
            ..PlayerInput::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();

    let config = EngineConfig::default().with_env_overrides();
    let Scene { world, player } = build_scene()?;
    let mut tick_loop = TickLoop::new(world, config).context("building the tick loop")?;
    tick_loop.add_system("steering", steering)?;

    // Two seconds of walking, fed one frame at a time.
    let frame = tick_loop.config().fixed_dt();
    for _ in 0..(2 * tick_loop.config().tick_rate) {
        tick_loop.set_input(walk_right());
        tick_loop.advance(frame);
    }
    let before = tick_loop.state_hash();
    tracing::info!(tick = tick_loop.tick_count(), hash = %before, "walked");

    // The remote peer actually jumped three ticks ago.
    let late_tick = tick_loop.tick_count().saturating_sub(3);
    tick_loop
        .correct_input(late_tick, jump_right())
        .with_context(|| format!("correcting input for tick {late_tick}"))?;
    let report = tick_loop.advance(Duration::ZERO);

    match report.rollback {
        Some(Ok(rollback)) => {
            tracing::info!(
                from = rollback.from_tick,
                to = rollback.to_tick,
                resimulated = rollback.resimulated,
                diverged = rollback.diverged(),
                "rolled back"
            );
            println!("{}", serde_json::to_string_pretty(&rollback)?);
        }
        Some(Err(err)) => tracing::warn!(%err, "rollback refused"),
        None => tracing::warn!("no rollback was pending"),
    }

    // Let the jump play out, then confirm everything up to now.
    tick_loop.run_ticks(30);
    let confirmed = tick_loop.confirm_tick(tick_loop.tick_count());

    let transform = tick_loop
        .world()
        .get::<Transform>(player)
        .context("player lost its transform")?;
    tracing::info!(
        tick = tick_loop.tick_count(),
        confirmed,
        x = transform.position.x.to_f64(),
        y = transform.position.y.to_f64(),
        "finished"
    );
    println!("{}", tick_loop.history().summary_json()?);
    Ok(())
}
