//! Scheduler and rollback tests: determinism across runs, rollback
//! idempotence, window bookkeeping, input retention and the persisted
//! snapshot history.

use std::time::Duration;

use rewind_engine::prelude::*;

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

const JUMP: u32 = 1;

/// Player 0 steers entity 0 (the first spawned) with `motion` and jumps.
fn steering_system(world: &mut World, ctx: &TickContext<'_>) {
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
        movement.velocity.z = input.motion.z;
        if grounded && input.pressed(JUMP) {
            movement.velocity.y = Fx::from_int(5);
        }
    }
}

fn build_scene() -> World {
    let mut world = World::new();
    register_engine_types(&mut world).unwrap();

    let player = world.spawn();
    world
        .insert(player, Transform::from_position(FxVec3::new(Fx::ZERO, Fx::from_int(2), Fx::ZERO)))
        .unwrap();
    world.insert(player, Movement::default()).unwrap();
    world.insert(player, Physics::default()).unwrap();
    world.insert(player, CollisionBounds::default()).unwrap();
    world
        .insert(player, CollisionResponse::new(ResponseKind::Slide).with_friction(Fx::from_ratio(1, 10)))
        .unwrap();

    for i in 0..4 {
        let crate_box = world.spawn();
        let x = Fx::from_int(2 + i * 2);
        world
            .insert(crate_box, Transform::from_position(FxVec3::new(x, Fx::from_int(3 + i), Fx::ZERO)))
            .unwrap();
        world.insert(crate_box, Movement::default()).unwrap();
        world.insert(crate_box, Physics::default()).unwrap();
        world.insert(crate_box, CollisionBounds::default()).unwrap();
        world
            .insert(crate_box, CollisionResponse::new(ResponseKind::Bounce).with_bounciness(Fx::HALF))
            .unwrap();
    }

    let floor = world.spawn();
    world.insert(floor, Transform::default()).unwrap();
    world
        .insert(floor, CollisionBounds::new(FxVec3::new(Fx::from_int(40), Fx::ONE, Fx::from_int(40))))
        .unwrap();
    world.insert(floor, StaticCollider::STATIC).unwrap();

    world
}

fn scene_loop() -> TickLoop {
    let mut tick_loop = TickLoop::new(build_scene(), EngineConfig::default()).unwrap();
    tick_loop.add_system("steering", steering_system).unwrap();
    tick_loop
}

fn input_for(tick: u64) -> InputFrame {
    let motion = if (tick / 20) % 2 == 0 { Fx::ONE } else { -Fx::ONE };
    InputFrame::new().with_player(
        0,
        PlayerInput {
            motion: FxVec3::new(motion, Fx::ZERO, Fx::ZERO),
            aim: FxVec3::ZERO,
            buttons: if tick % 45 == 0 { JUMP } else { 0 },
        },
    )
}

fn drive(tick_loop: &mut TickLoop, ticks: u64) {
    for _ in 0..ticks {
        let next = tick_loop.tick_count() + 1;
        tick_loop.set_input(input_for(next));
        tick_loop.run_ticks(1);
    }
}

// ---------------------------------------------------------------------------
// 1. Determinism
// ---------------------------------------------------------------------------

#[test]
fn identical_runs_produce_identical_hashes() {
    let mut a = scene_loop();
    let mut b = scene_loop();
    for _ in 0..10 {
        drive(&mut a, 20);
        drive(&mut b, 20);
        assert_eq!(a.state_hash(), b.state_hash(), "diverged at tick {}", a.tick_count());
    }
    assert_eq!(a.world().capture_image(), b.world().capture_image());
}

#[test]
fn different_input_changes_the_hash() {
    let mut a = scene_loop();
    let mut b = scene_loop();
    drive(&mut a, 30);
    b.run_ticks(30);
    assert_ne!(a.state_hash(), b.state_hash());
}

// ---------------------------------------------------------------------------
// 2. Rollback idempotence
// ---------------------------------------------------------------------------

#[test]
fn rollback_to_every_tick_in_the_window_is_idempotent() {
    let mut tick_loop = scene_loop();
    drive(&mut tick_loop, 60);
    let hash = tick_loop.state_hash();
    let window = u64::from(tick_loop.config().max_rollback_window);

    for target in (60 - window)..=60 {
        let report = tick_loop.rollback_to(target).unwrap();
        assert!(!report.diverged(), "rollback to {target} changed the state");
        assert_eq!(tick_loop.tick_count(), 60);
        assert_eq!(tick_loop.state_hash(), hash);
    }
}

#[test]
fn snapshot_hashes_match_a_straight_run() {
    let mut straight = scene_loop();
    drive(&mut straight, 40);

    let mut rolled = scene_loop();
    drive(&mut rolled, 40);
    rolled.rollback_to(34).unwrap();

    for tick in 34..=40 {
        assert_eq!(
            straight.history().get(tick).unwrap().hash,
            rolled.history().get(tick).unwrap().hash,
            "tick {tick}"
        );
    }
}

// ---------------------------------------------------------------------------
// 3. Window and catch-up
// ---------------------------------------------------------------------------

#[test]
fn window_boundary_is_inclusive() {
    let mut tick_loop = scene_loop();
    drive(&mut tick_loop, 25);
    let window = u64::from(tick_loop.config().max_rollback_window);

    assert!(matches!(
        tick_loop.rollback_to(25 - window - 1),
        Err(RollbackError::OutsideWindow { .. })
    ));
    assert!(tick_loop.rollback_to(25 - window).is_ok());
}

#[test]
fn missing_snapshot_refuses_the_rollback() {
    // Resuming at tick 100 leaves only that tick's snapshot behind.
    let mut world = build_scene();
    let mut time = SimulationTime::new(60, 8);
    time.tick = 100;
    world.insert_resource(time);
    let mut tick_loop = TickLoop::new(world, EngineConfig::default()).unwrap();
    assert_eq!(tick_loop.tick_count(), 100);
    let hash = tick_loop.state_hash();

    assert!(matches!(
        tick_loop.can_rollback_to(95),
        Err(RollbackError::NoSnapshot { target: 95 })
    ));
    assert!(matches!(
        tick_loop.rollback_to(95),
        Err(RollbackError::NoSnapshot { target: 95 })
    ));
    assert_eq!(tick_loop.tick_count(), 100);
    assert_eq!(tick_loop.state_hash(), hash);
}

#[test]
fn rollback_to_the_current_tick_keeps_contacts() {
    let mut tick_loop = scene_loop();
    tick_loop.run_ticks(90);
    let contacts = |tick_loop: &TickLoop| -> Vec<Vec<CollisionEvent>> {
        tick_loop
            .world()
            .query::<CollisionContacts>()
            .map(|(_, c)| c.0.clone())
            .collect()
    };
    let player = tick_loop.world().entities_with::<CollisionResponse>()[0];
    assert!(!tick_loop.world().get::<CollisionContacts>(player).unwrap().0.is_empty());
    let before = contacts(&tick_loop);

    let report = tick_loop.rollback_to(tick_loop.tick_count()).unwrap();
    assert_eq!(report.resimulated, 0);
    assert_eq!(contacts(&tick_loop), before);

    // A real rewind rebuilds them through re-simulation.
    tick_loop.rollback_to(tick_loop.tick_count() - 3).unwrap();
    assert_eq!(contacts(&tick_loop), before);
}

#[test]
fn stall_of_half_a_second_runs_exactly_three_ticks() {
    let mut tick_loop = scene_loop();
    let report = tick_loop.advance(Duration::from_millis(500));
    assert_eq!(report.steps, 3);
    assert_eq!(report.tick, 3);
    assert!(report.rollback.is_none());
}

#[test]
fn custom_window_and_catch_up_are_honoured() {
    let config = EngineConfig::from_json_str(
        r#"{ "tick_rate": 30, "max_catch_up_steps": 5, "max_rollback_window": 2 }"#,
    )
    .unwrap();
    let mut tick_loop = TickLoop::new(build_scene(), config).unwrap();
    assert_eq!(tick_loop.advance(Duration::from_secs(1)).steps, 5);
    assert!(tick_loop.rollback_to(3).is_ok());
    assert!(tick_loop.rollback_to(2).is_err());
    assert_eq!(tick_loop.history().len(), 3);
}

// ---------------------------------------------------------------------------
// 4. Late input
// ---------------------------------------------------------------------------

#[test]
fn late_correction_matches_a_run_that_had_the_input_on_time() {
    // Reference: the corrected input was known all along.
    let corrected = InputFrame::new().with_player(
        0,
        PlayerInput {
            motion: FxVec3::new(Fx::from_int(4), Fx::ZERO, Fx::ZERO),
            ..PlayerInput::default()
        },
    );
    let mut reference = scene_loop();
    for _ in 0..50 {
        let next = reference.tick_count() + 1;
        let input = if next == 47 { corrected.clone() } else { input_for(next) };
        reference.set_input(input);
        reference.run_ticks(1);
    }

    // Live: the input for tick 47 arrives at tick 50.
    let mut live = scene_loop();
    drive(&mut live, 50);
    assert_ne!(live.state_hash(), reference.state_hash());

    live.correct_input(47, corrected).unwrap();
    let report = live.advance(Duration::ZERO);
    let rollback = report.rollback.unwrap().unwrap();
    assert_eq!(rollback.to_tick, 46);
    assert_eq!(rollback.resimulated, 4);
    assert!(rollback.diverged());

    assert_eq!(live.tick_count(), 50);
    assert_eq!(live.state_hash(), reference.state_hash());
}

#[test]
fn inputs_outside_the_window_are_pruned() {
    let mut tick_loop = scene_loop();
    drive(&mut tick_loop, 30);
    assert!(tick_loop.input_for_tick(5).is_none());
    assert!(tick_loop.input_for_tick(30).is_some());

    tick_loop.confirm_tick(28);
    assert!(tick_loop.input_for_tick(28).is_none());
    assert!(tick_loop.input_for_tick(29).is_some());
    assert_eq!(tick_loop.world().resource::<SimulationTime>().unwrap().last_confirmed_tick, 28);
}

// ---------------------------------------------------------------------------
// 5. Persisted history
// ---------------------------------------------------------------------------

#[test]
fn persisted_history_restores_into_a_fresh_world() {
    let mut tick_loop = scene_loop();
    drive(&mut tick_loop, 20);

    let bytes = encode_history(tick_loop.history(), tick_loop.world().snapshot_registry()).unwrap();

    let mut fresh = World::new();
    register_engine_types(&mut fresh).unwrap();
    let history = decode_history(&bytes, fresh.snapshot_registry()).unwrap();
    let frame = history.get(20).unwrap();

    let report = fresh.rewind_to_image(&frame.image).unwrap();
    assert!(report.is_clean());
    assert_eq!(fresh.state_hash(), frame.hash);
    assert_eq!(fresh.state_hash(), tick_loop.state_hash());
}

#[test]
fn persisted_history_rejects_a_different_registry() {
    #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Health(u32);
    impl Snapshotable for Health {
        const PRIORITY: i32 = 120;
    }

    let mut tick_loop = scene_loop();
    drive(&mut tick_loop, 5);
    let bytes = encode_history(tick_loop.history(), tick_loop.world().snapshot_registry()).unwrap();

    let mut other = World::new();
    register_engine_types(&mut other).unwrap();
    other.register_snapshotable::<Health>("health").unwrap();
    let err = decode_history(&bytes, other.snapshot_registry()).unwrap_err();
    assert!(matches!(err, SnapshotError::SchemaMismatch { .. }), "got {err}");
}
