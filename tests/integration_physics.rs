//! Integration tests for Ballance-Physics
//!
//! These tests verify end-to-end behaviour of the engine using only the
//! public API re-exported from the crate root. Every run is deterministic:
//! no randomness, no wall-clock dependence.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use ballance_physics::force::PointState;
use ballance_physics::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

fn environment() -> Environment {
    Environment::new(EnvironmentConfig::default()).unwrap()
}

/// Run `seconds` of fixed steps.
fn run(env: &mut Environment, seconds: f64) {
    let h = env.config().step_size();
    let steps = (seconds / h).round() as usize;
    for _ in 0..steps {
        env.simulate_dtime(h);
    }
}

fn cube(half: f64) -> PointBuffer {
    PointBuffer::new(
        (0..8)
            .map(|i| {
                DVec3::new(
                    if i & 1 == 0 { -half } else { half },
                    if i & 2 == 0 { -half } else { half },
                    if i & 4 == 0 { -half } else { half },
                )
            })
            .collect(),
    )
}

fn floor() -> BodyDesc {
    let quad = Polyhedron::new(
        vec![
            DVec3::new(-20.0, 0.0, -20.0),
            DVec3::new(20.0, 0.0, -20.0),
            DVec3::new(20.0, 0.0, 20.0),
            DVec3::new(-20.0, 0.0, 20.0),
        ],
        vec![0, 2, 1, 0, 3, 2],
    );
    BodyDesc::concave("floor", vec![quad]).with_mass(0.0)
}

// ============================================================================
// Test 1 — Unmovable bodies
// ============================================================================

/// A mass-0 body keeps its pose and zero velocity under impulses, forces,
/// springs and contacts.
#[test]
fn test_unmovable_pose_invariant() {
    let mut env = environment();
    let block = env
        .physicalize(
            &BodyDesc::convex("block", vec![cube(1.0)])
                .with_mass(0.0)
                .with_position(DVec3::new(0.0, 3.0, 0.0)),
        )
        .unwrap();
    let ball = env
        .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 5.0, 0.0)))
        .unwrap();

    env.apply_impulse(block, DVec3::new(0.0, 3.0, 0.0), DVec3::new(100.0, 0.0, 0.0))
        .unwrap();
    env.apply_torque(block, DVec3::new(0.0, 50.0, 0.0)).unwrap();
    env.add_speed(block, DVec3::new(0.0, 10.0, 0.0)).unwrap();
    env.add_force(block, ball, DVec3::ZERO, DVec3::ZERO, 500.0, true)
        .unwrap();
    env.add_spring(Spring::new(
        Attachment::new(block, DVec3::ZERO),
        Attachment::new(ball, DVec3::ZERO),
        0.5,
        200.0,
    ))
    .unwrap();

    let before = env.pose(block).unwrap();
    run(&mut env, 1.0);

    assert_eq!(env.pose(block).unwrap(), before);
    assert_eq!(env.velocity(block).unwrap(), DVec3::ZERO);
    assert_eq!(env.angular_velocity_local(block).unwrap(), DVec3::ZERO);
}

// ============================================================================
// Test 2 — Immovable pairs
// ============================================================================

/// Overlapping immovable bodies never produce contacts or collision events.
#[test]
fn test_immovable_pair_never_collides() {
    let mut env = environment();
    let a = env
        .physicalize(&BodyDesc::convex("a", vec![cube(1.0)]).with_mass(0.0))
        .unwrap();
    let b = env
        .physicalize(
            &BodyDesc::convex("b", vec![cube(1.0)])
                .with_mass(0.0)
                .with_position(DVec3::new(0.5, 0.0, 0.0)),
        )
        .unwrap();

    let hits = Rc::new(RefCell::new(0));
    for body in [a, b] {
        let sink = Rc::clone(&hits);
        env.set_collision_listener(
            body,
            Some(Box::new(move |_: &CollisionEvent| *sink.borrow_mut() += 1)),
            0.0,
            None,
        )
        .unwrap();
    }

    run(&mut env, 0.5);

    assert!(!env.is_contact(a, b));
    assert!(env.manifolds().is_empty());
    assert_eq!(*hits.borrow(), 0);
}

// ============================================================================
// Test 3 — Phantom alternation
// ============================================================================

/// Enter and exit events for one pair strictly alternate, even when the
/// body stays in place for several steps.
#[test]
fn test_phantom_events_alternate() {
    let mut env = environment();
    let zone = env
        .physicalize(&BodyDesc::ball("zone", 1.0).with_mass(0.0))
        .unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    env.convert_to_phantom(
        zone,
        0.0,
        Some(Box::new(move |e: &PhantomEvent| sink.borrow_mut().push(e.entered))),
    )
    .unwrap();

    let mover = env
        .physicalize(&BodyDesc::ball("mover", 0.25).with_position(DVec3::new(5.0, 0.0, 0.0)))
        .unwrap();
    env.enable_gravity(mover, false).unwrap();

    let h = env.config().step_size();
    let path = [0.0, 0.0, 5.0, 5.0, 0.5, 0.2, 3.0, 0.0, 5.0];
    for x in path {
        env.beam(mover, DVec3::new(x, 0.0, 0.0), DQuat::IDENTITY, false)
            .unwrap();
        env.simulate_dtime(h);
        env.simulate_dtime(h);
    }

    let events = log.borrow();
    assert_eq!(*events, vec![true, false, true, false, true, false]);
    assert!(events.windows(2).all(|w| w[0] != w[1]));
    assert!(!env.is_inside_phantom(zone, mover));
}

// ============================================================================
// Test 4 — Layer mask round trip
// ============================================================================

#[test]
fn test_layer_mask_toggle_round_trip() {
    let mut env = environment();
    let a = env
        .physicalize(&BodyDesc::ball("a", 0.5).with_layer(1))
        .unwrap();
    let b = env
        .physicalize(
            &BodyDesc::ball("b", 0.5)
                .with_layer(2)
                .with_position(DVec3::new(3.0, 0.0, 0.0)),
        )
        .unwrap();

    let initial = env.can_collide(a, b);
    assert!(initial);

    env.set_collision_layer_masks(1, 1 << 2, false);
    assert!(!env.can_collide(a, b));
    env.set_collision_layer_masks(1, 1 << 2, true);
    assert_eq!(env.can_collide(a, b), initial);
}

// ============================================================================
// Test 5 — Collision detection window and cooldown
// ============================================================================

#[test]
fn test_coll_detection_cooldown_window() {
    let body = BodyHandle::from_bits(1);
    let mut det = CollDetection::new(body, 3, 2.0, 10.0, 1.0, 0.5);
    let dt = 0.05;

    assert!(det.update(Some(5.0), 5.0, dt).is_some());
    // Slowing below the threshold starts the silence
    assert!(det.update(None, 0.2, dt).is_none());

    // 19 steps of silence, then the full second has passed
    for step in 1..20 {
        assert!(det.update(Some(5.0), 0.2, dt).is_none(), "fired after step {step}");
    }
    assert!(det.update(Some(5.0), 0.2, dt).is_some());
}

// ============================================================================
// Test 6 — Stretch-only spring under compression
// ============================================================================

#[test]
fn test_stretch_only_spring_ignores_compression() {
    let a = BodyHandle::from_bits(1);
    let b = BodyHandle::from_bits(2);
    let spring = Spring::new(Attachment::new(a, DVec3::ZERO), Attachment::new(b, DVec3::ZERO), 2.0, 50.0)
        .stretch_only(true);

    let pa = PointState::at_rest(DVec3::ZERO, 1.0);
    let pb = PointState::at_rest(DVec3::new(1.0, 0.0, 0.0), 1.0);
    let forces = spring.evaluate(&pa, &pb, 1.0 / 66.0);
    assert_eq!(forces.on_a, DVec3::ZERO);
    assert_eq!(forces.on_b, DVec3::ZERO);

    let far = PointState::at_rest(DVec3::new(3.0, 0.0, 0.0), 1.0);
    let stretched = spring.evaluate(&pa, &far, 1.0 / 66.0);
    assert!(stretched.on_a.x > 0.0);
    assert_relative_eq!(stretched.on_a.x, -stretched.on_b.x);
}

// ============================================================================
// Test 7 — Raycast against a unit sphere
// ============================================================================

#[test]
fn test_raycast_unit_sphere() {
    let mut env = environment();
    let sphere = env
        .physicalize(&BodyDesc::ball("sphere", 1.0).with_mass(0.0))
        .unwrap();

    let hit = env
        .raycast_one(DVec3::new(0.0, 0.0, -10.0), DVec3::Z, 20.0, 0)
        .unwrap();
    assert_eq!(hit.body, sphere);
    assert_relative_eq!(hit.distance, 9.0, epsilon = 1e-6);
    assert_relative_eq!(hit.normal.z, -1.0, epsilon = 1e-6);

    assert!(env
        .raycast_one(DVec3::new(0.0, 0.0, -10.0), DVec3::Z, 8.0, 0)
        .is_none());
}

// ============================================================================
// Test 8 — Freeze and clock edge cases
// ============================================================================

#[test]
fn test_freeze_twice_and_clock_edges() {
    let mut env = environment();
    let ball = env.physicalize(&BodyDesc::ball("ball", 0.5)).unwrap();

    assert!(env.freeze(ball).unwrap());
    assert!(!env.freeze(ball).unwrap());
    assert!(env.is_fixed(ball).unwrap());

    run(&mut env, 0.5);
    let t = env.time();
    assert_eq!(env.simulate_until(t - 0.25), 0);
    assert_relative_eq!(env.time(), t);
    assert_eq!(env.pose(ball).unwrap().position, DVec3::ZERO);
}

// ============================================================================
// Test 9 — Panicking listener
// ============================================================================

#[test]
fn test_panicking_listener_does_not_block_others() {
    let mut env = environment();
    env.physicalize(&floor()).unwrap();
    let loud = env
        .physicalize(&BodyDesc::ball("loud", 0.5).with_position(DVec3::new(-2.0, 1.0, 0.0)))
        .unwrap();
    let quiet = env
        .physicalize(&BodyDesc::ball("quiet", 0.5).with_position(DVec3::new(2.0, 1.0, 0.0)))
        .unwrap();

    env.set_collision_listener(
        loud,
        Some(Box::new(|_: &CollisionEvent| panic!("host listener failed"))),
        0.0,
        None,
    )
    .unwrap();
    let seen = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&seen);
    env.set_collision_listener(
        quiet,
        Some(Box::new(move |_: &CollisionEvent| *sink.borrow_mut() += 1)),
        0.0,
        None,
    )
    .unwrap();

    run(&mut env, 2.0);

    assert!(*seen.borrow() >= 1);
    let y = env.pose(loud).unwrap().position.y;
    assert!((y - 0.5).abs() < 0.05, "loud ball rests at {y}");
}

// ============================================================================
// Test 10 — Degenerate geometry
// ============================================================================

#[test]
fn test_degenerate_geometry_rejected_and_reported() {
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&codes);
    let mut env = Environment::with_reporter(
        EnvironmentConfig::default(),
        Box::new(move |e: &PhysicsError| {
            if let Ok(mut codes) = sink.lock() {
                codes.push(e.code());
            }
        }),
    )
    .unwrap();

    let flat = PointBuffer::new(vec![
        DVec3::new(0.0, 0.0, 0.0),
        DVec3::new(1.0, 0.0, 0.0),
        DVec3::new(0.0, 0.0, 1.0),
        DVec3::new(1.0, 0.0, 1.0),
    ]);
    let err = env.physicalize(&BodyDesc::convex("flat", vec![flat])).unwrap_err();
    assert!(matches!(err, PhysicsError::DegenerateShape { .. }));

    let ragged = Polyhedron::new(vec![DVec3::ZERO, DVec3::X, DVec3::Z], vec![0, 1, 2, 0]);
    let err = env.physicalize(&BodyDesc::concave("ragged", vec![ragged])).unwrap_err();
    assert!(matches!(err, PhysicsError::DegenerateShape { .. }));

    let outside = Polyhedron::new(vec![DVec3::ZERO, DVec3::X, DVec3::Z], vec![0, 1, 7]);
    let err = env.physicalize(&BodyDesc::concave("outside", vec![outside])).unwrap_err();
    assert!(matches!(err, PhysicsError::DegenerateShape { .. }));

    assert_eq!(env.body_count(), 0);
    assert_eq!(*codes.lock().unwrap(), vec![2, 2, 2]);

    // A two-triangle floor is valid concave geometry
    assert!(env.physicalize(&floor()).is_ok());
}

// ============================================================================
// Test 11 — Gravity switch
// ============================================================================

#[test]
fn test_gravity_disabled_body_stays_put() {
    let mut env = environment();
    let ball = env
        .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 4.0, 0.0)))
        .unwrap();
    env.enable_gravity(ball, false).unwrap();

    run(&mut env, 1.0);
    assert_relative_eq!(env.pose(ball).unwrap().position.y, 4.0, epsilon = 1e-9);

    env.enable_gravity(ball, true).unwrap();
    run(&mut env, 0.5);
    assert!(env.pose(ball).unwrap().position.y < 4.0);
}

// ============================================================================
// Test 12 — Joints
// ============================================================================

/// A body hinged to the world swings under gravity but keeps its anchor.
#[test]
fn test_hinge_keeps_anchor_while_swinging() {
    let mut env = environment();
    let plank = env
        .physicalize(&BodyDesc::convex("plank", vec![cube(0.25)]).with_position(DVec3::new(1.0, 0.0, 0.0)))
        .unwrap();
    env.add_hinge(plank, None, DVec3::ZERO, DVec3::Z).unwrap();

    run(&mut env, 1.0);

    let anchor = env
        .object_to_world_point(plank, DVec3::new(-1.0, 0.0, 0.0))
        .unwrap();
    assert!(anchor.length() < 0.05, "anchor drifted to {anchor:?}");
    let center = env.pose(plank).unwrap().position;
    assert!(center.y < -0.1, "plank did not swing: {center:?}");
    assert!(center.z.abs() < 0.05);
}

/// A generic constraint with every axis locked holds a body like a weld.
#[test]
fn test_locked_generic_matches_fixed() {
    fn hold(locked_generic: bool) -> Pose {
        let mut env = environment();
        let block = env
            .physicalize(&BodyDesc::convex("block", vec![cube(0.5)]).with_position(DVec3::new(0.0, 2.0, 0.0)))
            .unwrap();
        if locked_generic {
            env.add_generic_constraint(block, None, AxisLimits::LOCKED, AxisLimits::LOCKED, 1.0, 0.0)
                .unwrap();
        } else {
            env.add_fixed_constraint(block, None).unwrap();
        }
        run(&mut env, 1.0);
        env.pose(block).unwrap()
    }

    let generic = hold(true);
    let fixed = hold(false);
    assert!((generic.position - DVec3::new(0.0, 2.0, 0.0)).length() < 0.05);
    assert!((generic.position - fixed.position).length() < 0.05);
    assert!(generic.rotation.angle_between(fixed.rotation) < 0.05);
}

// ============================================================================
// Test 13 — Motion controller caps
// ============================================================================

#[test]
fn test_motion_controller_respects_caps() {
    let mut env = environment();
    let ball = env.physicalize(&BodyDesc::ball("ball", 0.5)).unwrap();
    let max_force = DVec3::new(1.0, 2.0, 3.0);
    let controller = env
        .add_motion_controller(
            ball,
            DVec3::new(100.0, -100.0, 100.0),
            max_force,
            0.5,
            MotionGains {
                force_factor: 50.0,
                damp_factor: 5.0,
                torque_factor: 50.0,
                angular_damp_factor: 5.0,
            },
        )
        .unwrap();

    let c = env.motion_controller(controller).unwrap();
    let tilted = DQuat::from_rotation_y(1.0);
    for (position, velocity) in [
        (DVec3::ZERO, DVec3::ZERO),
        (DVec3::new(-50.0, 20.0, 3.0), DVec3::new(9.0, -9.0, 0.0)),
        (DVec3::new(100.0, -100.0, 99.0), DVec3::new(0.0, 0.0, 30.0)),
    ] {
        let (force, torque) = c.compute(position, tilted, velocity, DVec3::new(0.0, 4.0, 0.0));
        assert!(force.x.abs() <= max_force.x + 1e-12);
        assert!(force.y.abs() <= max_force.y + 1e-12);
        assert!(force.z.abs() <= max_force.z + 1e-12);
        assert!(torque.abs().max_element() <= 0.5 + 1e-12);
    }
}

// ============================================================================
// Test 14 — Near miss inside the contact margin
// ============================================================================

/// Bodies separated by less than the contact margin are not in contact and
/// fire no events until they actually meet.
#[test]
fn test_near_miss_is_not_contact() {
    let mut env = Environment::new(EnvironmentConfig::default().with_gravity(DVec3::ZERO)).unwrap();
    let a = env.physicalize(&BodyDesc::ball("a", 0.5)).unwrap();
    let b = env
        .physicalize(&BodyDesc::ball("b", 0.5).with_position(DVec3::new(1.005, 0.0, 0.0)))
        .unwrap();

    let hits = Rc::new(RefCell::new(0));
    let frictions = Rc::new(RefCell::new(0));
    let (hit_sink, friction_sink) = (Rc::clone(&hits), Rc::clone(&frictions));
    env.set_collision_listener(
        a,
        Some(Box::new(move |_: &CollisionEvent| *hit_sink.borrow_mut() += 1)),
        0.0,
        Some(Box::new(move |_: &FrictionEvent| *friction_sink.borrow_mut() += 1)),
    )
    .unwrap();

    run(&mut env, 0.5);

    assert!(!env.is_contact(a, b));
    assert_eq!(env.manifolds().len(), 1, "pair is tracked speculatively");
    assert_eq!(*hits.borrow(), 0);
    assert_eq!(*frictions.borrow(), 0);
    assert_relative_eq!(env.pose(b).unwrap().position.x, 1.005, epsilon = 1e-12);

    env.apply_impulse(b, DVec3::new(1.005, 0.0, 0.0), DVec3::new(-1.0, 0.0, 0.0))
        .unwrap();
    run(&mut env, 0.5);
    assert_eq!(*hits.borrow(), 1);
}

// ============================================================================
// Test 15 — Catch-up in one call
// ============================================================================

/// A single `simulate_until` call reaches the requested time, however far
/// behind the clock is, and matches stepping by hand.
#[test]
fn test_simulate_until_catches_up_in_one_call() {
    let mut caught_up = environment();
    let mut stepped = environment();
    let drop = BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 10.0, 0.0));
    let a = caught_up.physicalize(&drop).unwrap();
    let b = stepped.physicalize(&drop).unwrap();

    assert_eq!(caught_up.simulate_until(0.5), 33);
    assert!(caught_up.time() >= 0.5 - 1e-9);

    let h = stepped.config().step_size();
    for _ in 0..33 {
        stepped.simulate_dtime(h);
    }
    assert_eq!(caught_up.pose(a).unwrap(), stepped.pose(b).unwrap());

    assert_eq!(caught_up.simulate_until(0.5), 0);
    assert_eq!(caught_up.simulate_until(5.0), 297);
    assert!(caught_up.time() >= 5.0 - 1e-9);
}
