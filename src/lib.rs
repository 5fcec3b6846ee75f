//! # Ballance-Physics
//!
//! **Embedded Rigid-Body Engine for a Rolling-Ball Game**
//!
//! A Rust library that simulates balls, crates, planks and static level
//! geometry with contact listeners, phantom volumes and a small family of
//! joints and force elements. The game host drives it through a flat C
//! function table ([`ffi`]); Rust callers use [`Environment`] directly.
//!
//! ## Features
//!
//! | Feature | Description | Module |
//! |---------|-------------|--------|
//! | **Shapes** | Balls, convex hulls, concave triangle meshes, named surface cache | [`shape`] |
//! | **Filtering** | Layer masks plus system groups with sub-system exclusion | [`filter`] |
//! | **Contacts** | Sweep-and-prune, GJK/EPA, persistent manifolds | [`broadphase`], [`narrowphase`], [`contact_cache`] |
//! | **Solver** | XPBD substeps with friction, restitution and joints | [`solver`], [`joint`] |
//! | **Elements** | Point forces, springs, PD motion controllers | [`force`], [`motion`] |
//! | **Events** | Collision, friction, contract and phantom listeners | [`event`], [`detection`], [`phantom`] |
//! | **Queries** | Raycasts against the world or a single body | [`raycast`] |
//!
//! ## Design Principles
//!
//! - **Generational handles**: stale handles are rejected, never dereferenced
//! - **Double precision inside**: `f32` only at the C boundary
//! - **Events after the step**: listeners see a consistent world and a
//!   panicking listener cannot corrupt it
//!
//! ## Quick Start
//!
//! ```rust
//! use ballance_physics::prelude::*;
//!
//! let mut env = Environment::new(EnvironmentConfig::default())?;
//! let ball = env.physicalize(
//!     &BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 10.0, 0.0)),
//! )?;
//!
//! for _ in 0..66 {
//!     env.simulate_dtime(env.config().step_size());
//! }
//!
//! assert!(env.pose(ball)?.position.y < 10.0);
//! # Ok::<(), PhysicsError>(())
//! ```
//!
//! ## Listeners
//!
//! ```rust
//! use ballance_physics::prelude::*;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let mut env = Environment::new(EnvironmentConfig::default())?;
//! let zone = env.physicalize(&BodyDesc::ball("zone", 2.0).with_mass(0.0))?;
//!
//! let entered = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&entered);
//! env.convert_to_phantom(
//!     zone,
//!     0.0,
//!     Some(Box::new(move |e: &PhantomEvent| {
//!         if e.entered {
//!             counter.set(counter.get() + 1);
//!         }
//!     })),
//! )?;
//!
//! env.physicalize(&BodyDesc::ball("ball", 0.5))?;
//! env.simulate_dtime(env.config().step_size());
//! assert_eq!(entered.get(), 1);
//! # Ok::<(), PhysicsError>(())
//! ```

pub mod arena;
pub mod body;
pub mod broadphase;
pub mod collider;
pub mod config;
pub mod contact_cache;
pub mod detection;
pub mod environment;
pub mod error;
pub mod event;
pub mod filter;
pub mod force;
pub mod hull;
pub mod joint;
pub mod math;
pub mod motion;
pub mod narrowphase;
pub mod phantom;
pub mod raycast;
pub mod shape;
pub mod sleeping;
pub mod solver;

#[cfg(feature = "ffi")]
pub mod ffi;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::arena::{Arena, Handle};
    pub use crate::body::{BodyDesc, BodyFlags, BodyHandle, MotionState, RigidBody};
    pub use crate::config::{EnvironmentConfig, SleepConfig, SolverConfig, DEFAULT_SIMULATION_RATE};
    pub use crate::contact_cache::{BodyPair, ContactManifold, ManifoldPoint};
    pub use crate::detection::{CollDetection, ContractDetection};
    pub use crate::environment::{
        CollDetectionHandle, ContractDetectionHandle, Environment, EnvironmentStats, ForceHandle,
        JointHandle, MotionHandle, SpringHandle,
    };
    pub use crate::error::{ErrorReporter, PhysicsError, PhysicsResult};
    pub use crate::event::{
        CollisionEvent, CollisionListener, ContractEvent, ContractKind, ContractListener, EventBody,
        FrictionEvent, FrictionListener, PhantomEvent, PhantomListener,
    };
    pub use crate::filter::{CollisionFilter, LayerMaskTable};
    pub use crate::force::{Attachment, PointForce, Spring};
    pub use crate::joint::{AxisLimits, Joint, JointType};
    pub use crate::math::{Aabb, DQuat, DVec3, Pose};
    pub use crate::motion::{MotionController, MotionGains};
    pub use crate::raycast::RayHit;
    pub use crate::shape::{PointBuffer, Polyhedron, Shape};
}

// Re-export main types at crate root
pub use prelude::*;

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::prelude::*;

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

    #[test]
    fn test_box_settles_on_static_box() {
        let mut env = Environment::new(EnvironmentConfig::default()).unwrap();
        env.physicalize(
            &BodyDesc::convex("ground", vec![cube(5.0)])
                .with_mass(0.0)
                .with_position(DVec3::new(0.0, -5.0, 0.0)),
        )
        .unwrap();
        let block = env
            .physicalize(&BodyDesc::convex("crate", vec![cube(0.5)]).with_position(DVec3::new(0.0, 1.5, 0.0)))
            .unwrap();

        for _ in 0..(3 * 66) {
            env.simulate_dtime(env.config().step_size());
        }

        let y = env.pose(block).unwrap().position.y;
        assert!((y - 0.5).abs() < 0.1, "crate rests at {y}");
        assert!(env.is_contact(block, env.bodies().map(|(h, _)| h).find(|&h| h != block).unwrap()));
    }

    #[test]
    fn test_simulate_until_matches_step_count() {
        let mut env = Environment::new(EnvironmentConfig::default().with_simulation_rate(50.0)).unwrap();
        assert_eq!(env.simulate_until(1.0), 50);
        assert!((env.time() - 1.0).abs() < 1e-9);
        assert_eq!(env.simulate_until(1.0), 0);
    }
}
