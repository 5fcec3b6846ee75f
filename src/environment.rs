//! Environment (World)
//!
//! The environment owns every body, constraint, force and helper of one
//! simulated scene and drives the step pipeline.
//!
//! # Step
//!
//! 1. Refresh deferred bounds (optimized beams)
//! 2. Forces, springs and motion controllers produce per-body loads
//! 3. Broad phase: sweep-and-prune with layer, group and immovable pruning
//! 4. Narrow phase: persistent manifolds, frozen bodies woken by contact
//! 5. XPBD solve of contacts and joints; poses written back
//! 6. Phantom overlap snapshot
//! 7. Collision, friction, contract and phantom events queued
//! 8. Sleeping by islands
//! 9. Events delivered once the state is committed
//!
//! # Time
//!
//! `simulate_until` runs fixed steps of `1 / simulation_rate`;
//! `simulate_dtime` and `simulate_variable_time_step` run one step of the
//! given size, the latter without substepping.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::arena::{Arena, Handle};
use crate::body::{BodyDesc, BodyFlags, BodyHandle, MotionState, RigidBody};
use crate::broadphase::{Proxy, SweepAndPrune};
use crate::config::{EnvironmentConfig, TIME_EPSILON};
use crate::contact_cache::{BodyPair, ContactCache, ContactManifold, ManifoldPoint, MAX_MANIFOLD_POINTS};
use crate::detection::{CollDetection, ContractDetection};
use crate::error::{ErrorReporter, PhysicsError, PhysicsResult};
use crate::event::{
    CollisionEvent, CollisionListener, ContractEvent, ContractKind, ContractListener, EventBody, FrictionEvent,
    FrictionListener, ListenerRegistry, PhantomEvent, PhantomListener,
};
use crate::filter::{CollisionFilter, LayerMaskTable, SystemGroupAllocator};
use crate::force::{Attachment, PointForce, Spring};
use crate::joint::{AxisLimits, Joint, JointEnd};
use crate::math::{is_finite, normalize_rotation, DQuat, DVec3, Pose, EPSILON};
use crate::motion::{MotionController, MotionGains};
use crate::narrowphase::{collide, ContactPoint, PosedShape};
use crate::phantom::{PhantomTracker, PhantomTransition};
use crate::raycast::{self, Ray, RayHit};
use crate::shape::{Shape, SurfaceCache};
use crate::sleeping::IslandBuilder;
use crate::solver::{JointRef, Solver, SolverBody, SolverContact};

/// Handle of a joint
pub type JointHandle = Handle<Joint>;
/// Handle of a constant force
pub type ForceHandle = Handle<PointForce>;
/// Handle of a spring
pub type SpringHandle = Handle<Spring>;
/// Handle of a motion controller
pub type MotionHandle = Handle<MotionController>;
/// Handle of a collision detection helper
pub type CollDetectionHandle = Handle<CollDetection>;
/// Handle of a contact detection helper
pub type ContractDetectionHandle = Handle<ContractDetection>;

/// Distance within which a new contact point replaces a cached one
const CONTACT_MATCH_DISTANCE: f64 = 0.02;

/// Cumulative profiling counters
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvironmentStats {
    /// Wall-clock seconds spent inside steps
    pub active_time: f64,
    /// Simulated seconds over the environment's life (unaffected by `reset_time`)
    pub simulated_time: f64,
    /// Steps taken
    pub steps: u64,
    /// Broad-phase pairs of the last step
    pub broadphase_pairs: usize,
    /// Contact points of the last step
    pub contact_points: usize,
}

/// External load accumulated for one body this step
#[derive(Clone, Copy, Debug, Default)]
struct Load {
    force: DVec3,
    torque: DVec3,
    driven: bool,
}

/// Simulated scene
pub struct Environment {
    config: EnvironmentConfig,
    bodies: Arena<RigidBody>,
    joints: Arena<Joint>,
    forces: Arena<PointForce>,
    springs: Arena<Spring>,
    motions: Arena<MotionController>,
    coll_detections: Arena<CollDetection>,
    contract_detections: Arena<ContractDetection>,
    surfaces: SurfaceCache,
    layers: LayerMaskTable,
    groups: SystemGroupAllocator,
    broadphase: SweepAndPrune,
    contacts: ContactCache,
    phantoms: PhantomTracker,
    listeners: ListenerRegistry,
    solver: Solver,
    reporter: Option<Box<dyn ErrorReporter>>,
    time: f64,
    stats: EnvironmentStats,
    next_body_id: u32,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("bodies", &self.bodies.len())
            .field("joints", &self.joints.len())
            .field("contacts", &self.contacts.manifold_count())
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

fn invalid_body() -> PhysicsError {
    PhysicsError::InvalidHandle { kind: "body" }
}

#[inline]
fn recip(x: f64) -> f64 {
    if x > EPSILON {
        1.0 / x
    } else {
        0.0
    }
}

fn solver_body(handle: BodyHandle, body: &RigidBody, load: &Load) -> SolverBody {
    let mut sb = SolverBody::fixed(handle, body.mass_frame());
    if !body.is_movable() {
        return sb;
    }
    let inertia = body.unit_inertia * body.mass;
    sb.v = body.velocity;
    sb.w = body.angular_velocity;
    sb.inv_mass = body.inv_mass();
    sb.inv_inertia = DVec3::new(recip(inertia.x), recip(inertia.y), recip(inertia.z));
    sb.force = load.force;
    sb.torque = load.torque;
    sb.gravity_scale = if body.flags.contains(BodyFlags::GRAVITY) { 1.0 } else { 0.0 };
    sb.linear_damping = body.linear_damping;
    sb.angular_damping = body.angular_damping;
    sb
}

fn posed(body: &RigidBody) -> PosedShape<'_> {
    PosedShape::new(&body.shape, body.pose, body.margin)
}

fn overlaps(a: &RigidBody, b: &RigidBody, scratch: &mut Vec<ContactPoint>) -> bool {
    scratch.clear();
    collide(&posed(a), &posed(b), 0.0, scratch) > 0 && scratch.iter().any(|c| c.depth >= 0.0)
}

impl Environment {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create an environment from a validated configuration
    pub fn new(config: EnvironmentConfig) -> PhysicsResult<Self> {
        config.validate()?;
        log::debug!(
            "environment created: gravity {:?}, rate {} Hz",
            config.gravity,
            config.simulation_rate
        );
        Ok(Self {
            layers: LayerMaskTable::from_masks(&config.layer_masks),
            solver: Solver::new(config.solver),
            config,
            bodies: Arena::new(),
            joints: Arena::new(),
            forces: Arena::new(),
            springs: Arena::new(),
            motions: Arena::new(),
            coll_detections: Arena::new(),
            contract_detections: Arena::new(),
            surfaces: SurfaceCache::new(),
            groups: SystemGroupAllocator::default(),
            broadphase: SweepAndPrune::new(),
            contacts: ContactCache::new(),
            phantoms: PhantomTracker::new(),
            listeners: ListenerRegistry::new(),
            reporter: None,
            time: 0.0,
            stats: EnvironmentStats::default(),
            next_body_id: 0,
        })
    }

    /// Create an environment that routes construction errors to `reporter`
    pub fn with_reporter(config: EnvironmentConfig, mut reporter: Box<dyn ErrorReporter>) -> PhysicsResult<Self> {
        match Self::new(config) {
            Ok(mut env) => {
                env.reporter = Some(reporter);
                Ok(env)
            }
            Err(err) => {
                log::error!("environment creation failed: {err}");
                reporter.report(&err);
                Err(err)
            }
        }
    }

    fn report(&mut self, err: PhysicsError) -> PhysicsError {
        log::error!("{err}");
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.report(&err);
        }
        err
    }

    /// Configuration in use
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Gravity vector
    pub fn gravity(&self) -> DVec3 {
        self.config.gravity
    }

    /// Accumulated simulated time since creation or the last reset
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Zero the clock without touching body state
    pub fn reset_time(&mut self) {
        self.time = 0.0;
    }

    /// Profiling counters
    pub fn stats(&self) -> EnvironmentStats {
        self.stats
    }

    // ========================================================================
    // Collision configuration
    // ========================================================================

    /// Set or clear `to_mask` in the mask of `layer`
    pub fn set_collision_layer_masks(&mut self, layer: u32, to_mask: u32, enable: bool) {
        self.layers.set_masks(layer, to_mask, enable);
    }

    /// Layer mask table
    pub fn layer_masks(&self) -> &LayerMaskTable {
        &self.layers
    }

    /// Allocate a fresh system group id
    pub fn new_system_group(&mut self) -> u32 {
        self.groups.allocate()
    }

    /// True if `a` and `b` may produce contacts under the current filters
    pub fn can_collide(&self, a: BodyHandle, b: BodyHandle) -> bool {
        match (self.bodies.get(a), self.bodies.get(b)) {
            (Some(x), Some(y)) => a != b && self.layers.can_collide(&x.filter, &y.filter),
            _ => false,
        }
    }

    // ========================================================================
    // Surfaces
    // ========================================================================

    /// True if a surface named `name` is cached
    pub fn surface_exists(&self, name: &str) -> bool {
        self.surfaces.contains(name)
    }

    /// Number of cached surfaces
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Forget every cached surface (bodies keep their shapes)
    pub fn delete_all_surfaces(&mut self) {
        self.surfaces.clear();
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    /// Build a body from `desc` and insert it
    pub fn physicalize(&mut self, desc: &BodyDesc) -> PhysicsResult<BodyHandle> {
        let shape = match self.resolve_shape(desc) {
            Ok(shape) => shape,
            Err(err) => return Err(self.report(err)),
        };
        self.next_body_id = self.next_body_id.wrapping_add(1);
        let handle = self.bodies.insert(desc.build(self.next_body_id, shape));
        log::debug!("physicalized {:?} as {handle:?}", desc.name);
        Ok(handle)
    }

    fn resolve_shape(&mut self, desc: &BodyDesc) -> PhysicsResult<Arc<Shape>> {
        if desc.use_ball {
            return Ok(Arc::new(Shape::ball(desc.ball_radius)?));
        }
        if desc.use_exists_surface {
            return self
                .surfaces
                .get(&desc.surface_name)
                .ok_or_else(|| PhysicsError::SurfaceNotFound {
                    name: desc.surface_name.clone(),
                });
        }
        let shape = Arc::new(Shape::from_geometry(
            &desc.convex,
            &desc.concave,
            desc.enable_convex_hull,
        )?);
        if !desc.surface_name.is_empty() {
            self.surfaces.insert(desc.surface_name.clone(), Arc::clone(&shape));
        }
        Ok(shape)
    }

    /// Remove a body with everything attached to it.
    ///
    /// Pending contact-end and phantom-exit notifications are delivered
    /// immediately unless `silently` is set, in which case they are dropped.
    pub fn unphysicalize(&mut self, body: BodyHandle, silently: bool) -> PhysicsResult<()> {
        if !self.bodies.contains(body) {
            return Err(invalid_body());
        }
        self.joints.retain(|_, j| !j.involves(body));
        self.forces.retain(|_, f| f.a.body != body && f.b.body != body);
        self.springs.retain(|_, s| s.a.body != body && s.b.body != body);
        self.motions.retain(|_, m| m.body != body);
        self.coll_detections.retain(|_, d| d.body != body);
        self.contract_detections.retain(|_, d| d.body != body);

        let ended = self.contacts.remove_body(body);
        let exits = self.phantoms.remove_body(body);
        for m in &ended {
            if let Some(other) = self.bodies.get_mut(m.pair.other(body)) {
                other.wake();
            }
        }
        if silently {
            self.listeners.discard_pending_for(body);
        } else {
            self.end_contacts_queued(&ended);
            self.queue_phantom_transitions(&exits);
            self.listeners.dispatch();
        }
        self.listeners.remove_body(body);
        self.bodies.remove(body);
        log::debug!("unphysicalized {body:?}");
        Ok(())
    }

    /// Body by handle
    pub fn body(&self, body: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(body)
    }

    /// Every live body
    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies.iter()
    }

    /// Number of live bodies
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn body_mut(&mut self, body: BodyHandle) -> PhysicsResult<&mut RigidBody> {
        self.bodies.get_mut(body).ok_or_else(invalid_body)
    }

    fn body_ref(&self, body: BodyHandle) -> PhysicsResult<&RigidBody> {
        self.bodies.get(body).ok_or_else(invalid_body)
    }

    /// Store a host value on the body
    pub fn set_user_data(&mut self, body: BodyHandle, user_data: usize) -> PhysicsResult<()> {
        self.body_mut(body)?.user_data = user_data;
        Ok(())
    }

    /// Rename the body
    pub fn set_name(&mut self, body: BodyHandle, name: impl Into<String>) -> PhysicsResult<()> {
        self.body_mut(body)?.name = name.into();
        Ok(())
    }

    /// Replace the host collision class id
    pub fn set_col_id(&mut self, body: BodyHandle, col_id: i32) -> PhysicsResult<()> {
        self.body_mut(body)?.col_id = col_id;
        Ok(())
    }

    /// Freeze an active body; returns `false` if it was not active
    pub fn freeze(&mut self, body: BodyHandle) -> PhysicsResult<bool> {
        let b = self.body_mut(body)?;
        if b.state != MotionState::Active {
            return Ok(false);
        }
        b.freeze();
        Ok(true)
    }

    /// Wake a frozen body
    pub fn wakeup(&mut self, body: BodyHandle) -> PhysicsResult<()> {
        self.body_mut(body)?.wake();
        Ok(())
    }

    /// True if the body is frozen
    pub fn is_fixed(&self, body: BodyHandle) -> PhysicsResult<bool> {
        Ok(self.body_ref(body)?.is_frozen())
    }

    /// Switch gravity for the body
    pub fn enable_gravity(&mut self, body: BodyHandle, enable: bool) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        if b.flags.contains(BodyFlags::GRAVITY) != enable {
            b.flags.set(BodyFlags::GRAVITY, enable);
            b.wake();
        }
        Ok(())
    }

    /// Switch integration for the body
    pub fn enable_motion(&mut self, body: BodyHandle, enable: bool) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        if b.flags.contains(BodyFlags::MOTION) == enable {
            return Ok(());
        }
        b.flags.set(BodyFlags::MOTION, enable);
        if enable {
            b.wake();
        } else {
            b.velocity = DVec3::ZERO;
            b.angular_velocity = DVec3::ZERO;
        }
        Ok(())
    }

    /// Replace the body's mass (0 makes it immovable)
    pub fn change_mass(&mut self, body: BodyHandle, mass: f64) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        if b.mass == mass {
            return Ok(());
        }
        b.set_mass(mass);
        b.wake();
        Ok(())
    }

    /// Switch the physically-unmovable flag
    pub fn change_unmovable_flag(&mut self, body: BodyHandle, unmovable: bool) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        if b.flags.contains(BodyFlags::UNMOVABLE) == unmovable {
            return Ok(());
        }
        b.flags.set(BodyFlags::UNMOVABLE, unmovable);
        if unmovable {
            b.velocity = DVec3::ZERO;
            b.angular_velocity = DVec3::ZERO;
        } else {
            b.wake();
        }
        Ok(())
    }

    /// Switch broad-phase participation; disabling ends current contacts
    pub fn enable_collision_detection(&mut self, body: BodyHandle, enable: bool) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        if b.collides() == enable {
            return Ok(());
        }
        b.flags.set(BodyFlags::COLLISION, enable);
        if !enable {
            let ended = self.contacts.remove_body(body);
            self.end_contacts(&ended);
        }
        Ok(())
    }

    /// Replace the body's collision filter
    pub fn set_layer(&mut self, body: BodyHandle, filter: CollisionFilter) -> PhysicsResult<()> {
        self.body_mut(body)?.filter = filter;
        Ok(())
    }

    /// Drop contacts of `body` that its current filter forbids
    pub fn recheck_collision_filter(&mut self, body: BodyHandle) -> PhysicsResult<()> {
        self.body_ref(body)?;
        let bodies = &self.bodies;
        let layers = &self.layers;
        let ended = self.contacts.retain(|m| {
            if !m.pair.contains(body) {
                return true;
            }
            match (bodies.get(m.pair.a), bodies.get(m.pair.b)) {
                (Some(a), Some(b)) => pair_allowed(layers, a, b),
                _ => false,
            }
        });
        self.end_contacts(&ended);
        Ok(())
    }

    /// Teleport the body.
    ///
    /// With `optimize_for_repeated_calls` the bounds refresh is deferred to
    /// the next step instead of running on every call.
    pub fn beam(
        &mut self,
        body: BodyHandle,
        position: DVec3,
        rotation: DQuat,
        optimize_for_repeated_calls: bool,
    ) -> PhysicsResult<()> {
        if !is_finite(position) || !rotation.is_finite() {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "beam target must be finite",
            });
        }
        let b = self.body_mut(body)?;
        b.set_pose(Pose::new(position, normalize_rotation(rotation)));
        if !optimize_for_repeated_calls {
            b.refresh_aabb();
        }
        b.wake();
        Ok(())
    }

    /// Apply an impulse at a world point
    pub fn apply_impulse(&mut self, body: BodyHandle, point: DVec3, impulse: DVec3) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        b.wake();
        b.apply_impulse_at(point, impulse);
        Ok(())
    }

    /// Apply an angular impulse (world axes)
    pub fn apply_torque(&mut self, body: BodyHandle, impulse: DVec3) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        b.wake();
        if b.is_movable() {
            b.apply_angular_impulse(impulse);
        }
        Ok(())
    }

    /// Add to the linear velocity
    pub fn add_speed(&mut self, body: BodyHandle, delta: DVec3) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        b.wake();
        if b.is_movable() {
            b.velocity += delta;
        }
        Ok(())
    }

    /// Linear speed
    pub fn speed(&self, body: BodyHandle) -> PhysicsResult<f64> {
        Ok(self.body_ref(body)?.velocity.length())
    }

    /// Linear velocity (world)
    pub fn velocity(&self, body: BodyHandle) -> PhysicsResult<DVec3> {
        Ok(self.body_ref(body)?.velocity)
    }

    /// Angular velocity in object axes
    pub fn angular_velocity_local(&self, body: BodyHandle) -> PhysicsResult<DVec3> {
        let b = self.body_ref(body)?;
        Ok(b.pose.inverse_transform_vector(b.angular_velocity))
    }

    /// Pose of the body frame
    pub fn pose(&self, body: BodyHandle) -> PhysicsResult<Pose> {
        Ok(self.body_ref(body)?.pose)
    }

    /// Object-space point to world space
    pub fn object_to_world_point(&self, body: BodyHandle, p: DVec3) -> PhysicsResult<DVec3> {
        Ok(self.body_ref(body)?.pose.transform_point(p))
    }

    /// World-space point to object space
    pub fn world_to_object_point(&self, body: BodyHandle, p: DVec3) -> PhysicsResult<DVec3> {
        Ok(self.body_ref(body)?.pose.inverse_transform_point(p))
    }

    /// Object-space direction to world space
    pub fn object_to_world_vector(&self, body: BodyHandle, v: DVec3) -> PhysicsResult<DVec3> {
        Ok(self.body_ref(body)?.pose.transform_vector(v))
    }

    /// World-space direction to object space
    pub fn world_to_object_vector(&self, body: BodyHandle, v: DVec3) -> PhysicsResult<DVec3> {
        Ok(self.body_ref(body)?.pose.inverse_transform_vector(v))
    }

    /// True if the last step left the two bodies touching
    pub fn is_contact(&self, a: BodyHandle, b: BodyHandle) -> bool {
        self.contacts.is_contact(a, b)
    }

    /// Contact manifolds of the last step, in pair order, including pairs
    /// that are inside the contact margin but not touching yet
    pub fn manifolds(&self) -> Vec<&ContactManifold> {
        self.contacts.manifolds()
    }

    // ========================================================================
    // Phantoms
    // ========================================================================

    /// Turn a body into a phantom volume grown by `extra_radius` (one-way)
    pub fn convert_to_phantom(
        &mut self,
        body: BodyHandle,
        extra_radius: f64,
        listener: Option<Box<dyn PhantomListener>>,
    ) -> PhysicsResult<()> {
        let b = self.body_mut(body)?;
        if !b.is_phantom() {
            b.state = MotionState::Phantom;
            b.margin += if extra_radius.is_finite() { extra_radius.max(0.0) } else { 0.0 };
            b.velocity = DVec3::ZERO;
            b.angular_velocity = DVec3::ZERO;
            b.refresh_aabb();
            self.phantoms.register(body);
            let ended = self.contacts.remove_body(body);
            self.end_contacts(&ended);
        }
        if let Some(listener) = listener {
            self.listeners.set_phantom_listener(body, listener);
        }
        Ok(())
    }

    /// True if `other` overlapped `phantom` in the last snapshot
    pub fn is_inside_phantom(&self, phantom: BodyHandle, other: BodyHandle) -> bool {
        self.phantoms.is_inside(phantom, other)
    }

    /// Number of bodies inside `phantom`
    pub fn phantom_count_inside(&self, phantom: BodyHandle) -> usize {
        self.phantoms.count_inside(phantom)
    }

    // ========================================================================
    // Listeners and detection helpers
    // ========================================================================

    /// Install collision and friction listeners on `body`
    pub fn set_collision_listener(
        &mut self,
        body: BodyHandle,
        listener: Option<Box<dyn CollisionListener>>,
        collision_call_sleep: f64,
        friction: Option<Box<dyn FrictionListener>>,
    ) -> PhysicsResult<()> {
        self.body_ref(body)?;
        self.listeners
            .set_collision_listener(body, listener, collision_call_sleep, friction);
        Ok(())
    }

    /// Remove the collision and friction listeners of `body`
    pub fn remove_collision_listener(&mut self, body: BodyHandle) -> bool {
        self.listeners.remove_collision_listener(body)
    }

    /// Install the contract listener of `body`
    pub fn set_contract_listener(&mut self, body: BodyHandle, listener: Box<dyn ContractListener>) -> PhysicsResult<()> {
        self.body_ref(body)?;
        self.listeners.set_contract_listener(body, listener);
        Ok(())
    }

    /// Remove the contract listener of `body`
    pub fn remove_contract_listener(&mut self, body: BodyHandle) -> bool {
        self.listeners.remove_contract_listener(body)
    }

    /// Register a speed-windowed impact trigger on `body`
    pub fn add_coll_detection(
        &mut self,
        body: BodyHandle,
        col_id: i32,
        min_speed: f64,
        max_speed: f64,
        sleep_afterwards: f64,
        speed_threshold: f64,
    ) -> PhysicsResult<CollDetectionHandle> {
        self.body_ref(body)?;
        Ok(self.coll_detections.insert(CollDetection::new(
            body,
            col_id,
            min_speed,
            max_speed,
            sleep_afterwards,
            speed_threshold,
        )))
    }

    /// Remove a collision detection helper
    pub fn remove_coll_detection(&mut self, handle: CollDetectionHandle) -> bool {
        self.coll_detections.remove(handle).is_some()
    }

    /// Register a debounced contact detector on `body`
    pub fn add_contract_detection(
        &mut self,
        body: BodyHandle,
        col_id: i32,
        delay_start: f64,
        delay_end: f64,
    ) -> PhysicsResult<ContractDetectionHandle> {
        self.body_ref(body)?;
        Ok(self
            .contract_detections
            .insert(ContractDetection::new(body, col_id, delay_start, delay_end)))
    }

    /// Remove a contact detection helper
    pub fn remove_contract_detection(&mut self, handle: ContractDetectionHandle) -> bool {
        self.contract_detections.remove(handle).is_some()
    }

    // ========================================================================
    // Joints
    // ========================================================================

    fn joint_end(&self, body: BodyHandle) -> PhysicsResult<JointEnd> {
        Ok((body, self.body_ref(body)?.mass_frame()))
    }

    fn other_end(&self, a: BodyHandle, b: Option<BodyHandle>) -> PhysicsResult<Option<JointEnd>> {
        match b {
            None => Ok(None),
            Some(b) if b == a => Err(PhysicsError::InvalidConstraint {
                reason: "constraint connects a body to itself",
            }),
            Some(b) => self.joint_end(b).map(Some),
        }
    }

    fn insert_joint(&mut self, joint: PhysicsResult<Joint>) -> PhysicsResult<JointHandle> {
        match joint {
            Ok(joint) => {
                let kind = joint.joint_type();
                let handle = self.joints.insert(joint);
                log::debug!("{kind:?} joint created as {handle:?}");
                Ok(handle)
            }
            Err(err) => Err(self.report(err)),
        }
    }

    /// Ball joint at the world point `anchor` (`b == None` pins to the world)
    pub fn add_ball_joint(&mut self, a: BodyHandle, b: Option<BodyHandle>, anchor: DVec3) -> PhysicsResult<JointHandle> {
        let compliance = self.config.solver.joint_compliance;
        let joint = self
            .joint_end(a)
            .and_then(|ea| Joint::ball(ea, self.other_end(a, b)?, anchor))
            .map(|j| j.with_compliance(compliance));
        self.insert_joint(joint)
    }

    /// Weld keeping the current relative pose
    pub fn add_fixed_constraint(&mut self, a: BodyHandle, b: Option<BodyHandle>) -> PhysicsResult<JointHandle> {
        let compliance = self.config.solver.joint_compliance;
        let joint = self
            .joint_end(a)
            .and_then(|ea| Ok(Joint::fixed(ea, self.other_end(a, b)?)))
            .map(|j| j.with_compliance(compliance));
        self.insert_joint(joint)
    }

    /// Hinge about the world axis `axis` through `anchor`
    pub fn add_hinge(
        &mut self,
        a: BodyHandle,
        b: Option<BodyHandle>,
        anchor: DVec3,
        axis: DVec3,
    ) -> PhysicsResult<JointHandle> {
        let compliance = self.config.solver.joint_compliance;
        let joint = self
            .joint_end(a)
            .and_then(|ea| Joint::hinge(ea, self.other_end(a, b)?, anchor, axis))
            .map(|j| j.with_compliance(compliance));
        self.insert_joint(joint)
    }

    /// Generic limited constraint.
    ///
    /// `force_factor` in `(0, 1]` sets the stiffness (1 = rigid) and
    /// `damp_factor` damps relative motion on limited axes.
    pub fn add_generic_constraint(
        &mut self,
        a: BodyHandle,
        b: Option<BodyHandle>,
        translation: AxisLimits,
        rotation: AxisLimits,
        force_factor: f64,
        damp_factor: f64,
    ) -> PhysicsResult<JointHandle> {
        let ff = if force_factor.is_finite() {
            force_factor.clamp(1.0e-3, 1.0)
        } else {
            1.0
        };
        let compliance = (1.0 / ff - 1.0) * self.config.solver.generic_compliance;
        let joint = self
            .joint_end(a)
            .and_then(|ea| {
                Ok(Joint::generic(
                    ea,
                    self.other_end(a, b)?,
                    translation,
                    rotation,
                    damp_factor,
                ))
            })
            .map(|j| j.with_compliance(compliance));
        self.insert_joint(joint)
    }

    /// Joint by handle
    pub fn joint(&self, joint: JointHandle) -> Option<&Joint> {
        self.joints.get(joint)
    }

    /// Destroy a joint
    pub fn remove_joint(&mut self, joint: JointHandle) -> bool {
        self.joints.remove(joint).is_some()
    }

    // ========================================================================
    // Forces, springs, motion controllers
    // ========================================================================

    /// Constant force pulling `a` toward `b` along the attachment line
    pub fn add_force(
        &mut self,
        a: BodyHandle,
        b: BodyHandle,
        point_a: DVec3,
        point_b: DVec3,
        value: f64,
        push_other: bool,
    ) -> PhysicsResult<ForceHandle> {
        self.body_ref(a)?;
        self.body_ref(b)?;
        let force = PointForce::new(Attachment::new(a, point_a), Attachment::new(b, point_b), value, push_other);
        Ok(self.forces.insert(force))
    }

    /// Retarget a force's magnitude
    pub fn set_force_value(&mut self, force: ForceHandle, value: f64) -> PhysicsResult<()> {
        let f = self
            .forces
            .get_mut(force)
            .ok_or(PhysicsError::InvalidHandle { kind: "force" })?;
        f.value = value;
        Ok(())
    }

    /// Destroy a force
    pub fn remove_force(&mut self, force: ForceHandle) -> bool {
        self.forces.remove(force).is_some()
    }

    /// Insert a spring between two live bodies
    pub fn add_spring(&mut self, spring: Spring) -> PhysicsResult<SpringHandle> {
        self.body_ref(spring.a.body)?;
        self.body_ref(spring.b.body)?;
        if spring.a.body == spring.b.body {
            let err = PhysicsError::InvalidConstraint {
                reason: "spring connects a body to itself",
            };
            return Err(self.report(err));
        }
        Ok(self.springs.insert(spring))
    }

    /// Spring by handle
    pub fn spring(&self, spring: SpringHandle) -> Option<&Spring> {
        self.springs.get(spring)
    }

    /// Destroy a spring
    pub fn remove_spring(&mut self, spring: SpringHandle) -> bool {
        self.springs.remove(spring).is_some()
    }

    /// Motion controller tracking `target`, holding the current orientation
    pub fn add_motion_controller(
        &mut self,
        body: BodyHandle,
        target: DVec3,
        max_translation_force: DVec3,
        max_torque: f64,
        gains: MotionGains,
    ) -> PhysicsResult<MotionHandle> {
        let rotation = self.body_ref(body)?.pose.rotation;
        Ok(self.motions.insert(MotionController::new(
            body,
            target,
            rotation,
            max_translation_force,
            max_torque,
            gains,
        )))
    }

    /// Motion controller by handle
    pub fn motion_controller(&self, controller: MotionHandle) -> Option<&MotionController> {
        self.motions.get(controller)
    }

    /// Mutable motion controller for retargeting
    pub fn motion_controller_mut(&mut self, controller: MotionHandle) -> Option<&mut MotionController> {
        self.motions.get_mut(controller)
    }

    /// Destroy a motion controller
    pub fn remove_motion_controller(&mut self, controller: MotionHandle) -> bool {
        self.motions.remove(controller).is_some()
    }

    // ========================================================================
    // Raycasting
    // ========================================================================

    /// Every hit along the ray, nearest first (`flag` = layer bitmask, 0 = all)
    pub fn raycast(&self, origin: DVec3, direction: DVec3, length: f64, flag: u32) -> Vec<RayHit> {
        match Ray::new(origin, direction, length) {
            Some(ray) => raycast::cast_all(&self.bodies, &ray, flag),
            None => {
                log::warn!("raycast with a degenerate ray ignored");
                Vec::new()
            }
        }
    }

    /// Nearest hit along the ray
    pub fn raycast_one(&self, origin: DVec3, direction: DVec3, length: f64, flag: u32) -> Option<RayHit> {
        let Some(ray) = Ray::new(origin, direction, length) else {
            log::warn!("raycast with a degenerate ray ignored");
            return None;
        };
        raycast::cast_closest(&self.bodies, &ray, flag)
    }

    /// Hit against one body
    pub fn raycast_object(&self, body: BodyHandle, origin: DVec3, direction: DVec3, length: f64) -> Option<RayHit> {
        let ray = Ray::new(origin, direction, length)?;
        raycast::cast_body(&self.bodies, body, &ray)
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// One step of `dt` seconds
    pub fn simulate_dtime(&mut self, dt: f64) {
        self.step(dt, self.config.solver.substeps);
    }

    /// Fixed steps until the clock reaches `time`; returns the steps taken.
    ///
    /// No time is dropped: the call runs as many steps as it takes, unless
    /// `max_internal_steps` caps it, in which case the rest is left for the
    /// next call.
    pub fn simulate_until(&mut self, time: f64) -> usize {
        let h = self.config.step_size();
        let max_steps = self.config.solver.max_internal_steps.map_or(usize::MAX, |n| n.max(1));
        let mut steps = 0;
        while self.time + TIME_EPSILON < time && steps < max_steps {
            self.step(h, self.config.solver.substeps);
            steps += 1;
        }
        steps
    }

    /// One step of `dt` seconds without substepping
    pub fn simulate_variable_time_step(&mut self, dt: f64) {
        self.step(dt, 1);
    }

    /// Flush deferred work (bounds refreshes, pending events) without stepping
    pub fn do_update_all(&mut self) {
        self.refresh_dirty_aabbs();
        self.listeners.dispatch();
    }

    /// Re-evaluate contact detection helpers at the current time
    pub fn update_contact_detection(&mut self) {
        self.update_detections(&[], 0.0);
        self.listeners.dispatch();
    }

    fn step(&mut self, dt: f64, substeps: usize) {
        if !(dt.is_finite() && dt > 0.0) {
            log::warn!("ignored step of {dt} s");
            return;
        }
        let started = Instant::now();
        self.refresh_dirty_aabbs();

        let handles = self.bodies.handles();
        let index: HashMap<BodyHandle, usize> = handles.iter().enumerate().map(|(i, h)| (*h, i)).collect();

        let loads = self.evaluate_loads(&index, dt);
        let pairs = self.broad_phase(&handles);
        self.narrow_phase(&handles, &pairs);
        let ended = self.contacts.end_step();
        self.wake_touched();
        self.solve(&handles, &index, &loads, dt, substeps);
        let transitions = self.update_phantoms();

        self.listeners.advance(dt);
        self.end_contacts_queued(&ended);
        let (fresh, released) = self.contacts.update_touching();
        self.end_contacts_queued(&released);
        for m in &fresh {
            self.queue_collision(m);
            self.queue_friction(m, true);
        }
        self.queue_phantom_transitions(&transitions);
        self.update_detections(&fresh, dt);
        self.contacts.age_all();

        self.update_sleep(&handles, &index, &loads, dt);

        self.time += dt;
        self.stats.steps += 1;
        self.stats.simulated_time += dt;
        self.stats.broadphase_pairs = pairs.len();
        self.stats.contact_points = self.contacts.total_contact_points();
        self.stats.active_time += started.elapsed().as_secs_f64();
        log::trace!(
            "step {}: {} pairs, {} contact points, {} events",
            self.stats.steps,
            pairs.len(),
            self.stats.contact_points,
            self.listeners.pending().len()
        );

        self.listeners.dispatch();
    }

    fn refresh_dirty_aabbs(&mut self) {
        for (_, body) in self.bodies.iter_mut() {
            if body.aabb_dirty {
                body.refresh_aabb();
            }
        }
    }

    fn evaluate_loads(&mut self, index: &HashMap<BodyHandle, usize>, dt: f64) -> Vec<Load> {
        let mut applied: Vec<(BodyHandle, DVec3, DVec3)> = Vec::new();
        let mut torques: Vec<(BodyHandle, DVec3)> = Vec::new();

        for (_, force) in self.forces.iter() {
            let (Some(a), Some(b)) = (self.bodies.get(force.a.body), self.bodies.get(force.b.body)) else {
                continue;
            };
            let (pa, pb) = (force.a.sample(a), force.b.sample(b));
            let pair = force.evaluate(&pa, &pb);
            applied.push((force.a.body, pa.position, pair.on_a));
            applied.push((force.b.body, pb.position, pair.on_b));
        }
        for (_, spring) in self.springs.iter() {
            let (Some(a), Some(b)) = (self.bodies.get(spring.a.body), self.bodies.get(spring.b.body)) else {
                continue;
            };
            let (pa, pb) = (spring.a.sample(a), spring.b.sample(b));
            let pair = spring.evaluate(&pa, &pb, dt);
            applied.push((spring.a.body, pa.position, pair.on_a));
            applied.push((spring.b.body, pb.position, pair.on_b));
        }
        for (_, controller) in self.motions.iter() {
            let Some(body) = self.bodies.get(controller.body) else {
                continue;
            };
            let (force, torque) = controller.compute(
                body.pose.position,
                body.pose.rotation,
                body.velocity,
                body.angular_velocity,
            );
            applied.push((controller.body, body.center_of_mass_world(), force));
            torques.push((controller.body, torque));
        }

        let mut loads = vec![Load::default(); index.len()];
        for (handle, point, force) in applied {
            if force.length_squared() < EPSILON * EPSILON {
                continue;
            }
            let (Some(&i), Some(body)) = (index.get(&handle), self.bodies.get_mut(handle)) else {
                continue;
            };
            if !body.is_dynamic() {
                continue;
            }
            body.wake();
            loads[i].force += force;
            loads[i].torque += (point - body.center_of_mass_world()).cross(force);
            loads[i].driven = true;
        }
        for (handle, torque) in torques {
            if torque.length_squared() < EPSILON * EPSILON {
                continue;
            }
            let (Some(&i), Some(body)) = (index.get(&handle), self.bodies.get_mut(handle)) else {
                continue;
            };
            if !body.is_dynamic() {
                continue;
            }
            body.wake();
            loads[i].torque += torque;
            loads[i].driven = true;
        }
        loads
    }

    fn broad_phase(&mut self, handles: &[BodyHandle]) -> Vec<(usize, usize)> {
        let margin = self.config.solver.contact_margin;
        let bodies = &self.bodies;
        self.broadphase
            .rebuild(handles.iter().enumerate().filter_map(|(i, h)| {
                let body = bodies.get(*h)?;
                (body.collides() && !body.is_phantom()).then(|| Proxy {
                    index: i,
                    aabb: body.world_aabb.expanded(margin),
                })
            }));
        let layers = &self.layers;
        self.broadphase.query_pairs(|i, j| {
            let (Some(a), Some(b)) = (bodies.get(handles[i]), bodies.get(handles[j])) else {
                return false;
            };
            pair_allowed(layers, a, b)
        })
    }

    fn narrow_phase(&mut self, handles: &[BodyHandle], pairs: &[(usize, usize)]) {
        let skin = self.config.solver.contact_margin;
        let max_points = self
            .config
            .solver
            .max_contacts_per_pair
            .clamp(1, MAX_MANIFOLD_POINTS);
        self.contacts.begin_step();
        let mut points = Vec::new();
        for &(i, j) in pairs {
            let pair = BodyPair::new(handles[i], handles[j]);
            let (Some(a), Some(b)) = (self.bodies.get(pair.a), self.bodies.get(pair.b)) else {
                continue;
            };
            points.clear();
            if collide(&posed(a), &posed(b), skin, &mut points) == 0 {
                continue;
            }
            points.sort_by(|x, y| y.depth.total_cmp(&x.depth));
            points.truncate(max_points);

            let (fa, fb) = (a.mass_frame(), b.mass_frame());
            let deepest = points[0];
            let approach = (a.point_velocity(deepest.point_a) - b.point_velocity(deepest.point_b)).dot(deepest.normal);
            let friction = (a.friction * b.friction).sqrt();
            let restitution = (a.elasticity * b.elasticity).sqrt();

            let manifold = self.contacts.get_or_create(pair, friction, restitution);
            manifold.refresh(&fa, &fb, skin, CONTACT_MATCH_DISTANCE);
            for p in &points {
                manifold.add_or_update(ManifoldPoint::new(p, &fa, &fb), CONTACT_MATCH_DISTANCE);
            }
            if !manifold.is_reported() {
                manifold.impact_speed = approach.max(0.0);
            }
        }
    }

    /// Wake frozen bodies touched or pulled by moving ones
    fn wake_touched(&mut self) {
        let threshold = self.config.sleep.energy_threshold;
        let moving = |b: &RigidBody| b.is_movable() && b.energy_per_mass() > threshold;
        let sleeping = |b: &RigidBody| b.is_dynamic() && b.is_frozen();

        let mut links: Vec<(BodyHandle, BodyHandle)> = self.contacts.manifolds().iter().map(|m| (m.pair.a, m.pair.b)).collect();
        links.extend(
            self.joints
                .iter()
                .filter_map(|(_, j)| j.body_b.map(|b| (j.body_a, b))),
        );

        let mut wake = Vec::new();
        for (x, y) in links {
            let (Some(a), Some(b)) = (self.bodies.get(x), self.bodies.get(y)) else {
                continue;
            };
            if moving(a) && sleeping(b) {
                wake.push(y);
            }
            if moving(b) && sleeping(a) {
                wake.push(x);
            }
        }
        for h in wake {
            if let Some(body) = self.bodies.get_mut(h) {
                body.wake();
            }
        }
    }

    fn solve(
        &mut self,
        handles: &[BodyHandle],
        index: &HashMap<BodyHandle, usize>,
        loads: &[Load],
        dt: f64,
        substeps: usize,
    ) {
        let mut config = self.config.solver;
        config.substeps = substeps.max(1);
        self.solver.config = config;
        self.solver.clear();

        for (i, h) in handles.iter().enumerate() {
            let sb = match self.bodies.get(*h) {
                Some(body) => solver_body(*h, body, &loads[i]),
                None => SolverBody::fixed(*h, Pose::IDENTITY),
            };
            self.solver.bodies.push(sb);
        }

        let mut keys: Vec<(BodyPair, usize)> = Vec::new();
        for m in self.contacts.manifolds() {
            let (Some(&a), Some(&b)) = (index.get(&m.pair.a), index.get(&m.pair.b)) else {
                continue;
            };
            for (k, p) in m.points.iter().enumerate() {
                self.solver.contacts.push(SolverContact {
                    a,
                    b,
                    local_a: p.local_a,
                    local_b: p.local_b,
                    normal: p.normal,
                    friction: m.friction,
                    restitution: m.restitution,
                    lambda_n: 0.0,
                    max_lambda_n: 0.0,
                    approach_speed: 0.0,
                });
                keys.push((m.pair, k));
            }
        }

        let joint_refs: Vec<JointRef<'_>> = self
            .joints
            .iter()
            .filter_map(|(_, joint)| {
                let a = *index.get(&joint.body_a)?;
                let b = match joint.body_b {
                    Some(h) => Some(*index.get(&h)?),
                    None => None,
                };
                Some(JointRef {
                    joint,
                    a: Some(a),
                    b,
                })
            })
            .collect();

        self.solver.step(&joint_refs, self.config.gravity, dt);

        for (i, h) in handles.iter().enumerate() {
            let sb = self.solver.bodies[i];
            let Some(body) = self.bodies.get_mut(*h) else {
                continue;
            };
            if !body.is_movable() {
                continue;
            }
            if !(is_finite(sb.x) && sb.q.is_finite() && is_finite(sb.v) && is_finite(sb.w)) {
                log::warn!("body {h:?} produced a non-finite state; left at its last pose");
                body.velocity = DVec3::ZERO;
                body.angular_velocity = DVec3::ZERO;
                continue;
            }
            let rotation = normalize_rotation(sb.q);
            body.pose = Pose::new(sb.x - rotation * body.center_of_mass, rotation);
            body.velocity = sb.v;
            body.angular_velocity = sb.w;
            body.refresh_aabb();
        }

        for (contact, (pair, k)) in self.solver.contacts.iter().zip(keys) {
            if let Some(point) = self.contacts.find_mut(&pair).and_then(|m| m.points.get_mut(k)) {
                point.lambda_n = contact.max_lambda_n;
            }
        }
    }

    fn update_phantoms(&mut self) -> Vec<PhantomTransition> {
        let mut transitions = Vec::new();
        let mut scratch = Vec::new();
        for phantom in self.phantoms.phantoms() {
            let inside: BTreeSet<BodyHandle> = match self.bodies.get(phantom) {
                Some(p) if p.collides() => {
                    let region = p.current_aabb();
                    self.bodies
                        .iter()
                        .filter(|(h, b)| {
                            *h != phantom
                                && !b.is_phantom()
                                && b.collides()
                                && self.layers.can_collide(&p.filter, &b.filter)
                                && region.intersects(&b.current_aabb())
                        })
                        .filter(|(_, b)| overlaps(p, b, &mut scratch))
                        .map(|(h, _)| h)
                        .collect()
                }
                _ => BTreeSet::new(),
            };
            self.phantoms.update(phantom, inside, &mut transitions);
        }
        transitions
    }

    fn update_detections(&mut self, fresh: &[ContactManifold], dt: f64) {
        let mut fired = Vec::new();
        let bodies = &self.bodies;
        let class_of = |h: BodyHandle| bodies.get(h).map(|b| b.col_id);

        for (_, det) in self.coll_detections.iter_mut() {
            let Some(body) = bodies.get(det.body) else {
                continue;
            };
            let impact = fresh
                .iter()
                .filter(|m| m.pair.contains(det.body) && class_of(m.pair.other(det.body)) == Some(det.col_id))
                .map(|m| m.impact_speed)
                .reduce(f64::max);
            if let Some(speed_percent) = det.update(impact, body.velocity.length(), dt) {
                fired.push(ContractEvent {
                    body: EventBody {
                        handle: det.body,
                        user_data: body.user_data,
                    },
                    col_id: det.col_id,
                    kind: ContractKind::Collision,
                    speed_percent,
                    is_on: true,
                });
            }
        }

        for (_, det) in self.contract_detections.iter_mut() {
            let Some(body) = bodies.get(det.body) else {
                continue;
            };
            let touching = self
                .contacts
                .touching(det.body)
                .any(|m| class_of(m.pair.other(det.body)) == Some(det.col_id));
            if let Some(is_on) = det.update(touching, dt) {
                fired.push(ContractEvent {
                    body: EventBody {
                        handle: det.body,
                        user_data: body.user_data,
                    },
                    col_id: det.col_id,
                    kind: ContractKind::Contact,
                    speed_percent: 1.0,
                    is_on,
                });
            }
        }

        for event in fired {
            self.listeners.queue_contract(event);
        }
    }

    fn update_sleep(&mut self, handles: &[BodyHandle], index: &HashMap<BodyHandle, usize>, loads: &[Load], dt: f64) {
        let config = self.config.sleep;
        if !config.enabled {
            return;
        }
        let n = handles.len();
        let mut movable = vec![false; n];
        let mut ready = vec![false; n];
        for (i, h) in handles.iter().enumerate() {
            let Some(body) = self.bodies.get_mut(*h) else {
                continue;
            };
            if !body.is_movable() {
                continue;
            }
            movable[i] = true;
            if loads[i].driven {
                body.sleep.reset();
                continue;
            }
            let energy = body.energy_per_mass();
            ready[i] = body.sleep.observe(energy, dt, &config);
        }

        let mut islands = IslandBuilder::new(n);
        let links = self
            .contacts
            .manifolds()
            .iter()
            .map(|m| (m.pair.a, m.pair.b))
            .chain(self.joints.iter().filter_map(|(_, j)| j.body_b.map(|b| (j.body_a, b))))
            .collect::<Vec<_>>();
        for (x, y) in links {
            if let (Some(&a), Some(&b)) = (index.get(&x), index.get(&y)) {
                if movable[a] && movable[b] {
                    islands.union(a, b);
                }
            }
        }

        for island in islands.islands() {
            if !island.iter().all(|&i| movable[i] && ready[i]) {
                continue;
            }
            for &i in &island {
                if let Some(body) = self.bodies.get_mut(handles[i]) {
                    body.freeze();
                }
            }
            log::trace!("island of {} bodies fell asleep", island.len());
        }
    }

    // ========================================================================
    // Event helpers
    // ========================================================================

    fn event_body(&self, handle: BodyHandle) -> EventBody {
        EventBody {
            handle,
            user_data: self.bodies.get(handle).map_or(0, |b| b.user_data),
        }
    }

    /// World contact point and A -> B normal of a manifold
    fn contact_geometry(&self, m: &ContactManifold) -> (DVec3, DVec3) {
        let normal = m.normal();
        let (Some(a), Some(b)) = (self.bodies.get(m.pair.a), self.bodies.get(m.pair.b)) else {
            return (DVec3::ZERO, normal);
        };
        let (fa, fb) = (a.mass_frame(), b.mass_frame());
        let point = match m.deepest() {
            Some(p) => {
                let (wa, wb) = p.world_points(&fa, &fb);
                (wa + wb) * 0.5
            }
            None => (fa.position + fb.position) * 0.5,
        };
        (point, normal)
    }

    fn queue_collision(&mut self, m: &ContactManifold) {
        let (point, normal) = self.contact_geometry(m);
        let (a, b) = (self.event_body(m.pair.a), self.event_body(m.pair.b));
        let speed = m.impact_speed;
        self.listeners.queue_collision(CollisionEvent {
            body: a,
            other: b,
            point,
            speed,
            normal: -normal,
        });
        self.listeners.queue_collision(CollisionEvent {
            body: b,
            other: a,
            point,
            speed,
            normal,
        });
    }

    fn queue_friction(&mut self, m: &ContactManifold, created: bool) {
        let (point, normal) = self.contact_geometry(m);
        let speed = match (self.bodies.get(m.pair.a), self.bodies.get(m.pair.b)) {
            (Some(a), Some(b)) => (a.point_velocity(point) - b.point_velocity(point)).length(),
            _ => 0.0,
        };
        let (a, b) = (self.event_body(m.pair.a), self.event_body(m.pair.b));
        for (body, other, normal) in [(a, b, -normal), (b, a, normal)] {
            self.listeners.queue_friction(FrictionEvent {
                created,
                body,
                other,
                friction_id: m.friction_id,
                point,
                speed,
                normal,
            });
        }
    }

    fn queue_phantom_transitions(&mut self, transitions: &[PhantomTransition]) {
        for t in transitions {
            let event = PhantomEvent {
                entered: t.entered,
                phantom: self.event_body(t.phantom),
                other: self.event_body(t.other),
            };
            self.listeners.queue_phantom(event);
        }
    }

    fn end_contacts_queued(&mut self, ended: &[ContactManifold]) {
        for m in ended.iter().filter(|m| m.is_reported()) {
            self.queue_friction(m, false);
        }
    }

    /// Report ended contacts outside a step
    fn end_contacts(&mut self, ended: &[ContactManifold]) {
        self.end_contacts_queued(ended);
        self.listeners.dispatch();
    }
}

/// Contact eligibility shared by the broad phase and filter rechecks.
///
/// Two immovable bodies never produce a contact; sleeping bodies keep theirs.
fn pair_allowed(layers: &LayerMaskTable, a: &RigidBody, b: &RigidBody) -> bool {
    (a.is_dynamic() || b.is_dynamic()) && layers.can_collide(&a.filter, &b.filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{PointBuffer, Polyhedron};
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn env() -> Environment {
        Environment::new(EnvironmentConfig::default().with_gravity(DVec3::new(0.0, -9.81, 0.0))).unwrap()
    }

    fn floor_desc() -> BodyDesc {
        let floor = Polyhedron::new(
            vec![
                DVec3::new(-10.0, 0.0, -10.0),
                DVec3::new(10.0, 0.0, -10.0),
                DVec3::new(10.0, 0.0, 10.0),
                DVec3::new(-10.0, 0.0, 10.0),
            ],
            vec![0, 2, 1, 0, 3, 2],
        );
        BodyDesc::concave("floor", vec![floor]).with_mass(0.0)
    }

    fn cube_points(half: f64) -> PointBuffer {
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

    fn run(env: &mut Environment, seconds: f64) {
        let steps = (seconds * env.config().simulation_rate).round() as usize;
        for _ in 0..steps {
            env.simulate_dtime(env.config().step_size());
        }
    }

    #[test]
    fn test_invalid_config_reported() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = EnvironmentConfig::default().with_simulation_rate(0.0);
        let result = Environment::with_reporter(
            config,
            Box::new(move |e: &PhysicsError| {
                if let Ok(mut codes) = sink.lock() {
                    codes.push(e.code());
                }
            }),
        );
        assert!(result.is_err());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_ball_falls_and_rests_on_floor() {
        let mut env = env();
        env.physicalize(&floor_desc()).unwrap();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 2.0, 0.0)))
            .unwrap();
        run(&mut env, 3.0);
        let y = env.pose(ball).unwrap().position.y;
        assert!((y - 0.5).abs() < 0.05, "ball rests at {y}");
        assert!(env.speed(ball).unwrap() < 0.1);
    }

    #[test]
    fn test_unmovable_body_invariant() {
        let mut env = env();
        let desc = BodyDesc::convex("crate", vec![cube_points(0.5)])
            .with_mass(0.0)
            .with_position(DVec3::new(1.0, 2.0, 3.0));
        let block = env.physicalize(&desc).unwrap();
        let pusher = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(1.0, 3.2, 3.0)))
            .unwrap();
        env.add_force(block, pusher, DVec3::ZERO, DVec3::ZERO, 100.0, true).unwrap();
        env.apply_impulse(block, DVec3::ZERO, DVec3::X * 50.0).unwrap();
        let before = env.pose(block).unwrap();
        run(&mut env, 1.0);
        assert_eq!(env.pose(block).unwrap(), before);
        assert_eq!(env.velocity(block).unwrap(), DVec3::ZERO);
    }

    #[test]
    fn test_immovable_pairs_never_touch() {
        let mut env = env();
        let a = env
            .physicalize(&BodyDesc::ball("a", 1.0).with_mass(0.0))
            .unwrap();
        let b = env
            .physicalize(&BodyDesc::ball("b", 1.0).with_mass(0.0).with_position(DVec3::X * 0.5))
            .unwrap();
        let hits = Rc::new(RefCell::new(0));
        let sink = hits.clone();
        env.set_collision_listener(a, Some(Box::new(move |_: &CollisionEvent| *sink.borrow_mut() += 1)), 0.0, None)
            .unwrap();
        run(&mut env, 0.5);
        assert!(!env.is_contact(a, b));
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn test_collision_listener_fires_on_impact() {
        let mut env = env();
        let floor = env.physicalize(&floor_desc()).unwrap();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 1.5, 0.0)))
            .unwrap();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = hits.clone();
        env.set_collision_listener(
            ball,
            Some(Box::new(move |e: &CollisionEvent| sink.borrow_mut().push((e.other.handle, e.speed, e.normal)))),
            10.0,
            None,
        )
        .unwrap();
        run(&mut env, 1.5);
        let hits = hits.borrow();
        assert_eq!(hits.len(), 1, "throttled to one call");
        assert_eq!(hits[0].0, floor);
        assert!(hits[0].1 > 3.0);
        assert!(hits[0].2.y > 0.9, "normal points toward the ball");
        assert!(env.is_contact(ball, floor));
    }

    #[test]
    fn test_resting_contact_records_solver_load() {
        let mut env = env();
        env.physicalize(&floor_desc()).unwrap();
        env.physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 1.0, 0.0)))
            .unwrap();
        run(&mut env, 0.6);
        let manifolds = env.manifolds();
        assert_eq!(manifolds.len(), 1);
        assert!(manifolds[0].points.iter().any(|p| p.lambda_n > 0.0));
        assert!(manifolds[0].is_touching());
    }

    #[test]
    fn test_recheck_filter_drops_immovable_pair() {
        let mut env = env();
        let floor = env.physicalize(&floor_desc()).unwrap();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 1.0, 0.0)))
            .unwrap();
        let ended = Rc::new(RefCell::new(0));
        let sink = ended.clone();
        env.set_collision_listener(
            ball,
            None,
            0.0,
            Some(Box::new(move |e: &FrictionEvent| {
                if !e.created {
                    *sink.borrow_mut() += 1;
                }
            })),
        )
        .unwrap();
        run(&mut env, 0.6);
        assert!(env.is_contact(ball, floor));
        *ended.borrow_mut() = 0;

        env.change_unmovable_flag(ball, true).unwrap();
        env.recheck_collision_filter(ball).unwrap();
        assert!(!env.is_contact(ball, floor));
        assert!(env.manifolds().is_empty());
        assert_eq!(*ended.borrow(), 1);
    }

    #[test]
    fn test_gravity_disabled_stays_put() {
        let mut env = env();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 5.0, 0.0)))
            .unwrap();
        env.enable_gravity(ball, false).unwrap();
        run(&mut env, 1.0);
        assert_relative_eq!(env.pose(ball).unwrap().position.y, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_freeze_twice_is_noop() {
        let mut env = env();
        let ball = env.physicalize(&BodyDesc::ball("ball", 0.5)).unwrap();
        assert!(env.freeze(ball).unwrap());
        assert!(!env.freeze(ball).unwrap());
        assert!(env.is_fixed(ball).unwrap());
        run(&mut env, 0.5);
        assert_eq!(env.pose(ball).unwrap().position, DVec3::ZERO);
        env.wakeup(ball).unwrap();
        run(&mut env, 0.5);
        assert!(env.pose(ball).unwrap().position.y < -0.5);
    }

    #[test]
    fn test_simulate_until_into_past_does_nothing() {
        let mut env = env();
        let ball = env.physicalize(&BodyDesc::ball("ball", 0.5)).unwrap();
        assert!(env.simulate_until(0.1) > 0);
        let t = env.time();
        let pose = env.pose(ball).unwrap();
        assert_eq!(env.simulate_until(t - 0.05), 0);
        assert_eq!(env.time(), t);
        assert_eq!(env.pose(ball).unwrap(), pose);
    }

    #[test]
    fn test_simulate_until_cap_is_opt_in() {
        let mut env = Environment::new(EnvironmentConfig {
            solver: crate::config::SolverConfig {
                max_internal_steps: Some(8),
                ..crate::config::SolverConfig::default()
            },
            ..EnvironmentConfig::default()
        })
        .unwrap();
        assert_eq!(env.simulate_until(100.0), 8);
        assert_eq!(env.simulate_until(100.0), 8);
        env.reset_time();
        assert_eq!(env.time(), 0.0);
        assert!(env.stats().simulated_time > 0.0);
    }

    #[test]
    fn test_surface_reuse_and_missing_surface() {
        let mut env = env();
        let desc = BodyDesc::convex("crate", vec![cube_points(0.5)]).with_surface_name("crate");
        env.physicalize(&desc).unwrap();
        assert!(env.surface_exists("crate"));
        env.physicalize(&BodyDesc::from_surface("crate2", "crate")).unwrap();
        env.delete_all_surfaces();
        let err = env.physicalize(&BodyDesc::from_surface("crate3", "crate")).unwrap_err();
        assert!(matches!(err, PhysicsError::SurfaceNotFound { .. }));
    }

    #[test]
    fn test_degenerate_shape_reported() {
        let seen = Arc::new(std::sync::Mutex::new(0));
        let sink = Arc::clone(&seen);
        let mut env = Environment::with_reporter(
            EnvironmentConfig::default(),
            Box::new(move |_: &PhysicsError| {
                if let Ok(mut n) = sink.lock() {
                    *n += 1;
                }
            }),
        )
        .unwrap();
        let flat = PointBuffer::new(vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::new(1.0, 1.0, 0.0)]);
        let err = env.physicalize(&BodyDesc::convex("flat", vec![flat])).unwrap_err();
        assert!(matches!(err, PhysicsError::DegenerateShape { .. }));
        let err = env.physicalize(&BodyDesc::convex("empty", Vec::new())).unwrap_err();
        assert_eq!(err, PhysicsError::EmptyShape);
        assert_eq!(*seen.lock().unwrap(), 2);
        assert_eq!(env.body_count(), 0);
    }

    #[test]
    fn test_phantom_enter_exit() {
        let mut env = env();
        let zone = env
            .physicalize(&BodyDesc::convex("zone", vec![cube_points(1.0)]).with_position(DVec3::new(0.0, -3.0, 0.0)))
            .unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        env.convert_to_phantom(
            zone,
            0.0,
            Some(Box::new(move |e: &PhantomEvent| sink.borrow_mut().push(e.entered))),
        )
        .unwrap();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.25).with_position(DVec3::ZERO))
            .unwrap();
        run(&mut env, 2.0);
        assert_eq!(*events.borrow(), vec![true, false]);
        assert!(!env.is_inside_phantom(zone, ball));
        // Phantom never moved and never pushed the ball
        assert_eq!(env.pose(zone).unwrap().position, DVec3::new(0.0, -3.0, 0.0));
    }

    #[test]
    fn test_unphysicalize_reports_contact_end_unless_silent() {
        for silently in [false, true] {
            let mut env = env();
            let floor = env.physicalize(&floor_desc()).unwrap();
            let ball = env
                .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 0.5, 0.0)))
                .unwrap();
            let log = Rc::new(RefCell::new(Vec::new()));
            let sink = log.clone();
            env.set_collision_listener(
                floor,
                None,
                0.0,
                Some(Box::new(move |e: &FrictionEvent| sink.borrow_mut().push(e.created))),
            )
            .unwrap();
            run(&mut env, 0.2);
            assert_eq!(*log.borrow(), vec![true]);
            env.unphysicalize(ball, silently).unwrap();
            let expected = if silently { vec![true] } else { vec![true, false] };
            assert_eq!(*log.borrow(), expected);
            assert!(env.body(ball).is_none());
        }
    }

    #[test]
    fn test_layer_masks_prevent_contact() {
        let mut env = env();
        let floor = env.physicalize(&floor_desc().with_layer(1)).unwrap();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_layer(2).with_position(DVec3::new(0.0, 0.6, 0.0)))
            .unwrap();
        assert!(env.can_collide(floor, ball));
        env.set_collision_layer_masks(2, 1 << 1, false);
        assert!(!env.can_collide(floor, ball));
        run(&mut env, 0.5);
        assert!(env.pose(ball).unwrap().position.y < 0.0, "ball fell through");
        env.set_collision_layer_masks(2, 1 << 1, true);
        assert!(env.can_collide(floor, ball));
    }

    #[test]
    fn test_contract_detection_reports_touching() {
        let mut env = env();
        let floor = env.physicalize(&floor_desc().with_col_id(7)).unwrap();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 0.5, 0.0)))
            .unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        env.set_contract_listener(
            ball,
            Box::new(move |e: &ContractEvent| sink.borrow_mut().push((e.kind, e.is_on))),
        )
        .unwrap();
        env.add_contract_detection(ball, 7, 0.05, 0.05).unwrap();
        run(&mut env, 0.5);
        assert_eq!(*log.borrow(), vec![(ContractKind::Contact, true)]);
        env.unphysicalize(floor, true).unwrap();
        run(&mut env, 0.5);
        assert_eq!(log.borrow().last(), Some(&(ContractKind::Contact, false)));
    }

    #[test]
    fn test_ball_goes_to_sleep_and_wakes_on_impulse() {
        let mut env = env();
        env.physicalize(&floor_desc()).unwrap();
        let ball = env
            .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 0.5, 0.0)))
            .unwrap();
        run(&mut env, 3.0);
        assert!(env.is_fixed(ball).unwrap(), "resting ball should sleep");
        env.apply_impulse(ball, env.pose(ball).unwrap().position, DVec3::new(2.0, 0.0, 0.0)).unwrap();
        assert!(!env.is_fixed(ball).unwrap());
        run(&mut env, 0.2);
        assert!(env.pose(ball).unwrap().position.x > 0.1);
    }

    #[test]
    fn test_beam_moves_body() {
        let mut env = env();
        let ball = env.physicalize(&BodyDesc::ball("ball", 0.5)).unwrap();
        env.beam(ball, DVec3::new(4.0, 0.0, 0.0), DQuat::IDENTITY, true).unwrap();
        assert_eq!(env.pose(ball).unwrap().position.x, 4.0);
        // Deferred bounds are still honored by queries
        let hit = env.raycast_one(DVec3::new(4.0, 5.0, 0.0), DVec3::NEG_Y, 10.0, 0).unwrap();
        assert_eq!(hit.body, ball);
        assert_relative_eq!(hit.distance, 4.5, epsilon = 1e-9);
    }

    #[test]
    fn test_hinge_joint_keeps_anchor() {
        let mut env = env();
        let bar = env
            .physicalize(&BodyDesc::convex("bar", vec![cube_points(0.2)]).with_position(DVec3::new(1.0, 5.0, 0.0)))
            .unwrap();
        let anchor = DVec3::new(0.0, 5.0, 0.0);
        env.add_hinge(bar, None, anchor, DVec3::Z).unwrap();
        let local = env.world_to_object_point(bar, anchor).unwrap();
        run(&mut env, 1.0);
        let now = env.object_to_world_point(bar, local).unwrap();
        assert!((now - anchor).length() < 1e-2, "anchor drifted to {now:?}");
        assert!(env.pose(bar).unwrap().position.y < 5.0);
    }

    #[test]
    fn test_motion_controller_reaches_target() {
        let mut env = env();
        let ball = env.physicalize(&BodyDesc::ball("ball", 0.5)).unwrap();
        env.enable_gravity(ball, false).unwrap();
        let gains = MotionGains {
            force_factor: 20.0,
            damp_factor: 8.0,
            torque_factor: 1.0,
            angular_damp_factor: 1.0,
        };
        let controller = env
            .add_motion_controller(ball, DVec3::new(2.0, 0.0, 0.0), DVec3::splat(100.0), 10.0, gains)
            .unwrap();
        run(&mut env, 4.0);
        assert!((env.pose(ball).unwrap().position.x - 2.0).abs() < 0.05);
        if let Some(c) = env.motion_controller_mut(controller) {
            c.set_target_position(DVec3::ZERO);
        }
        run(&mut env, 4.0);
        assert!(env.pose(ball).unwrap().position.x.abs() < 0.05);
    }

    #[test]
    fn test_remove_body_drops_attachments() {
        let mut env = env();
        let a = env.physicalize(&BodyDesc::ball("a", 0.5)).unwrap();
        let b = env
            .physicalize(&BodyDesc::ball("b", 0.5).with_position(DVec3::X * 3.0))
            .unwrap();
        let joint = env.add_ball_joint(a, Some(b), DVec3::X * 1.5).unwrap();
        let spring = env
            .add_spring(Spring::new(Attachment::new(a, DVec3::ZERO), Attachment::new(b, DVec3::ZERO), 2.0, 5.0))
            .unwrap();
        env.unphysicalize(b, false).unwrap();
        assert!(env.joint(joint).is_none());
        assert!(env.spring(spring).is_none());
        assert!(env.add_ball_joint(a, Some(a), DVec3::ZERO).is_err());
    }
}
