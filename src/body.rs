//! Rigid Bodies
//!
//! A body owns its pose, velocities and material parameters, and shares its
//! collision [`Shape`] with every other body physicalized from the same
//! surface.
//!
//! Positions are tracked for the body frame (the frame the host placed the
//! object in). Dynamics run about the center of mass, which sits at
//! `center_of_mass` in object space.

use std::sync::Arc;

use bitflags::bitflags;

use crate::arena::Handle;
use crate::filter::CollisionFilter;
use crate::math::{Aabb, DQuat, DVec3, Pose};
use crate::shape::{PointBuffer, Polyhedron, Shape};
use crate::sleeping::{energy_per_mass, SleepData};

/// Handle of a body inside an environment
pub type BodyHandle = Handle<RigidBody>;

bitflags! {
    /// Per-body switches
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BodyFlags: u32 {
        /// Gravity acts on the body
        const GRAVITY = 1 << 0;
        /// Body is integrated (disabled motion pins it like a static body)
        const MOTION = 1 << 1;
        /// Body takes part in collision detection
        const COLLISION = 1 << 2;
        /// Physically unmovable (infinite mass)
        const UNMOVABLE = 1 << 3;
    }
}

impl Default for BodyFlags {
    fn default() -> Self {
        Self::GRAVITY | Self::MOTION | Self::COLLISION
    }
}

/// Simulation state of a body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionState {
    /// Simulated normally
    Active,
    /// Asleep: zero velocity, static collider until woken
    Frozen,
    /// Overlap-only volume (one-way conversion)
    Phantom,
}

// ============================================================================
// Rigid Body
// ============================================================================

/// Rigid body state
#[derive(Clone, Debug)]
pub struct RigidBody {
    /// Host-visible name
    pub name: String,
    /// Engine-assigned id, unique among live bodies of one environment
    pub id: u32,
    /// Host collision class id (used by detection helpers)
    pub col_id: i32,
    /// Collision geometry (object space)
    pub shape: Arc<Shape>,
    /// Collision filter data
    pub filter: CollisionFilter,
    /// Body frame in world space
    pub pose: Pose,
    /// Center of mass in object space
    pub center_of_mass: DVec3,
    /// Linear velocity of the center of mass (world)
    pub velocity: DVec3,
    /// Angular velocity (world)
    pub angular_velocity: DVec3,
    /// Mass (0 = infinite)
    pub mass: f64,
    /// Principal inertia per unit mass about the center of mass (object axes)
    pub unit_inertia: DVec3,
    /// Friction coefficient
    pub friction: f64,
    /// Restitution coefficient
    pub elasticity: f64,
    /// Linear velocity damping (1/s)
    pub linear_damping: f64,
    /// Angular velocity damping (1/s)
    pub angular_damping: f64,
    /// Collision margin around the shape (phantom range for phantoms)
    pub margin: f64,
    /// Switches
    pub flags: BodyFlags,
    /// Active / frozen / phantom
    pub state: MotionState,
    /// Rest timer
    pub sleep: SleepData,
    /// Cached world bounds (margin included)
    pub world_aabb: Aabb,
    /// Bounds must be recomputed before the next query
    pub aabb_dirty: bool,
    /// Opaque host value (the C layer stores its handle here)
    pub user_data: usize,
}

impl RigidBody {
    /// Effective inverse mass: zero for anything the solver must not move
    #[inline]
    pub fn inv_mass(&self) -> f64 {
        if self.is_movable() {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    /// True when contacts and forces may move this body
    #[inline]
    pub fn is_movable(&self) -> bool {
        self.is_dynamic() && self.state == MotionState::Active
    }

    /// Finite mass, motion enabled and not flagged unmovable
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.mass > 0.0
            && self.flags.contains(BodyFlags::MOTION)
            && !self.flags.contains(BodyFlags::UNMOVABLE)
            && self.state != MotionState::Phantom
    }

    /// Frozen (host freeze or automatic sleep)
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.state == MotionState::Frozen
    }

    /// Phantom volume
    #[inline]
    pub fn is_phantom(&self) -> bool {
        self.state == MotionState::Phantom
    }

    /// Takes part in broad phase / raycasts
    #[inline]
    pub fn collides(&self) -> bool {
        self.flags.contains(BodyFlags::COLLISION)
    }

    /// Center of mass in world space
    #[inline]
    pub fn center_of_mass_world(&self) -> DVec3 {
        self.pose.transform_point(self.center_of_mass)
    }

    /// Multiply a world vector by the world-space inverse inertia
    pub fn inv_inertia_mul(&self, v: DVec3) -> DVec3 {
        if !self.is_movable() {
            return DVec3::ZERO;
        }
        let local = self.pose.inverse_transform_vector(v);
        let inv = DVec3::ONE / (self.unit_inertia * self.mass);
        self.pose.transform_vector(local * inv)
    }

    /// Velocity of a world point rigidly attached to the body
    #[inline]
    pub fn point_velocity(&self, point: DVec3) -> DVec3 {
        self.velocity + self.angular_velocity.cross(point - self.center_of_mass_world())
    }

    /// Kinetic energy per unit mass
    pub fn energy_per_mass(&self) -> f64 {
        let w_local = self.pose.inverse_transform_vector(self.angular_velocity);
        energy_per_mass(self.velocity, w_local, self.unit_inertia)
    }

    /// Apply an impulse at a world point (no-op for immovable bodies)
    pub fn apply_impulse_at(&mut self, point: DVec3, impulse: DVec3) {
        if !self.is_movable() {
            return;
        }
        let r = point - self.center_of_mass_world();
        self.velocity += impulse * self.inv_mass();
        self.angular_velocity += self.inv_inertia_mul(r.cross(impulse));
    }

    /// Apply an angular impulse (world axes)
    pub fn apply_angular_impulse(&mut self, impulse: DVec3) {
        if !self.is_movable() {
            return;
        }
        self.angular_velocity += self.inv_inertia_mul(impulse);
    }

    /// Set the pose; velocities are untouched
    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
        self.aabb_dirty = true;
    }

    /// Enter the frozen state
    pub fn freeze(&mut self) {
        self.state = MotionState::Frozen;
        self.velocity = DVec3::ZERO;
        self.angular_velocity = DVec3::ZERO;
        self.sleep.reset();
    }

    /// Leave the frozen state (no-op for active bodies and phantoms)
    pub fn wake(&mut self) {
        if self.state == MotionState::Frozen {
            self.state = MotionState::Active;
        }
        self.sleep.reset();
    }

    /// Recompute world bounds from the current pose
    pub fn refresh_aabb(&mut self) {
        self.world_aabb = self
            .shape
            .local_aabb()
            .transformed(&self.pose)
            .expanded(self.margin);
        self.aabb_dirty = false;
    }

    /// World bounds, recomputed when a deferred refresh is pending
    pub fn current_aabb(&self) -> Aabb {
        if self.aabb_dirty {
            self.shape.local_aabb().transformed(&self.pose).expanded(self.margin)
        } else {
            self.world_aabb
        }
    }

    /// Mass frame: center of mass and orientation
    #[inline]
    pub fn mass_frame(&self) -> Pose {
        Pose::new(self.center_of_mass_world(), self.pose.rotation)
    }

    /// Replace mass, keeping the inertia distribution
    pub fn set_mass(&mut self, mass: f64) {
        self.mass = if mass.is_finite() { mass.max(0.0) } else { 0.0 };
        if !self.is_dynamic() {
            self.velocity = DVec3::ZERO;
            self.angular_velocity = DVec3::ZERO;
        }
    }
}

// ============================================================================
// Body description (physicalize parameters)
// ============================================================================

/// Everything needed to physicalize one object
#[derive(Clone, Debug)]
pub struct BodyDesc {
    /// Host-visible name
    pub name: String,
    /// Layer id
    pub layer: u32,
    /// System group (0 = none)
    pub system_group: u32,
    /// Sub-system id inside the group
    pub sub_system_id: u32,
    /// Sub-system id never collided with inside the group
    pub sub_system_dont_collide_with: u32,
    /// Mass (0 = infinite)
    pub mass: f64,
    /// Friction coefficient
    pub friction: f64,
    /// Restitution coefficient
    pub elasticity: f64,
    /// Linear damping (1/s)
    pub linear_speed_damp: f64,
    /// Angular damping (1/s)
    pub rot_speed_damp: f64,
    /// Use a ball instead of the convex / concave geometry
    pub use_ball: bool,
    /// Ball radius when `use_ball`
    pub ball_radius: f64,
    /// Merge all convex buffers into one hull
    pub enable_convex_hull: bool,
    /// Put the center of mass at the volume centroid
    pub auto_mass_center: bool,
    /// Take part in collision detection
    pub enable_collision: bool,
    /// Start frozen
    pub start_frozen: bool,
    /// Infinite mass regardless of `mass`
    pub physical_unmovable: bool,
    /// Initial position of the body frame
    pub position: DVec3,
    /// Offset added to the center of mass (object space)
    pub shift_mass_center: DVec3,
    /// Initial orientation
    pub rotation: DQuat,
    /// Reuse the cached surface `surface_name` instead of building geometry
    pub use_exists_surface: bool,
    /// Name the built surface is cached under (empty = not cached)
    pub surface_name: String,
    /// Convex point buffers
    pub convex: Vec<PointBuffer>,
    /// Concave polyhedra
    pub concave: Vec<Polyhedron>,
    /// Collision margin
    pub extra_radius: f64,
    /// Host collision class id
    pub col_id: i32,
}

impl Default for BodyDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            layer: 0,
            system_group: 0,
            sub_system_id: 0,
            sub_system_dont_collide_with: 0,
            mass: 1.0,
            friction: 0.5,
            elasticity: 0.0,
            linear_speed_damp: 0.0,
            rot_speed_damp: 0.0,
            use_ball: false,
            ball_radius: 0.0,
            enable_convex_hull: true,
            auto_mass_center: true,
            enable_collision: true,
            start_frozen: false,
            physical_unmovable: false,
            position: DVec3::ZERO,
            shift_mass_center: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            use_exists_surface: false,
            surface_name: String::new(),
            convex: Vec::new(),
            concave: Vec::new(),
            extra_radius: 0.0,
            col_id: 0,
        }
    }
}

impl BodyDesc {
    /// Ball body
    pub fn ball(name: impl Into<String>, radius: f64) -> Self {
        Self {
            name: name.into(),
            use_ball: true,
            ball_radius: radius,
            ..Self::default()
        }
    }

    /// Body made of convex point buffers
    pub fn convex(name: impl Into<String>, buffers: Vec<PointBuffer>) -> Self {
        Self {
            name: name.into(),
            convex: buffers,
            ..Self::default()
        }
    }

    /// Body made of concave polyhedra
    pub fn concave(name: impl Into<String>, polyhedra: Vec<Polyhedron>) -> Self {
        Self {
            name: name.into(),
            concave: polyhedra,
            ..Self::default()
        }
    }

    /// Body that reuses a cached surface
    pub fn from_surface(name: impl Into<String>, surface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            use_exists_surface: true,
            surface_name: surface.into(),
            ..Self::default()
        }
    }

    /// Builder: mass
    #[must_use]
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    /// Builder: initial position
    #[must_use]
    pub fn with_position(mut self, position: DVec3) -> Self {
        self.position = position;
        self
    }

    /// Builder: initial rotation
    #[must_use]
    pub fn with_rotation(mut self, rotation: DQuat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Builder: layer
    #[must_use]
    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    /// Builder: system group membership
    #[must_use]
    pub fn with_system_group(mut self, group: u32, sub_id: u32, dont_collide_with: u32) -> Self {
        self.system_group = group;
        self.sub_system_id = sub_id;
        self.sub_system_dont_collide_with = dont_collide_with;
        self
    }

    /// Builder: friction and restitution
    #[must_use]
    pub fn with_material(mut self, friction: f64, elasticity: f64) -> Self {
        self.friction = friction;
        self.elasticity = elasticity;
        self
    }

    /// Builder: damping
    #[must_use]
    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.linear_speed_damp = linear;
        self.rot_speed_damp = angular;
        self
    }

    /// Builder: infinite mass
    #[must_use]
    pub fn unmovable(mut self) -> Self {
        self.physical_unmovable = true;
        self
    }

    /// Builder: start frozen
    #[must_use]
    pub fn frozen(mut self) -> Self {
        self.start_frozen = true;
        self
    }

    /// Builder: collision class id
    #[must_use]
    pub fn with_col_id(mut self, col_id: i32) -> Self {
        self.col_id = col_id;
        self
    }

    /// Builder: cache the built surface under `name`
    #[must_use]
    pub fn with_surface_name(mut self, name: impl Into<String>) -> Self {
        self.surface_name = name.into();
        self
    }

    /// Builder: collision margin
    #[must_use]
    pub fn with_extra_radius(mut self, extra_radius: f64) -> Self {
        self.extra_radius = extra_radius;
        self
    }

    /// Builder: center of mass placement
    #[must_use]
    pub fn with_mass_center(mut self, auto: bool, shift: DVec3) -> Self {
        self.auto_mass_center = auto;
        self.shift_mass_center = shift;
        self
    }

    /// Builder: merge convex buffers into one hull
    #[must_use]
    pub fn with_convex_hull(mut self, merge: bool) -> Self {
        self.enable_convex_hull = merge;
        self
    }

    /// Builder: disable collision detection
    #[must_use]
    pub fn without_collision(mut self) -> Self {
        self.enable_collision = false;
        self
    }

    /// Collision filter described by this body
    pub fn filter(&self) -> CollisionFilter {
        CollisionFilter::on_layer(self.layer).with_system_group(
            self.system_group,
            self.sub_system_id,
            self.sub_system_dont_collide_with,
        )
    }

    /// Build the body around an already-resolved shape
    pub fn build(&self, id: u32, shape: Arc<Shape>) -> RigidBody {
        let props = shape.mass_properties();
        let center_of_mass = if self.auto_mass_center {
            props.center + self.shift_mass_center
        } else {
            self.shift_mass_center
        };
        // Parallel-axis shift from the geometric center
        let d = center_of_mass - props.center;
        let unit_inertia = props.unit_inertia + (DVec3::splat(d.length_squared()) - d * d);

        let mut flags = BodyFlags::default();
        flags.set(BodyFlags::COLLISION, self.enable_collision);
        flags.set(BodyFlags::UNMOVABLE, self.physical_unmovable);

        let mass = if self.mass.is_finite() { self.mass.max(0.0) } else { 0.0 };
        let mut body = RigidBody {
            name: self.name.clone(),
            id,
            col_id: self.col_id,
            shape,
            filter: self.filter(),
            pose: Pose::new(self.position, self.rotation),
            center_of_mass,
            velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            mass,
            unit_inertia,
            friction: self.friction.max(0.0),
            elasticity: self.elasticity.clamp(0.0, 1.0),
            linear_damping: self.linear_speed_damp.max(0.0),
            angular_damping: self.rot_speed_damp.max(0.0),
            margin: self.extra_radius.max(0.0),
            flags,
            state: if self.start_frozen {
                MotionState::Frozen
            } else {
                MotionState::Active
            },
            sleep: SleepData::default(),
            world_aabb: Aabb::EMPTY,
            aabb_dirty: true,
            user_data: 0,
        };
        body.refresh_aabb();
        body
    }
}
