//! C Foreign Function Interface
//!
//! Flat function table consumed by the game host. Names and parameter
//! layouts follow the host's binding table; handles are opaque pointers.
//!
//! # Handles
//!
//! - Environment: `*mut Environment` from `create_environment`
//! - Bodies: `*mut BodyRef`, owned by the environment. Freed by
//!   `unphysicalize` or `destroy_environment`. The same pointer is passed
//!   back to every listener as `self` / `other`.
//! - Constraints, forces, springs, motion controllers and detection helpers:
//!   `*mut ObjectRef<T>`, owned by the host and freed by the matching
//!   `destroy_*` call. Destroying one after its body was removed is a no-op.
//!
//! # Safety
//!
//! Every entry point accepts null and returns a zero/null result for it.
//! Beyond null checks, pointers must come from this library and must not
//! be used after they were freed. The environment is single-threaded:
//! listeners must not call back into the environment that invoked them.
//! Panics never cross the boundary; they are logged and turned into the
//! call's zero/null result.

#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::arena::Handle;
use crate::body::{BodyDesc, RigidBody};
use crate::config::EnvironmentConfig;
use crate::detection::{CollDetection, ContractDetection};
use crate::environment::Environment;
use crate::error::PhysicsError;
use crate::event::{CollisionEvent, ContractEvent, FrictionEvent, PhantomEvent};
use crate::filter::CollisionFilter;
use crate::force::{Attachment, PointForce, Spring};
use crate::joint::{AxisLimits, Joint};
use crate::math::{DQuat, DVec3, Pose};
use crate::motion::{MotionController, MotionGains};
use crate::shape::{PointBuffer, Polyhedron};

// ============================================================================
// C-compatible types
// ============================================================================

/// C-compatible 3D point / vector
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FfiPoint {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

/// C-compatible quaternion
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FfiQuat {
    /// X component (imaginary i)
    pub x: f32,
    /// Y component (imaginary j)
    pub y: f32,
    /// Z component (imaginary k)
    pub z: f32,
    /// W component (scalar part)
    pub w: f32,
}

impl From<DVec3> for FfiPoint {
    fn from(v: DVec3) -> Self {
        Self {
            x: v.x as f32,
            y: v.y as f32,
            z: v.z as f32,
        }
    }
}

impl From<FfiPoint> for DVec3 {
    fn from(p: FfiPoint) -> Self {
        DVec3::new(f64::from(p.x), f64::from(p.y), f64::from(p.z))
    }
}

impl From<FfiQuat> for DQuat {
    fn from(q: FfiQuat) -> Self {
        DQuat::from_xyzw(f64::from(q.x), f64::from(q.y), f64::from(q.z), f64::from(q.w))
    }
}

/// Host geometry handed to `physicalize`
#[derive(Clone, Debug, PartialEq)]
pub enum FfiGeometry {
    /// Convex point cloud
    Points(PointBuffer),
    /// Indexed triangle set
    Polyhedron(Polyhedron),
}

impl FfiGeometry {
    fn point_buffer(&self) -> PointBuffer {
        match self {
            Self::Points(buffer) => buffer.clone(),
            Self::Polyhedron(poly) => PointBuffer::new(poly.points.clone()),
        }
    }
}

/// Environment-bound handle of an engine object
#[derive(Debug)]
pub struct ObjectRef<T> {
    env: *mut Environment,
    handle: Handle<T>,
}

/// Body handle passed to the host
pub type BodyRef = ObjectRef<RigidBody>;

/// Raycast hit list, nearest first
#[repr(C)]
#[derive(Debug)]
pub struct FfiRaycastResult {
    /// Number of hits
    pub count: i32,
    /// `count` body handles
    pub bodies: *mut *mut BodyRef,
    /// `count` hit distances
    pub distances: *mut f32,
}

/// `(code, message)`; `message` is only valid during the call
pub type ErrorReportCallback = unsafe extern "C" fn(code: i32, message: *const c_char);
/// `(enter, phantom, other)`
pub type PhantomEventCallback = unsafe extern "C" fn(enter: i32, this: *mut BodyRef, other: *mut BodyRef);
/// `(self, other, contact_point_ws, speed, surf_normal)`
pub type CollisionEventCallback = unsafe extern "C" fn(
    this: *mut BodyRef,
    other: *mut BodyRef,
    contact_point_ws: *const FfiPoint,
    speed: *const f32,
    surf_normal: *const FfiPoint,
);
/// `(create, self, other, friction_handle, contact_point_ws, speed, surf_normal)`
pub type FrictionEventCallback = unsafe extern "C" fn(
    create: i32,
    this: *mut BodyRef,
    other: *mut BodyRef,
    friction_handle: *mut c_void,
    contact_point_ws: *const FfiPoint,
    speed: *const f32,
    surf_normal: *const FfiPoint,
);
/// `(self, col_id, type, speed_percent, is_on)`
pub type ContractEventCallback =
    unsafe extern "C" fn(this: *mut BodyRef, col_id: i32, kind: i16, speed_percent: f32, is_on: i16);

// ============================================================================
// Helpers
// ============================================================================

fn guard<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("panic caught at the C boundary");
            fallback
        }
    }
}

unsafe fn read_point(p: *const FfiPoint) -> Option<DVec3> {
    p.as_ref().map(|p| DVec3::from(*p))
}

unsafe fn read_point_or_zero(p: *const FfiPoint) -> DVec3 {
    read_point(p).unwrap_or(DVec3::ZERO)
}

unsafe fn write_point(out: *mut FfiPoint, v: DVec3) {
    if let Some(out) = out.as_mut() {
        *out = FfiPoint::from(v);
    }
}

unsafe fn read_name(name: *const c_char) -> String {
    if name.is_null() {
        String::new()
    } else {
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}

unsafe fn resolve<'a, T>(r: *const ObjectRef<T>) -> Option<(&'a mut Environment, Handle<T>)> {
    let r = r.as_ref()?;
    let env = r.env.as_mut()?;
    Some((env, r.handle))
}

fn new_ref<T>(env: *mut Environment, handle: Handle<T>) -> *mut ObjectRef<T> {
    Box::into_raw(Box::new(ObjectRef { env, handle }))
}

unsafe fn free_ref<T>(r: *mut ObjectRef<T>) -> Option<(&'static mut Environment, Handle<T>)> {
    if r.is_null() {
        return None;
    }
    let r = Box::from_raw(r);
    r.env.as_mut().map(|env| (env, r.handle))
}

fn body_ptr(user_data: usize) -> *mut BodyRef {
    user_data as *mut BodyRef
}

fn flag(value: i32) -> bool {
    value != 0
}

// ============================================================================
// Version and constants
// ============================================================================

/// Library version as `major * 10000 + minor * 100 + patch`
#[no_mangle]
pub extern "C" fn get_version() -> i32 {
    let part = |s: &str| s.parse::<i32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) * 10000
        + part(env!("CARGO_PKG_VERSION_MINOR")) * 100
        + part(env!("CARGO_PKG_VERSION_PATCH"))
}

/// Pi
#[no_mangle]
pub extern "C" fn get_pi() -> f32 {
    std::f32::consts::PI
}

/// Pi / 2
#[no_mangle]
pub extern "C" fn get_pi2() -> f32 {
    std::f32::consts::FRAC_PI_2
}

// ============================================================================
// Environment lifecycle
// ============================================================================

/// Create an environment.
///
/// `layer_to_mask` holds `layer_mask_count` masks indexed by layer. On
/// invalid input the reporter is called and null is returned.
#[no_mangle]
pub unsafe extern "C" fn create_environment(
    gravity: *const FfiPoint,
    simulation_rate: f32,
    layer_mask_count: i32,
    layer_to_mask: *const u32,
    error_reporter: Option<ErrorReportCallback>,
) -> *mut Environment {
    guard(std::ptr::null_mut(), || {
        let masks = match (layer_mask_count, layer_to_mask.is_null()) {
            (n, false) if n > 0 => std::slice::from_raw_parts(layer_to_mask, n as usize).to_vec(),
            _ => Vec::new(),
        };
        let config = EnvironmentConfig::default()
            .with_gravity(read_point(gravity).unwrap_or(DVec3::new(0.0, -9.81, 0.0)))
            .with_simulation_rate(f64::from(simulation_rate))
            .with_layer_masks(masks);
        let created = match error_reporter {
            Some(callback) => Environment::with_reporter(
                config,
                Box::new(move |err: &PhysicsError| {
                    let message = CString::new(err.to_string()).unwrap_or_default();
                    // SAFETY: the host registered this callback for exactly this use
                    unsafe { callback(err.code(), message.as_ptr()) }
                }),
            ),
            None => Environment::new(config),
        };
        match created {
            Ok(env) => Box::into_raw(Box::new(env)),
            Err(_) => std::ptr::null_mut(),
        }
    })
}

/// Destroy an environment and every body handle it owns
#[no_mangle]
pub unsafe extern "C" fn destroy_environment(world: *mut Environment) {
    if world.is_null() {
        return;
    }
    guard((), || {
        let env = Box::from_raw(world);
        for (_, body) in env.bodies() {
            let r = body_ptr(body.user_data);
            if !r.is_null() {
                drop(Box::from_raw(r));
            }
        }
        log::debug!("environment destroyed");
    });
}

/// Zero the environment clock
#[no_mangle]
pub unsafe extern "C" fn environment_reset_time(world: *mut Environment) {
    if let Some(env) = world.as_mut() {
        env.reset_time();
    }
}

/// One step of `dtime` seconds
#[no_mangle]
pub unsafe extern "C" fn environment_simulate_dtime(world: *mut Environment, dtime: f32) {
    if let Some(env) = world.as_mut() {
        guard((), || env.simulate_dtime(f64::from(dtime)));
    }
}

/// Fixed steps until the clock reaches `time`
#[no_mangle]
pub unsafe extern "C" fn environment_simulate_until(world: *mut Environment, time: f32) {
    if let Some(env) = world.as_mut() {
        guard((), || {
            env.simulate_until(f64::from(time));
        });
    }
}

/// One step of `dtime` seconds without substepping
#[no_mangle]
pub unsafe extern "C" fn environment_simulate_variable_time_step(world: *mut Environment, dtime: f32) {
    if let Some(env) = world.as_mut() {
        guard((), || env.simulate_variable_time_step(f64::from(dtime)));
    }
}

/// Allocate a system group id (0 on null)
#[no_mangle]
pub unsafe extern "C" fn environment_new_system_group(world: *mut Environment) -> i32 {
    world.as_mut().map_or(0, |env| env.new_system_group() as i32)
}

/// Set or clear `to_mask` in the mask of `layer_id`
#[no_mangle]
pub unsafe extern "C" fn environment_set_collision_layer_masks(
    world: *mut Environment,
    layer_id: u32,
    to_mask: u32,
    enable: i32,
) {
    if let Some(env) = world.as_mut() {
        env.set_collision_layer_masks(layer_id, to_mask, flag(enable));
    }
}

/// Flush deferred bounds refreshes and pending events
#[no_mangle]
pub unsafe extern "C" fn do_update_all(world: *mut Environment) {
    if let Some(env) = world.as_mut() {
        guard((), || env.do_update_all());
    }
}

/// Re-evaluate contact detection helpers without advancing time
#[no_mangle]
pub unsafe extern "C" fn do_update_all_physics_contact_detection(world: *mut Environment) {
    if let Some(env) = world.as_mut() {
        guard((), || env.update_contact_detection());
    }
}

/// Write cumulative wall time spent stepping and simulated time
#[no_mangle]
pub unsafe extern "C" fn get_stats(world: *mut Environment, active_time: *mut f32, time: *mut f32) {
    let Some(env) = world.as_ref() else {
        return;
    };
    let stats = env.stats();
    if let Some(out) = active_time.as_mut() {
        *out = stats.active_time as f32;
    }
    if let Some(out) = time.as_mut() {
        *out = stats.simulated_time as f32;
    }
}

// ============================================================================
// Geometry helpers
// ============================================================================

/// Heap point; free with `destroy_point`
#[no_mangle]
pub extern "C" fn create_point(x: f32, y: f32, z: f32) -> *mut FfiPoint {
    Box::into_raw(Box::new(FfiPoint { x, y, z }))
}

/// Free a point from `create_point`
#[no_mangle]
pub unsafe extern "C" fn destroy_point(pt: *mut FfiPoint) {
    if !pt.is_null() {
        drop(Box::from_raw(pt));
    }
}

/// Copy the point into `buf[0..3]`; returns its length
#[no_mangle]
pub unsafe extern "C" fn get_point(pt: *const FfiPoint, buf: *mut f32) -> f32 {
    let Some(p) = pt.as_ref() else {
        return 0.0;
    };
    if !buf.is_null() {
        std::slice::from_raw_parts_mut(buf, 3).copy_from_slice(&[p.x, p.y, p.z]);
    }
    DVec3::from(*p).length() as f32
}

/// Heap quaternion; free with `destroy_quat`
#[no_mangle]
pub extern "C" fn create_quat(x: f32, y: f32, z: f32, w: f32) -> *mut FfiQuat {
    Box::into_raw(Box::new(FfiQuat { x, y, z, w }))
}

/// Free a quaternion from `create_quat`
#[no_mangle]
pub unsafe extern "C" fn destroy_quat(qt: *mut FfiQuat) {
    if !qt.is_null() {
        drop(Box::from_raw(qt));
    }
}

/// Copy the quaternion into `buf[0..4]` (x, y, z, w); returns its norm
#[no_mangle]
pub unsafe extern "C" fn get_quat(qt: *const FfiQuat, buf: *mut f32) -> f32 {
    let Some(q) = qt.as_ref() else {
        return 0.0;
    };
    if !buf.is_null() {
        std::slice::from_raw_parts_mut(buf, 4).copy_from_slice(&[q.x, q.y, q.z, q.w]);
    }
    DQuat::from(*q).length() as f32
}

/// Point cloud from `point_count` packed `x, y, z` triples
#[no_mangle]
pub unsafe extern "C" fn create_points_buffer(point_count: i32, pt: *const f32) -> *mut FfiGeometry {
    if pt.is_null() || point_count <= 0 {
        return std::ptr::null_mut();
    }
    let coords = std::slice::from_raw_parts(pt, point_count as usize * 3);
    Box::into_raw(Box::new(FfiGeometry::Points(PointBuffer::from_flat(coords))))
}

/// Indexed triangle set; negative indices are kept as invalid and rejected
/// by `physicalize`
#[no_mangle]
pub unsafe extern "C" fn create_polyhedron(
    point_count: i32,
    indices_count: i32,
    pt: *const f32,
    ind: *const i32,
) -> *mut FfiGeometry {
    if pt.is_null() || ind.is_null() || point_count <= 0 || indices_count <= 0 {
        return std::ptr::null_mut();
    }
    let coords = std::slice::from_raw_parts(pt, point_count as usize * 3);
    let indices = std::slice::from_raw_parts(ind, indices_count as usize)
        .iter()
        .map(|&i| u32::try_from(i).unwrap_or(u32::MAX))
        .collect();
    let poly = Polyhedron::new(PointBuffer::from_flat(coords).points, indices);
    Box::into_raw(Box::new(FfiGeometry::Polyhedron(poly)))
}

/// Free a point buffer or polyhedron
#[no_mangle]
pub unsafe extern "C" fn delete_points_buffer(b: *mut FfiGeometry) {
    if !b.is_null() {
        drop(Box::from_raw(b));
    }
}

/// 1 if a surface named `name` is cached
#[no_mangle]
pub unsafe extern "C" fn surface_exist_by_name(world: *mut Environment, name: *const c_char) -> i32 {
    match world.as_ref() {
        Some(env) => i32::from(env.surface_exists(&read_name(name))),
        None => 0,
    }
}

/// Forget every cached surface
#[no_mangle]
pub unsafe extern "C" fn delete_all_surfaces(world: *mut Environment) {
    if let Some(env) = world.as_mut() {
        env.delete_all_surfaces();
    }
}

// ============================================================================
// Body lifecycle
// ============================================================================

unsafe fn geometry_list<'a>(count: i32, data: *const *const FfiGeometry) -> Vec<&'a FfiGeometry> {
    if data.is_null() || count <= 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(data, count as usize)
        .iter()
        .filter_map(|g| g.as_ref())
        .collect()
}

/// Build a body; null on malformed input (the error reporter is called)
#[no_mangle]
pub unsafe extern "C" fn physicalize(
    world: *mut Environment,
    name: *const c_char,
    layer: i32,
    system_group: i32,
    sub_system_id: i32,
    sub_system_dont_collide_with: i32,
    mass: f32,
    friction: f32,
    elasticity: f32,
    linear_speed_damp: f32,
    rot_speed_damp: f32,
    ball_radius: f32,
    use_ball: i32,
    enable_convex_hull: i32,
    auto_mass_center: i32,
    enable_collision: i32,
    start_frozen: i32,
    physical_unmovable: i32,
    position: *const FfiPoint,
    shift_mass_center: *const FfiPoint,
    rotation: *const FfiQuat,
    use_exists_surface: i32,
    surface_name: *const c_char,
    convex_count: i32,
    convex_data: *const *const FfiGeometry,
    concave_count: i32,
    concave_data: *const *const FfiGeometry,
    extra_radius: f32,
    col_id: i32,
) -> *mut BodyRef {
    let Some(env) = world.as_mut() else {
        return std::ptr::null_mut();
    };
    guard(std::ptr::null_mut(), || {
        let convex = geometry_list(convex_count, convex_data)
            .into_iter()
            .map(FfiGeometry::point_buffer)
            .collect();
        let concave = geometry_list(concave_count, concave_data)
            .into_iter()
            .filter_map(|g| match g {
                FfiGeometry::Polyhedron(poly) => Some(poly.clone()),
                FfiGeometry::Points(_) => {
                    log::warn!("point buffer passed as concave geometry ignored");
                    None
                }
            })
            .collect();

        let desc = BodyDesc {
            name: read_name(name),
            layer: layer.max(0) as u32,
            system_group: system_group.max(0) as u32,
            sub_system_id: sub_system_id.max(0) as u32,
            sub_system_dont_collide_with: sub_system_dont_collide_with.max(0) as u32,
            mass: f64::from(mass),
            friction: f64::from(friction),
            elasticity: f64::from(elasticity),
            linear_speed_damp: f64::from(linear_speed_damp),
            rot_speed_damp: f64::from(rot_speed_damp),
            use_ball: flag(use_ball),
            ball_radius: f64::from(ball_radius),
            enable_convex_hull: flag(enable_convex_hull),
            auto_mass_center: flag(auto_mass_center),
            enable_collision: flag(enable_collision),
            start_frozen: flag(start_frozen),
            physical_unmovable: flag(physical_unmovable),
            position: read_point_or_zero(position),
            shift_mass_center: read_point_or_zero(shift_mass_center),
            rotation: rotation.as_ref().map_or(DQuat::IDENTITY, |q| DQuat::from(*q)),
            use_exists_surface: flag(use_exists_surface),
            surface_name: read_name(surface_name),
            convex,
            concave,
            extra_radius: f64::from(extra_radius),
            col_id,
        };

        let Ok(handle) = env.physicalize(&desc) else {
            return std::ptr::null_mut();
        };
        let r = new_ref(world, handle);
        if env.set_user_data(handle, r as usize).is_err() {
            drop(Box::from_raw(r));
            return std::ptr::null_mut();
        }
        r
    })
}

/// Remove a body and free its handle
#[no_mangle]
pub unsafe extern "C" fn unphysicalize(world: *mut Environment, body: *mut BodyRef, silently: i32) {
    if world.is_null() || body.is_null() {
        return;
    }
    guard((), || {
        if let Some((env, handle)) = resolve(body) {
            let _ = env.unphysicalize(handle, flag(silently));
        }
        drop(Box::from_raw(body));
    });
}

// ============================================================================
// Body properties
// ============================================================================

/// Engine-assigned body id (0 on null)
#[no_mangle]
pub unsafe extern "C" fn physics_get_id(body: *mut BodyRef) -> i32 {
    resolve(body)
        .and_then(|(env, h)| env.body(h).map(|b| b.id as i32))
        .unwrap_or(0)
}

/// Rename the body
#[no_mangle]
pub unsafe extern "C" fn physics_set_name(body: *mut BodyRef, name: *const c_char) {
    if let Some((env, h)) = resolve(body) {
        let _ = env.set_name(h, read_name(name));
    }
}

/// Replace the host collision class id
#[no_mangle]
pub unsafe extern "C" fn physics_set_col_id(body: *mut BodyRef, col_id: i32) {
    if let Some((env, h)) = resolve(body) {
        let _ = env.set_col_id(h, col_id);
    }
}

/// Replace the collision filter
#[no_mangle]
pub unsafe extern "C" fn physics_set_layer(
    world: *mut Environment,
    body: *mut BodyRef,
    layer: i32,
    system_group: i32,
    sub_system_id: i32,
    sub_system_dont_collide_with: i32,
) {
    if world.is_null() {
        return;
    }
    if let Some((env, h)) = resolve(body) {
        let filter = CollisionFilter::on_layer(layer.max(0) as u32).with_system_group(
            system_group.max(0) as u32,
            sub_system_id.max(0) as u32,
            sub_system_dont_collide_with.max(0) as u32,
        );
        let _ = env.set_layer(h, filter);
    }
}

/// Drop contacts the current filter forbids
#[no_mangle]
pub unsafe extern "C" fn physics_recheck_collision_filter(body: *mut BodyRef) {
    if let Some((env, h)) = resolve(body) {
        guard((), || {
            let _ = env.recheck_collision_filter(h);
        });
    }
}

/// Freeze; 1 if this call froze the body
#[no_mangle]
pub unsafe extern "C" fn physics_freeze(body: *mut BodyRef) -> i32 {
    resolve(body).map_or(0, |(env, h)| i32::from(env.freeze(h).unwrap_or(false)))
}

/// Wake a frozen body
#[no_mangle]
pub unsafe extern "C" fn physics_wakeup(body: *mut BodyRef) {
    if let Some((env, h)) = resolve(body) {
        let _ = env.wakeup(h);
    }
}

/// 1 if the last step left the two bodies touching
#[no_mangle]
pub unsafe extern "C" fn physics_is_contact(body: *mut BodyRef, other: *mut BodyRef) -> i32 {
    match (resolve(body), other.as_ref()) {
        (Some((env, h)), Some(o)) => i32::from(env.is_contact(h, o.handle)),
        _ => 0,
    }
}

fn body_flag(body: *mut BodyRef, test: impl FnOnce(&RigidBody) -> bool) -> i32 {
    // SAFETY: null and stale handles resolve to `None`
    let found = unsafe { resolve(body) };
    found
        .and_then(|(env, h)| env.body(h).map(test))
        .map_or(0, i32::from)
}

/// 1 if integration is enabled
#[no_mangle]
pub unsafe extern "C" fn physics_is_motion_enabled(body: *mut BodyRef) -> i32 {
    body_flag(body, |b| b.flags.contains(crate::body::BodyFlags::MOTION))
}

/// 1 if frozen
#[no_mangle]
pub unsafe extern "C" fn physics_is_fixed(body: *mut BodyRef) -> i32 {
    body_flag(body, RigidBody::is_frozen)
}

/// 1 if gravity applies
#[no_mangle]
pub unsafe extern "C" fn physics_is_gravity_enabled(body: *mut BodyRef) -> i32 {
    body_flag(body, |b| b.flags.contains(crate::body::BodyFlags::GRAVITY))
}

/// 1 if the body is a phantom volume
#[no_mangle]
pub unsafe extern "C" fn physics_is_phantom(body: *mut BodyRef) -> i32 {
    body_flag(body, RigidBody::is_phantom)
}

/// Switch gravity
#[no_mangle]
pub unsafe extern "C" fn physics_enable_gravity(body: *mut BodyRef, enable: i32) {
    if let Some((env, h)) = resolve(body) {
        let _ = env.enable_gravity(h, flag(enable));
    }
}

/// Join the broad phase
#[no_mangle]
pub unsafe extern "C" fn physics_enable_collision_detection(body: *mut BodyRef) {
    if let Some((env, h)) = resolve(body) {
        guard((), || {
            let _ = env.enable_collision_detection(h, true);
        });
    }
}

/// Leave the broad phase; current contacts end
#[no_mangle]
pub unsafe extern "C" fn physics_disable_collision_detection(body: *mut BodyRef) {
    if let Some((env, h)) = resolve(body) {
        guard((), || {
            let _ = env.enable_collision_detection(h, false);
        });
    }
}

/// Switch integration
#[no_mangle]
pub unsafe extern "C" fn physics_enable_motion(body: *mut BodyRef, enable: i32) {
    if let Some((env, h)) = resolve(body) {
        let _ = env.enable_motion(h, flag(enable));
    }
}

/// Teleport the body
#[no_mangle]
pub unsafe extern "C" fn physics_beam_object_to_new_position(
    body: *mut BodyRef,
    rotation: *const FfiQuat,
    pos: *const FfiPoint,
    optimize_for_repeated_calls: i32,
) {
    let Some((env, h)) = resolve(body) else {
        return;
    };
    let Some(current) = env.body(h).map(|b| b.pose) else {
        return;
    };
    let position = read_point(pos).unwrap_or(current.position);
    let rotation = rotation.as_ref().map_or(current.rotation, |q| DQuat::from(*q));
    if let Err(err) = env.beam(h, position, rotation, flag(optimize_for_repeated_calls)) {
        log::warn!("beam ignored: {err}");
    }
}

/// Linear speed
#[no_mangle]
pub unsafe extern "C" fn physics_get_speed(body: *mut BodyRef) -> f32 {
    resolve(body).map_or(0.0, |(env, h)| env.speed(h).unwrap_or(0.0) as f32)
}

/// Linear velocity (world)
#[no_mangle]
pub unsafe extern "C" fn physics_get_speed_vec(body: *mut BodyRef, speed_ws_out: *mut FfiPoint) {
    if let Some((env, h)) = resolve(body) {
        write_point(speed_ws_out, env.velocity(h).unwrap_or(DVec3::ZERO));
    }
}

/// Angular velocity (object axes)
#[no_mangle]
pub unsafe extern "C" fn physics_get_rot_speed(body: *mut BodyRef, rot_speed_cs_out: *mut FfiPoint) {
    if let Some((env, h)) = resolve(body) {
        write_point(rot_speed_cs_out, env.angular_velocity_local(h).unwrap_or(DVec3::ZERO));
    }
}

/// Replace the mass
#[no_mangle]
pub unsafe extern "C" fn physics_change_mass(body: *mut BodyRef, mass: f32) {
    if let Some((env, h)) = resolve(body) {
        let _ = env.change_mass(h, f64::from(mass));
    }
}

/// Switch the physically-unmovable flag
#[no_mangle]
pub unsafe extern "C" fn physics_change_unmovable_flag(body: *mut BodyRef, unmovable_flag: i32) {
    if let Some((env, h)) = resolve(body) {
        let _ = env.change_unmovable_flag(h, flag(unmovable_flag));
    }
}

/// Impulse at a world point
#[no_mangle]
pub unsafe extern "C" fn physics_impluse(body: *mut BodyRef, pos_ws: *const FfiPoint, impulse_ws: *const FfiPoint) {
    let (Some((env, h)), Some(impulse)) = (resolve(body), read_point(impulse_ws)) else {
        return;
    };
    let Some(point) = read_point(pos_ws).or_else(|| env.body(h).map(RigidBody::center_of_mass_world)) else {
        return;
    };
    let _ = env.apply_impulse(h, point, impulse);
}

/// Angular impulse (world axes)
#[no_mangle]
pub unsafe extern "C" fn physics_torque(body: *mut BodyRef, rotation_vec: *const FfiPoint) {
    if let (Some((env, h)), Some(impulse)) = (resolve(body), read_point(rotation_vec)) {
        let _ = env.apply_torque(h, impulse);
    }
}

/// Add to the linear velocity
#[no_mangle]
pub unsafe extern "C" fn physics_add_speed(body: *mut BodyRef, speed_ws: *const FfiPoint) {
    if let (Some((env, h)), Some(delta)) = (resolve(body), read_point(speed_ws)) {
        let _ = env.add_speed(h, delta);
    }
}

unsafe fn transform(
    body: *mut BodyRef,
    input: *const FfiPoint,
    out: *mut FfiPoint,
    f: impl FnOnce(&Pose, DVec3) -> DVec3,
) {
    let (Some((env, h)), Some(v)) = (resolve(body), read_point(input)) else {
        return;
    };
    if let Some(body) = env.body(h) {
        write_point(out, f(&body.pose, v));
    }
}

/// Object-space point to world space
#[no_mangle]
pub unsafe extern "C" fn physics_transform_position_to_world_coords(
    body: *mut BodyRef,
    pos_cs: *const FfiPoint,
    out_ws: *mut FfiPoint,
) {
    transform(body, pos_cs, out_ws, |pose, p| pose.transform_point(p));
}

/// World-space point to object space
#[no_mangle]
pub unsafe extern "C" fn physics_transform_position_to_object_coords(
    body: *mut BodyRef,
    pos_ws: *const FfiPoint,
    out_os: *mut FfiPoint,
) {
    transform(body, pos_ws, out_os, |pose, p| pose.inverse_transform_point(p));
}

/// World-space direction to object space
#[no_mangle]
pub unsafe extern "C" fn physics_transform_vector_to_object_coords(
    body: *mut BodyRef,
    vec_ws: *const FfiPoint,
    out_os: *mut FfiPoint,
) {
    transform(body, vec_ws, out_os, |pose, v| pose.inverse_transform_vector(v));
}

/// Object-space direction to world space
#[no_mangle]
pub unsafe extern "C" fn physics_transform_vector_to_world_coords(
    body: *mut BodyRef,
    vec_cs: *const FfiPoint,
    out_ws: *mut FfiPoint,
) {
    transform(body, vec_cs, out_ws, |pose, v| pose.transform_vector(v));
}

// ============================================================================
// Phantoms and listeners
// ============================================================================

/// Turn the body into a phantom volume
#[no_mangle]
pub unsafe extern "C" fn physics_convert_to_phantom(
    body: *mut BodyRef,
    extra_radius: f32,
    callback: Option<PhantomEventCallback>,
) {
    let Some((env, h)) = resolve(body) else {
        return;
    };
    let listener = callback.map(|cb| {
        Box::new(move |e: &PhantomEvent| {
            // SAFETY: handles are live while their bodies exist
            unsafe { cb(i32::from(e.entered), body_ptr(e.phantom.user_data), body_ptr(e.other.user_data)) }
        }) as Box<dyn crate::event::PhantomListener>
    });
    guard((), || {
        let _ = env.convert_to_phantom(h, f64::from(extra_radius), listener);
    });
}

/// 1 if `other` overlapped `phantom` in the last step
#[no_mangle]
pub unsafe extern "C" fn physics_is_inside_phantom(phantom: *mut BodyRef, other: *mut BodyRef) -> i32 {
    match (resolve(phantom), other.as_ref()) {
        (Some((env, h)), Some(o)) => i32::from(env.is_inside_phantom(h, o.handle)),
        _ => 0,
    }
}

/// Install collision and friction callbacks
#[no_mangle]
pub unsafe extern "C" fn physics_set_collision_listener(
    body: *mut BodyRef,
    callback: Option<CollisionEventCallback>,
    collision_call_sleep: f32,
    friction_event_callback: Option<FrictionEventCallback>,
) {
    let Some((env, h)) = resolve(body) else {
        return;
    };
    let collision = callback.map(|cb| {
        Box::new(move |e: &CollisionEvent| {
            let point = FfiPoint::from(e.point);
            let normal = FfiPoint::from(e.normal);
            let speed = e.speed as f32;
            // SAFETY: pointers to locals stay valid for the call
            unsafe {
                cb(
                    body_ptr(e.body.user_data),
                    body_ptr(e.other.user_data),
                    &point,
                    &speed,
                    &normal,
                )
            }
        }) as Box<dyn crate::event::CollisionListener>
    });
    let friction = friction_event_callback.map(|cb| {
        Box::new(move |e: &FrictionEvent| {
            let point = FfiPoint::from(e.point);
            let normal = FfiPoint::from(e.normal);
            let speed = e.speed as f32;
            // SAFETY: pointers to locals stay valid for the call
            unsafe {
                cb(
                    i32::from(e.created),
                    body_ptr(e.body.user_data),
                    body_ptr(e.other.user_data),
                    e.friction_id as usize as *mut c_void,
                    &point,
                    &speed,
                    &normal,
                )
            }
        }) as Box<dyn crate::event::FrictionListener>
    });
    let _ = env.set_collision_listener(h, collision, f64::from(collision_call_sleep), friction);
}

/// Remove collision and friction callbacks
#[no_mangle]
pub unsafe extern "C" fn physics_remove_collision_listener(body: *mut BodyRef) {
    if let Some((env, h)) = resolve(body) {
        env.remove_collision_listener(h);
    }
}

/// Install the contract callback
#[no_mangle]
pub unsafe extern "C" fn physics_set_contract_listener(body: *mut BodyRef, callback: Option<ContractEventCallback>) {
    let Some((env, h)) = resolve(body) else {
        return;
    };
    match callback {
        Some(cb) => {
            let listener = Box::new(move |e: &ContractEvent| {
                // SAFETY: handles are live while their bodies exist
                unsafe {
                    cb(
                        body_ptr(e.body.user_data),
                        e.col_id,
                        e.kind as i16,
                        e.speed_percent as f32,
                        i16::from(e.is_on),
                    )
                }
            });
            let _ = env.set_contract_listener(h, listener);
        }
        None => {
            env.remove_contract_listener(h);
        }
    }
}

/// Remove the contract callback
#[no_mangle]
pub unsafe extern "C" fn physics_remove_contract_listener(body: *mut BodyRef) {
    if let Some((env, h)) = resolve(body) {
        env.remove_contract_listener(h);
    }
}

/// Speed-windowed impact trigger reported through the contract listener
#[no_mangle]
pub unsafe extern "C" fn physics_coll_detection(
    body: *mut BodyRef,
    col_id: i32,
    min_speed: f32,
    max_speed: f32,
    sleep_afterwards: f32,
    speed_threshold: f32,
) -> *mut ObjectRef<CollDetection> {
    let Some((env, h)) = resolve(body) else {
        return std::ptr::null_mut();
    };
    match env.add_coll_detection(
        h,
        col_id,
        f64::from(min_speed),
        f64::from(max_speed),
        f64::from(sleep_afterwards),
        f64::from(speed_threshold),
    ) {
        Ok(handle) => new_ref(env, handle),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Debounced contact detector reported through the contract listener
#[no_mangle]
pub unsafe extern "C" fn physics_contract_detection(
    body: *mut BodyRef,
    col_id: i32,
    time_delay_start: f32,
    time_delay_end: f32,
) -> *mut ObjectRef<ContractDetection> {
    let Some((env, h)) = resolve(body) else {
        return std::ptr::null_mut();
    };
    match env.add_contract_detection(h, col_id, f64::from(time_delay_start), f64::from(time_delay_end)) {
        Ok(handle) => new_ref(env, handle),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Remove a collision detection helper
#[no_mangle]
pub unsafe extern "C" fn destroy_physics_coll_detection(info: *mut ObjectRef<CollDetection>) {
    if let Some((env, h)) = free_ref(info) {
        env.remove_coll_detection(h);
    }
}

/// Remove a contact detection helper
#[no_mangle]
pub unsafe extern "C" fn destroy_physics_contract_detection(info: *mut ObjectRef<ContractDetection>) {
    if let Some((env, h)) = free_ref(info) {
        env.remove_contract_detection(h);
    }
}

// ============================================================================
// Raycasting
// ============================================================================

/// Every hit along the ray; free with `delete_raycast_result`
#[no_mangle]
pub unsafe extern "C" fn raycasting(
    world: *mut Environment,
    flag: i32,
    start_point: *const FfiPoint,
    direction: *const FfiPoint,
    ray_length: f32,
) -> *mut FfiRaycastResult {
    let (Some(env), Some(origin), Some(dir)) = (world.as_ref(), read_point(start_point), read_point(direction)) else {
        return std::ptr::null_mut();
    };
    guard(std::ptr::null_mut(), || {
        let hits = env.raycast(origin, dir, f64::from(ray_length), flag as u32);
        let bodies: Box<[*mut BodyRef]> = hits
            .iter()
            .map(|hit| env.body(hit.body).map_or(std::ptr::null_mut(), |b| body_ptr(b.user_data)))
            .collect();
        let distances: Box<[f32]> = hits.iter().map(|hit| hit.distance as f32).collect();
        Box::into_raw(Box::new(FfiRaycastResult {
            count: hits.len() as i32,
            bodies: Box::into_raw(bodies) as *mut *mut BodyRef,
            distances: Box::into_raw(distances) as *mut f32,
        }))
    })
}

/// Free a result from `raycasting`
#[no_mangle]
pub unsafe extern "C" fn delete_raycast_result(rs: *mut FfiRaycastResult) {
    if rs.is_null() {
        return;
    }
    let rs = Box::from_raw(rs);
    let n = rs.count.max(0) as usize;
    if !rs.bodies.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(rs.bodies, n)));
    }
    if !rs.distances.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(rs.distances, n)));
    }
}

/// Nearest hit distance; returns 1 on a hit
#[no_mangle]
pub unsafe extern "C" fn raycasting_one(
    world: *mut Environment,
    start_point: *const FfiPoint,
    direction: *const FfiPoint,
    ray_length: f32,
    distance_out: *mut f32,
) -> i32 {
    let (Some(env), Some(origin), Some(dir)) = (world.as_ref(), read_point(start_point), read_point(direction)) else {
        return 0;
    };
    match env.raycast_one(origin, dir, f64::from(ray_length), 0) {
        Some(hit) => {
            if let Some(out) = distance_out.as_mut() {
                *out = hit.distance as f32;
            }
            1
        }
        None => 0,
    }
}

/// Hit distance against one body; returns 1 on a hit
#[no_mangle]
pub unsafe extern "C" fn raycasting_object(
    object: *mut BodyRef,
    start_point: *const FfiPoint,
    direction: *const FfiPoint,
    ray_length: f32,
    distance_out: *mut f32,
) -> i32 {
    let (Some((env, h)), Some(origin), Some(dir)) = (resolve(object), read_point(start_point), read_point(direction))
    else {
        return 0;
    };
    match env.raycast_object(h, origin, dir, f64::from(ray_length)) {
        Some(hit) => {
            if let Some(out) = distance_out.as_mut() {
                *out = hit.distance as f32;
            }
            1
        }
        None => 0,
    }
}

// ============================================================================
// Constraints
// ============================================================================

unsafe fn joint_ref(env: &mut Environment, created: Result<Handle<Joint>, PhysicsError>) -> *mut ObjectRef<Joint> {
    match created {
        Ok(handle) => new_ref(env, handle),
        Err(_) => std::ptr::null_mut(),
    }
}

unsafe fn other_handle(other: *mut BodyRef) -> Option<Handle<RigidBody>> {
    other.as_ref().map(|o| o.handle)
}

/// Ball joint at a world point (`other == null` pins to the world)
#[no_mangle]
pub unsafe extern "C" fn set_physics_ball_joint(
    body: *mut BodyRef,
    other: *mut BodyRef,
    joint_position_ws: *const FfiPoint,
) -> *mut ObjectRef<Joint> {
    let (Some((env, h)), Some(anchor)) = (resolve(body), read_point(joint_position_ws)) else {
        return std::ptr::null_mut();
    };
    let created = env.add_ball_joint(h, other_handle(other), anchor);
    joint_ref(env, created)
}

/// Weld at the current relative pose
#[no_mangle]
pub unsafe extern "C" fn set_physics_fixed_constraint(body: *mut BodyRef, other: *mut BodyRef) -> *mut ObjectRef<Joint> {
    let Some((env, h)) = resolve(body) else {
        return std::ptr::null_mut();
    };
    let created = env.add_fixed_constraint(h, other_handle(other));
    joint_ref(env, created)
}

/// Hinge about a world axis through a world anchor
#[no_mangle]
pub unsafe extern "C" fn set_physics_hinge(
    body: *mut BodyRef,
    other: *mut BodyRef,
    anchor_ws: *const FfiPoint,
    free_axis_ws: *const FfiPoint,
) -> *mut ObjectRef<Joint> {
    let (Some((env, h)), Some(anchor), Some(axis)) = (resolve(body), read_point(anchor_ws), read_point(free_axis_ws))
    else {
        return std::ptr::null_mut();
    };
    let created = env.add_hinge(h, other_handle(other), anchor, axis);
    joint_ref(env, created)
}

unsafe fn limits(limited: i32, min: *const FfiPoint, max: *const FfiPoint) -> AxisLimits {
    if flag(limited) {
        AxisLimits::range(read_point_or_zero(min), read_point_or_zero(max))
    } else {
        AxisLimits::FREE
    }
}

/// Generic limited constraint (limit flags: 0 = free, 1 = limited)
#[no_mangle]
pub unsafe extern "C" fn set_physics_constraint(
    body: *mut BodyRef,
    other: *mut BodyRef,
    force_factor: f32,
    damp_factor: f32,
    translation_limit: i32,
    translation_freedom_min: *const FfiPoint,
    translation_freedom_max: *const FfiPoint,
    rotation_limit: i32,
    rotation_freedom_min: *const FfiPoint,
    rotation_freedom_max: *const FfiPoint,
) -> *mut ObjectRef<Joint> {
    let Some((env, h)) = resolve(body) else {
        return std::ptr::null_mut();
    };
    let created = env.add_generic_constraint(
        h,
        other_handle(other),
        limits(translation_limit, translation_freedom_min, translation_freedom_max),
        limits(rotation_limit, rotation_freedom_min, rotation_freedom_max),
        f64::from(force_factor),
        f64::from(damp_factor),
    );
    joint_ref(env, created)
}

/// Destroy a joint or constraint
#[no_mangle]
pub unsafe extern "C" fn destroy_physics_constraint(constraint: *mut ObjectRef<Joint>) {
    if let Some((env, h)) = free_ref(constraint) {
        env.remove_joint(h);
    }
}

// ============================================================================
// Forces and springs
// ============================================================================

/// Constant force from body1's point toward body2's point
#[no_mangle]
pub unsafe extern "C" fn create_physics_force(
    body1: *mut BodyRef,
    body2: *mut BodyRef,
    pos1_os: *const FfiPoint,
    pos2_os: *const FfiPoint,
    force_value: f32,
    push_object2: i32,
) -> *mut ObjectRef<PointForce> {
    let (Some((env, a)), Some(b)) = (resolve(body1), other_handle(body2)) else {
        return std::ptr::null_mut();
    };
    match env.add_force(
        a,
        b,
        read_point_or_zero(pos1_os),
        read_point_or_zero(pos2_os),
        f64::from(force_value),
        flag(push_object2),
    ) {
        Ok(handle) => new_ref(env, handle),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Retarget a force's magnitude
#[no_mangle]
pub unsafe extern "C" fn set_physics_force_value(force: *mut ObjectRef<PointForce>, force_value: f32) {
    if let Some((env, h)) = resolve(force) {
        let _ = env.set_force_value(h, f64::from(force_value));
    }
}

/// Destroy a force
#[no_mangle]
pub unsafe extern "C" fn destroy_physics_force(force: *mut ObjectRef<PointForce>) {
    if let Some((env, h)) = free_ref(force) {
        env.remove_force(h);
    }
}

/// Spring between two object-space points
#[no_mangle]
pub unsafe extern "C" fn create_physics_spring(
    body1: *mut BodyRef,
    body2: *mut BodyRef,
    pos1_os: *const FfiPoint,
    pos2_os: *const FfiPoint,
    length: f32,
    constant: f32,
    spring_damping: f32,
    global_damping: f32,
    use_stiff_spring: i32,
    values_are_relative: i32,
    force_only_on_stretch: i32,
) -> *mut ObjectRef<Spring> {
    let (Some((env, a)), Some(b)) = (resolve(body1), other_handle(body2)) else {
        return std::ptr::null_mut();
    };
    let spring = Spring::new(
        Attachment::new(a, read_point_or_zero(pos1_os)),
        Attachment::new(b, read_point_or_zero(pos2_os)),
        f64::from(length),
        f64::from(constant),
    )
    .with_damping(f64::from(spring_damping), f64::from(global_damping))
    .stiff(flag(use_stiff_spring))
    .relative(flag(values_are_relative))
    .stretch_only(flag(force_only_on_stretch));
    match env.add_spring(spring) {
        Ok(handle) => new_ref(env, handle),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy a spring
#[no_mangle]
pub unsafe extern "C" fn destroy_physics_spring(spring: *mut ObjectRef<Spring>) {
    if let Some((env, h)) = free_ref(spring) {
        env.remove_spring(h);
    }
}

// ============================================================================
// Motion controllers
// ============================================================================

/// PD controller pulling the body toward `target`
#[no_mangle]
pub unsafe extern "C" fn create_motion_controller(
    body: *mut BodyRef,
    target: *const FfiPoint,
    max_translation_force: *const FfiPoint,
    max_torque: f32,
    force_factor: f32,
    damp_factor: f32,
    angular_damp_factor: f32,
    torque_factor: f32,
) -> *mut ObjectRef<MotionController> {
    let Some((env, h)) = resolve(body) else {
        return std::ptr::null_mut();
    };
    let Some(position) = env.body(h).map(|b| b.pose.position) else {
        return std::ptr::null_mut();
    };
    let gains = MotionGains {
        force_factor: f64::from(force_factor),
        damp_factor: f64::from(damp_factor),
        torque_factor: f64::from(torque_factor),
        angular_damp_factor: f64::from(angular_damp_factor),
    };
    match env.add_motion_controller(
        h,
        read_point(target).unwrap_or(position),
        read_point_or_zero(max_translation_force),
        f64::from(max_torque),
        gains,
    ) {
        Ok(handle) => new_ref(env, handle),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy a motion controller
#[no_mangle]
pub unsafe extern "C" fn destroy_motion_controller(controller: *mut ObjectRef<MotionController>) {
    if let Some((env, h)) = free_ref(controller) {
        env.remove_motion_controller(h);
    }
}

unsafe fn with_controller(controller: *mut ObjectRef<MotionController>, f: impl FnOnce(&mut MotionController)) {
    if let Some(c) = resolve(controller).and_then(|(env, h)| env.motion_controller_mut(h)) {
        f(c);
    }
}

/// Retarget the position
#[no_mangle]
pub unsafe extern "C" fn motion_controller_set_target_pos(
    controller: *mut ObjectRef<MotionController>,
    pos_ws: *const FfiPoint,
) {
    if let Some(target) = read_point(pos_ws) {
        with_controller(controller, |c| c.set_target_position(target));
    }
}

/// Replace the per-component force cap
#[no_mangle]
pub unsafe extern "C" fn motion_controller_set_max_translation_force(
    controller: *mut ObjectRef<MotionController>,
    max_translation_force: *const FfiPoint,
) {
    if let Some(max) = read_point(max_translation_force) {
        with_controller(controller, |c| c.set_max_translation_force(max));
    }
}

/// Replace the torque cap (`max_torque` points to one float)
#[no_mangle]
pub unsafe extern "C" fn motion_controller_set_max_torque(
    controller: *mut ObjectRef<MotionController>,
    max_torque: *const f32,
) {
    if let Some(&max) = max_torque.as_ref() {
        with_controller(controller, |c| c.set_max_torque(f64::from(max)));
    }
}

/// Replace the proportional position gain
#[no_mangle]
pub unsafe extern "C" fn motion_controller_set_force_factor(controller: *mut ObjectRef<MotionController>, force_factor: f32) {
    with_controller(controller, |c| c.set_force_factor(f64::from(force_factor)));
}

/// Replace the linear damping gain
#[no_mangle]
pub unsafe extern "C" fn motion_controller_set_damp_factor(controller: *mut ObjectRef<MotionController>, damp_factor: f32) {
    with_controller(controller, |c| c.set_damp_factor(f64::from(damp_factor)));
}

/// Replace the angular damping gain
#[no_mangle]
pub unsafe extern "C" fn motion_controller_set_angular_damp_factor(
    controller: *mut ObjectRef<MotionController>,
    angular_damp_factor: f32,
) {
    with_controller(controller, |c| c.set_angular_damp_factor(f64::from(angular_damp_factor)));
}

/// Replace the proportional orientation gain
#[no_mangle]
pub unsafe extern "C" fn motion_controller_set_torque_factor(
    controller: *mut ObjectRef<MotionController>,
    torque_factor: f32,
) {
    with_controller(controller, |c| c.set_torque_factor(f64::from(torque_factor)));
}

// ============================================================================
// Tests
// ============================================================================
