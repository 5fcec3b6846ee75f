//! Raycasting
//!
//! Read-only ray queries against body shapes.
//!
//! # Features
//!
//! - Ray-Sphere (balls), ray-convex (hull plane clipping), ray-triangle
//!   (Möller–Trumbore, concave meshes)
//! - World queries with an AABB prefilter and a layer flag
//! - All hits, closest hit, or a single body
//!
//! Rays are tested in each body's object space. Phantoms are never hit.

use crate::arena::Arena;
use crate::body::{BodyHandle, RigidBody};
use crate::collider::Triangle;
use crate::filter::LayerMaskTable;
use crate::math::{is_finite, Aabb, DVec3, Pose, EPSILON};
use crate::shape::{ConvexPiece, Shape, TriMesh};

/// A finite ray segment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Ray origin point
    pub origin: DVec3,
    /// Unit direction
    pub direction: DVec3,
    /// Maximum distance
    pub length: f64,
}

impl Ray {
    /// Create a ray; `None` for a zero or non-finite direction
    pub fn new(origin: DVec3, direction: DVec3, length: f64) -> Option<Self> {
        if !is_finite(origin) || !is_finite(direction) || !length.is_finite() || length < 0.0 {
            return None;
        }
        let direction = direction.try_normalize()?;
        Some(Self {
            origin,
            direction,
            length,
        })
    }

    /// Point along the ray at distance `t`
    #[inline]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }

    /// Same ray expressed in the frame of `pose`
    #[inline]
    pub fn to_local(&self, pose: &Pose) -> Self {
        Self {
            origin: pose.inverse_transform_point(self.origin),
            direction: pose.inverse_transform_vector(self.direction),
            length: self.length,
        }
    }
}

/// Result of a ray intersection test
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Hit body
    pub body: BodyHandle,
    /// Distance from the origin
    pub distance: f64,
    /// World-space hit point
    pub point: DVec3,
    /// Surface normal at the hit point (world)
    pub normal: DVec3,
}

/// Distance and normal of a hit in the frame the test ran in
type LocalHit = (f64, DVec3);

fn closer(a: Option<LocalHit>, b: Option<LocalHit>) -> Option<LocalHit> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y.0 < x.0 { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Ray-Sphere intersection; an origin inside the sphere hits at 0
#[inline]
pub fn ray_sphere(ray: &Ray, center: DVec3, radius: f64) -> Option<LocalHit> {
    let oc = ray.origin - center;
    let c = oc.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some((0.0, -ray.direction));
    }
    let b = oc.dot(ray.direction);
    if b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    if t > ray.length {
        return None;
    }
    let normal = (ray.at(t) - center) / radius;
    Some((t, normal))
}

/// Two-sided ray-triangle intersection (Möller–Trumbore)
pub fn ray_triangle(ray: &Ray, tri: &Triangle) -> Option<LocalHit> {
    let [a, b, c] = tri.v;
    let e1 = b - a;
    let e2 = c - a;
    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    if t < 0.0 || t > ray.length {
        return None;
    }
    let n = e1.cross(e2).normalize_or_zero();
    let normal = if n.dot(ray.direction) > 0.0 { -n } else { n };
    Some((t, normal))
}

/// Ray against a convex hull grown by `margin` (plane clipping)
pub fn ray_convex(ray: &Ray, piece: &ConvexPiece, margin: f64) -> Option<LocalHit> {
    let mut t_enter = 0.0_f64;
    let mut t_exit = ray.length;
    let mut enter_normal = -ray.direction;
    for tri in piece.triangles() {
        let Some(n) = tri.area_normal().try_normalize() else {
            continue;
        };
        let d = n.dot(tri.v[0]) + margin;
        let dist = n.dot(ray.origin) - d;
        let denom = n.dot(ray.direction);
        if denom.abs() < EPSILON {
            if dist > 0.0 {
                return None;
            }
            continue;
        }
        let t = -dist / denom;
        if denom < 0.0 {
            if t > t_enter {
                t_enter = t;
                enter_normal = n;
            }
        } else {
            t_exit = t_exit.min(t);
        }
        if t_enter > t_exit {
            return None;
        }
    }
    Some((t_enter, enter_normal))
}

/// Ray against the triangles of a mesh overlapping the ray's bounds
pub fn ray_mesh(ray: &Ray, mesh: &TriMesh) -> Option<LocalHit> {
    let bounds = Aabb::from_points([ray.origin, ray.at(ray.length)].iter()).expanded(EPSILON);
    mesh.query(&bounds)
        .filter_map(|i| ray_triangle(ray, &mesh.triangle(i)))
        .fold(None, |best, hit| closer(best, Some(hit)))
}

/// Ray against a shape placed at `pose`; returns the world-space hit
pub fn ray_shape(ray: &Ray, shape: &Shape, pose: &Pose, margin: f64) -> Option<(f64, DVec3, DVec3)> {
    let local = ray.to_local(pose);
    let hit = match shape {
        Shape::Ball { radius } => ray_sphere(&local, DVec3::ZERO, radius + margin),
        Shape::Compound { convex, concave } => {
            let hull_hit = convex
                .iter()
                .filter_map(|p| ray_convex(&local, p, margin))
                .fold(None, |best, h| closer(best, Some(h)));
            let mesh_hit = concave
                .iter()
                .filter_map(|m| ray_mesh(&local, m))
                .fold(None, |best, h| closer(best, Some(h)));
            closer(hull_hit, mesh_hit)
        }
    }?;
    let (t, n) = hit;
    Some((t, ray.at(t), pose.transform_vector(n)))
}

// ============================================================================
// World queries
// ============================================================================

fn body_hit(handle: BodyHandle, body: &RigidBody, ray: &Ray) -> Option<RayHit> {
    if body.is_phantom() || !body.collides() {
        return None;
    }
    body.current_aabb().ray_entry(ray.origin, ray.direction, ray.length)?;
    let (distance, point, normal) = ray_shape(ray, &body.shape, &body.pose, body.margin)?;
    Some(RayHit {
        body: handle,
        distance,
        point,
        normal,
    })
}

/// Every hit along the ray, nearest first; `flag` is a layer bitmask (0 = all)
pub fn cast_all(bodies: &Arena<RigidBody>, ray: &Ray, flag: u32) -> Vec<RayHit> {
    let mut hits: Vec<RayHit> = bodies
        .iter()
        .filter(|(_, b)| LayerMaskTable::ray_accepts(flag, &b.filter))
        .filter_map(|(h, b)| body_hit(h, b, ray))
        .collect();
    hits.sort_by(|x, y| x.distance.total_cmp(&y.distance).then(x.body.cmp(&y.body)));
    hits
}

/// Nearest hit along the ray
pub fn cast_closest(bodies: &Arena<RigidBody>, ray: &Ray, flag: u32) -> Option<RayHit> {
    bodies
        .iter()
        .filter(|(_, b)| LayerMaskTable::ray_accepts(flag, &b.filter))
        .filter_map(|(h, b)| body_hit(h, b, ray))
        .min_by(|x, y| x.distance.total_cmp(&y.distance).then(x.body.cmp(&y.body)))
}

/// Hit against one body only
pub fn cast_body(bodies: &Arena<RigidBody>, body: BodyHandle, ray: &Ray) -> Option<RayHit> {
    body_hit(body, bodies.get(body)?, ray)
}
