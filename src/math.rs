//! Vector and rotation helpers
//!
//! The engine simulates in double precision (`glam::DVec3` / `glam::DQuat`)
//! and narrows to `f32` only at the C boundary.
//!
//! # Types
//!
//! - [`Pose`]: rigid transform (position + rotation) of a body frame
//! - [`Aabb`]: axis-aligned bounding box used by the broad phase and queries

pub use glam::{DQuat, DVec3};

/// Tolerance used for degenerate-length checks.
pub const EPSILON: f64 = 1.0e-9;

// ============================================================================
// Pose
// ============================================================================

/// Rigid transform of a body frame in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pose {
    /// Frame origin in world space
    pub position: DVec3,
    /// Frame orientation
    pub rotation: DQuat,
}

impl Pose {
    /// Identity pose at the world origin
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };

    /// Create a pose, normalizing the rotation
    #[inline]
    #[must_use]
    pub fn new(position: DVec3, rotation: DQuat) -> Self {
        Self {
            position,
            rotation: normalize_rotation(rotation),
        }
    }

    /// Local point -> world point
    #[inline]
    #[must_use]
    pub fn transform_point(&self, p: DVec3) -> DVec3 {
        self.position + self.rotation * p
    }

    /// World point -> local point
    #[inline]
    #[must_use]
    pub fn inverse_transform_point(&self, p: DVec3) -> DVec3 {
        self.rotation.inverse() * (p - self.position)
    }

    /// Local direction -> world direction
    #[inline]
    #[must_use]
    pub fn transform_vector(&self, v: DVec3) -> DVec3 {
        self.rotation * v
    }

    /// World direction -> local direction
    #[inline]
    #[must_use]
    pub fn inverse_transform_vector(&self, v: DVec3) -> DVec3 {
        self.rotation.inverse() * v
    }

    /// World -> local transform
    #[inline]
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            position: rotation * -self.position,
            rotation,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// AABB
// ============================================================================

/// Axis-aligned bounding box
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: DVec3,
    /// Maximum corner
    pub max: DVec3,
}

impl Aabb {
    /// Empty box (inverted bounds, absorbs the first point added)
    pub const EMPTY: Self = Self {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    /// Create from corners
    #[inline]
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all points
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a DVec3>) -> Self {
        let mut aabb = Self::EMPTY;
        for p in points {
            aabb.grow(*p);
        }
        aabb
    }

    /// Extend the box to contain `p`
    #[inline]
    pub fn grow(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// True when no point has been added
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Box inflated by `margin` on every side
    #[inline]
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: self.min - DVec3::splat(margin),
            max: self.max + DVec3::splat(margin),
        }
    }

    /// Union of two boxes
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Overlap test (touching counts)
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Center point
    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Full size along each axis
    #[inline]
    pub fn extents(&self) -> DVec3 {
        self.max - self.min
    }

    /// The eight corners
    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a.x, a.y, a.z),
            DVec3::new(b.x, a.y, a.z),
            DVec3::new(a.x, b.y, a.z),
            DVec3::new(b.x, b.y, a.z),
            DVec3::new(a.x, a.y, b.z),
            DVec3::new(b.x, a.y, b.z),
            DVec3::new(a.x, b.y, b.z),
            DVec3::new(b.x, b.y, b.z),
        ]
    }

    /// World-space bounds of a local box carried by `pose`
    pub fn transformed(&self, pose: &Pose) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for c in self.corners() {
            out.grow(pose.transform_point(c));
        }
        out
    }

    /// Slab test: entry distance of a ray, if it hits within `max_t`
    pub fn ray_entry(&self, origin: DVec3, dir: DVec3, max_t: f64) -> Option<f64> {
        let mut t_min = 0.0_f64;
        let mut t_max = max_t;
        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            if d.abs() < EPSILON {
                if o < self.min[axis] || o > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t1 = (self.min[axis] - o) * inv;
            let mut t2 = (self.max[axis] - o) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Normalize a quaternion, falling back to identity when degenerate
#[inline]
#[must_use]
pub fn normalize_rotation(q: DQuat) -> DQuat {
    let len = q.length();
    if len < EPSILON || !len.is_finite() {
        DQuat::IDENTITY
    } else {
        q / len
    }
}

/// Advance `q` by angular velocity `w` over `dt` (first-order, renormalized)
#[inline]
#[must_use]
pub fn integrate_rotation(q: DQuat, w: DVec3, dt: f64) -> DQuat {
    let spin = DQuat::from_xyzw(w.x, w.y, w.z, 0.0) * q;
    normalize_rotation(q + spin * (0.5 * dt))
}

/// Angular velocity that carries `prev` to `curr` in `dt`
#[inline]
#[must_use]
pub fn angular_velocity_between(prev: DQuat, curr: DQuat, dt: f64) -> DVec3 {
    let dq = curr * prev.inverse();
    let w = DVec3::new(dq.x, dq.y, dq.z) * (2.0 / dt);
    if dq.w < 0.0 {
        -w
    } else {
        w
    }
}

/// Rotation vector (axis * angle) of the rotation taking `from` to `to`,
/// expressed in world space
#[inline]
#[must_use]
pub fn rotation_error(from: DQuat, to: DQuat) -> DVec3 {
    let dq = to * from.inverse();
    let dq = if dq.w < 0.0 { -dq } else { dq };
    let (axis, angle) = dq.to_axis_angle();
    if angle.abs() < EPSILON || !angle.is_finite() {
        DVec3::ZERO
    } else {
        axis * angle
    }
}

/// Rotation vector (axis * angle) of `q`, shortest arc
#[inline]
#[must_use]
pub fn rotation_vector(q: DQuat) -> DVec3 {
    rotation_error(DQuat::IDENTITY, q)
}

/// Component-wise clamp to `[-limit, limit]`
#[inline]
#[must_use]
pub fn clamp_abs(v: DVec3, limit: DVec3) -> DVec3 {
    let limit = limit.abs();
    v.clamp(-limit, limit)
}

/// Orthonormal tangents for a unit normal
pub fn tangent_frame(normal: DVec3) -> (DVec3, DVec3) {
    // Pick axis least parallel to normal
    let a = normal.abs();
    let reference = if a.x <= a.y && a.x <= a.z {
        DVec3::X
    } else if a.y <= a.z {
        DVec3::Y
    } else {
        DVec3::Z
    };
    let t1 = normal.cross(reference).normalize_or_zero();
    let t2 = normal.cross(t1);
    (t1, t2)
}

/// True when every component is finite
#[inline]
pub fn is_finite(v: DVec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_roundtrip_point() {
        let pose = Pose::new(
            DVec3::new(1.0, 2.0, 3.0),
            DQuat::from_rotation_y(std::f64::consts::FRAC_PI_2),
        );
        let p = DVec3::new(0.5, -1.0, 4.0);
        let back = pose.inverse_transform_point(pose.transform_point(p));
        assert_relative_eq!(back.x, p.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-12);
        assert_relative_eq!(back.z, p.z, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_rotation_falls_back() {
        let pose = Pose::new(DVec3::ZERO, DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(pose.rotation, DQuat::IDENTITY);
    }

    #[test]
    fn test_aabb_transformed_rotated() {
        let aabb = Aabb::new(DVec3::new(-1.0, -0.5, -0.5), DVec3::new(1.0, 0.5, 0.5));
        let pose = Pose::new(
            DVec3::new(10.0, 0.0, 0.0),
            DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2),
        );
        let world = aabb.transformed(&pose);
        assert_relative_eq!(world.min.x, 9.5, epsilon = 1e-9);
        assert_relative_eq!(world.max.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_aabb_ray_entry() {
        let aabb = Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0));
        let t = aabb
            .ray_entry(DVec3::new(-5.0, 0.0, 0.0), DVec3::X, 100.0)
            .unwrap();
        assert_relative_eq!(t, 4.0, epsilon = 1e-12);
        assert!(aabb
            .ray_entry(DVec3::new(-5.0, 3.0, 0.0), DVec3::X, 100.0)
            .is_none());
        assert!(aabb
            .ray_entry(DVec3::new(-5.0, 0.0, 0.0), DVec3::X, 3.0)
            .is_none());
    }

    #[test]
    fn test_integrate_and_recover_angular_velocity() {
        let w = DVec3::new(0.0, 2.0, 0.0);
        let dt = 1.0 / 240.0;
        let q1 = integrate_rotation(DQuat::IDENTITY, w, dt);
        let recovered = angular_velocity_between(DQuat::IDENTITY, q1, dt);
        assert_relative_eq!(recovered.y, 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_rotation_error_axis() {
        let to = DQuat::from_rotation_x(0.3);
        let err = rotation_error(DQuat::IDENTITY, to);
        assert_relative_eq!(err.x, 0.3, epsilon = 1e-9);
        assert_relative_eq!(err.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tangent_frame_orthonormal() {
        let n = DVec3::new(0.3, 0.9, -0.2).normalize();
        let (t1, t2) = tangent_frame(n);
        assert!(t1.dot(n).abs() < 1e-12);
        assert!(t2.dot(n).abs() < 1e-12);
        assert!(t1.dot(t2).abs() < 1e-12);
        assert_relative_eq!(t1.length(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clamp_abs() {
        let v = clamp_abs(DVec3::new(5.0, -5.0, 0.5), DVec3::splat(1.0));
        assert_eq!(v, DVec3::new(1.0, -1.0, 0.5));
    }
}
