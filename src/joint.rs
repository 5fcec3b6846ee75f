//! Joint System for Rigid Body Connections
//!
//! XPBD joint constraints solved every substep alongside contacts.
//!
//! # Joint Types
//!
//! - **Ball**: anchor points coincide, 3 rotational DOF
//! - **Fixed**: anchor points coincide and the relative rotation is kept
//! - **Hinge**: ball joint plus aligned axes, 1 rotational DOF
//! - **Generic**: per-axis translation and rotation ranges in body A's frame,
//!   soft enforcement driven by a force factor and a damping factor
//!
//! Anchors are stored in each body's mass frame. A joint without body B is
//! attached to the world, in which case B's anchor is a world point.

use crate::body::BodyHandle;
use crate::error::PhysicsError;
use crate::math::{is_finite, rotation_error, rotation_vector, DQuat, DVec3, Pose};
use crate::solver::{apply_angular, apply_angular_impulse, apply_positional, apply_velocity_impulse, SolverBody};

/// Joint type enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointType {
    /// Ball-and-socket
    Ball,
    /// Weld
    Fixed,
    /// One rotational DOF
    Hinge,
    /// Per-axis limited
    Generic,
}

/// Range applied to all three axes of one kind (translation or rotation)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisLimits {
    /// `false` leaves every axis free
    pub limited: bool,
    /// Lower bound per axis (meters or radians)
    pub min: DVec3,
    /// Upper bound per axis
    pub max: DVec3,
}

impl AxisLimits {
    /// No limit
    pub const FREE: Self = Self {
        limited: false,
        min: DVec3::ZERO,
        max: DVec3::ZERO,
    };

    /// Every axis locked at zero
    pub const LOCKED: Self = Self {
        limited: true,
        min: DVec3::ZERO,
        max: DVec3::ZERO,
    };

    /// Ranged axes; bounds are reordered per axis when swapped
    pub fn range(min: DVec3, max: DVec3) -> Self {
        Self {
            limited: true,
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Amount by which `value` lies outside the range, per axis
    #[inline]
    pub fn violation(&self, value: DVec3) -> DVec3 {
        if self.limited {
            value - value.clamp(self.min, self.max)
        } else {
            DVec3::ZERO
        }
    }
}

/// Kind-specific joint data
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JointKind {
    /// Point coincidence
    Ball,
    /// Full lock; `rest_rotation` is B's orientation relative to A
    Fixed {
        /// `q_a^-1 * q_b` at creation
        rest_rotation: DQuat,
    },
    /// Free rotation about one axis
    Hinge {
        /// Hinge axis in A's frame
        local_axis_a: DVec3,
        /// Hinge axis in B's frame (world when B is the world)
        local_axis_b: DVec3,
    },
    /// Limited 6-DOF
    Generic {
        /// `q_a^-1 * q_b` at creation
        rest_rotation: DQuat,
        /// Translation of B's anchor in A's frame
        translation: AxisLimits,
        /// Rotation of B relative to A, as a rotation vector in A's frame
        rotation: AxisLimits,
        /// Relative velocity damping on limited axes (1/s)
        damping: f64,
    },
}

/// Constraint between a body and another body or the world
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Joint {
    /// First body
    pub body_a: BodyHandle,
    /// Second body (`None` = world)
    pub body_b: Option<BodyHandle>,
    /// Anchor in A's mass frame
    pub local_anchor_a: DVec3,
    /// Anchor in B's mass frame (world point when B is the world)
    pub local_anchor_b: DVec3,
    /// Kind-specific data
    pub kind: JointKind,
    /// Positional compliance (0 = rigid)
    pub compliance: f64,
    /// Angular compliance (0 = rigid)
    pub angular_compliance: f64,
}

/// Body end of a joint at creation time: handle and mass frame
pub type JointEnd = (BodyHandle, Pose);

fn world_or(end: Option<JointEnd>) -> (Option<BodyHandle>, Pose) {
    match end {
        Some((h, frame)) => (Some(h), frame),
        None => (None, Pose::IDENTITY),
    }
}

impl Joint {
    fn anchored(a: JointEnd, b: Option<JointEnd>, anchor_ws: DVec3, kind: JointKind) -> Self {
        let (body_b, frame_b) = world_or(b);
        Self {
            body_a: a.0,
            body_b,
            local_anchor_a: a.1.inverse_transform_point(anchor_ws),
            local_anchor_b: frame_b.inverse_transform_point(anchor_ws),
            kind,
            compliance: 0.0,
            angular_compliance: 0.0,
        }
    }

    /// Ball joint at the world point `anchor_ws`
    pub fn ball(a: JointEnd, b: Option<JointEnd>, anchor_ws: DVec3) -> Result<Self, PhysicsError> {
        if !is_finite(anchor_ws) {
            return Err(PhysicsError::InvalidConstraint {
                reason: "non-finite anchor",
            });
        }
        Ok(Self::anchored(a, b, anchor_ws, JointKind::Ball))
    }

    /// Fixed joint keeping the current relative pose (anchored at A's center)
    pub fn fixed(a: JointEnd, b: Option<JointEnd>) -> Self {
        let (_, frame_b) = world_or(b);
        let rest_rotation = a.1.rotation.inverse() * frame_b.rotation;
        Self::anchored(a, b, a.1.position, JointKind::Fixed { rest_rotation })
    }

    /// Hinge about the world axis `axis_ws` through `anchor_ws`
    pub fn hinge(a: JointEnd, b: Option<JointEnd>, anchor_ws: DVec3, axis_ws: DVec3) -> Result<Self, PhysicsError> {
        let axis = axis_ws.try_normalize().ok_or(PhysicsError::ZeroLengthVector {
            context: "hinge axis",
        })?;
        if !is_finite(anchor_ws) {
            return Err(PhysicsError::InvalidConstraint {
                reason: "non-finite anchor",
            });
        }
        let (_, frame_b) = world_or(b);
        let kind = JointKind::Hinge {
            local_axis_a: a.1.inverse_transform_vector(axis),
            local_axis_b: frame_b.inverse_transform_vector(axis),
        };
        Ok(Self::anchored(a, b, anchor_ws, kind))
    }

    /// Generic limited constraint keeping the current relative pose as rest
    pub fn generic(
        a: JointEnd,
        b: Option<JointEnd>,
        translation: AxisLimits,
        rotation: AxisLimits,
        damping: f64,
    ) -> Self {
        let (_, frame_b) = world_or(b);
        let rest_rotation = a.1.rotation.inverse() * frame_b.rotation;
        Self::anchored(
            a,
            b,
            a.1.position,
            JointKind::Generic {
                rest_rotation,
                translation,
                rotation,
                damping: damping.max(0.0),
            },
        )
    }

    /// Builder: compliance for both the positional and angular parts
    #[must_use]
    pub fn with_compliance(mut self, compliance: f64) -> Self {
        self.compliance = compliance.max(0.0);
        self.angular_compliance = compliance.max(0.0);
        self
    }

    /// Get joint type
    #[inline]
    pub fn joint_type(&self) -> JointType {
        match self.kind {
            JointKind::Ball => JointType::Ball,
            JointKind::Fixed { .. } => JointType::Fixed,
            JointKind::Hinge { .. } => JointType::Hinge,
            JointKind::Generic { .. } => JointType::Generic,
        }
    }

    /// True if `body` is one of the joint's bodies
    #[inline]
    pub fn involves(&self, body: BodyHandle) -> bool {
        self.body_a == body || self.body_b == Some(body)
    }

    /// Current world anchors
    pub fn world_anchors(&self, bodies: &[SolverBody], a: Option<usize>, b: Option<usize>) -> (DVec3, DVec3) {
        let frame_a = a.map_or(Pose::IDENTITY, |i| bodies[i].frame());
        let frame_b = b.map_or(Pose::IDENTITY, |i| bodies[i].frame());
        (
            frame_a.transform_point(self.local_anchor_a),
            frame_b.transform_point(self.local_anchor_b),
        )
    }

    /// Position-level solve for one iteration
    pub fn solve_position(&self, bodies: &mut [SolverBody], a: Option<usize>, b: Option<usize>, h: f64) {
        if a.is_none() {
            return;
        }
        let q_a = a.map_or(DQuat::IDENTITY, |i| bodies[i].q);
        let q_b = b.map_or(DQuat::IDENTITY, |i| bodies[i].q);

        match self.kind {
            JointKind::Ball => {
                self.solve_anchor(bodies, a, b, h);
            }
            JointKind::Fixed { rest_rotation } => {
                let theta = rotation_error(q_b, q_a * rest_rotation);
                apply_angular(bodies, a, b, -theta, self.angular_compliance, h);
                self.solve_anchor(bodies, a, b, h);
            }
            JointKind::Hinge {
                local_axis_a,
                local_axis_b,
            } => {
                let axis_a = q_a * local_axis_a;
                let axis_b = q_b * local_axis_b;
                apply_angular(bodies, a, b, axis_a.cross(axis_b), self.angular_compliance, h);
                self.solve_anchor(bodies, a, b, h);
            }
            JointKind::Generic {
                rest_rotation,
                translation,
                rotation,
                ..
            } => {
                if rotation.limited {
                    let deviation = rotation_vector(q_a.inverse() * q_b * rest_rotation.inverse());
                    let excess = rotation.violation(deviation);
                    apply_angular(bodies, a, b, q_a * excess, self.angular_compliance, h);
                }
                if translation.limited {
                    let (pa, pb) = self.world_anchors(bodies, a, b);
                    let q_a = a.map_or(DQuat::IDENTITY, |i| bodies[i].q);
                    let offset = q_a.inverse() * (pb - pa);
                    let excess = translation.violation(offset);
                    apply_positional(bodies, a, b, pa, pb, q_a * excess, self.compliance, h);
                }
            }
        }
    }

    fn solve_anchor(&self, bodies: &mut [SolverBody], a: Option<usize>, b: Option<usize>, h: f64) {
        let (pa, pb) = self.world_anchors(bodies, a, b);
        apply_positional(bodies, a, b, pa, pb, pb - pa, self.compliance, h);
    }

    /// Velocity-level pass (damping of generic constraints)
    pub fn solve_velocity(&self, bodies: &mut [SolverBody], a: Option<usize>, b: Option<usize>, h: f64) {
        let JointKind::Generic {
            translation,
            rotation,
            damping,
            ..
        } = self.kind
        else {
            return;
        };
        if damping <= 0.0 || a.is_none() {
            return;
        }
        let k = (damping * h).min(1.0);
        if translation.limited {
            let (pa, pb) = self.world_anchors(bodies, a, b);
            let va = a.map_or(DVec3::ZERO, |i| bodies[i].point_velocity(pa));
            let vb = b.map_or(DVec3::ZERO, |i| bodies[i].point_velocity(pb));
            apply_velocity_impulse(bodies, a, b, pa, pb, (vb - va) * k);
        }
        if rotation.limited {
            let wa = a.map_or(DVec3::ZERO, |i| bodies[i].w);
            let wb = b.map_or(DVec3::ZERO, |i| bodies[i].w);
            apply_angular_impulse(bodies, a, b, (wb - wa) * k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::solver::{JointRef, Solver};
    use approx::assert_relative_eq;

    fn handle(i: u32) -> BodyHandle {
        BodyHandle::from_bits(u64::from(i))
    }

    fn dynamic_at(x: DVec3) -> SolverBody {
        SolverBody {
            inv_mass: 1.0,
            inv_inertia: DVec3::splat(6.0),
            gravity_scale: 1.0,
            ..SolverBody::fixed(handle(0), Pose::new(x, DQuat::IDENTITY))
        }
    }

    fn run(joint: &Joint, body: SolverBody, steps: usize) -> SolverBody {
        let mut solver = Solver::new(SolverConfig::default());
        solver.bodies.push(body);
        let refs = [JointRef {
            joint,
            a: Some(0),
            b: None,
        }];
        for _ in 0..steps {
            solver.step(&refs, DVec3::new(0.0, -9.81, 0.0), 1.0 / 60.0);
        }
        solver.bodies[0]
    }

    #[test]
    fn test_axis_limits_violation() {
        let lim = AxisLimits::range(DVec3::splat(1.0), DVec3::splat(-1.0));
        assert_eq!(lim.min, DVec3::splat(-1.0));
        let v = lim.violation(DVec3::new(2.0, 0.0, -3.0));
        assert_eq!(v, DVec3::new(1.0, 0.0, -2.0));
        assert_eq!(AxisLimits::FREE.violation(DVec3::splat(9.0)), DVec3::ZERO);
    }

    #[test]
    fn test_ball_joint_pendulum_keeps_length() {
        let start = DVec3::new(1.0, 0.0, 0.0);
        let joint = Joint::ball((handle(0), Pose::new(start, DQuat::IDENTITY)), None, DVec3::ZERO).unwrap();
        let body = run(&joint, dynamic_at(start), 30);
        let anchor = body.frame().transform_point(joint.local_anchor_a);
        assert!(anchor.length() < 1e-3, "anchor drifted to {anchor:?}");
        assert!(body.x.y < -0.3, "pendulum should swing down");
    }

    #[test]
    fn test_fixed_joint_to_world_holds() {
        let start = DVec3::new(0.0, 2.0, 0.0);
        let joint = Joint::fixed((handle(0), Pose::new(start, DQuat::IDENTITY)), None);
        let body = run(&joint, dynamic_at(start), 60);
        assert!((body.x - start).length() < 1e-3);
        assert!(rotation_vector(body.q).length() < 1e-3);
    }

    #[test]
    fn test_generic_locked_matches_fixed() {
        let start = DVec3::new(0.5, 2.0, 0.0);
        let joint = Joint::generic(
            (handle(0), Pose::new(start, DQuat::IDENTITY)),
            None,
            AxisLimits::LOCKED,
            AxisLimits::LOCKED,
            0.0,
        );
        let body = run(&joint, dynamic_at(start), 60);
        // Soft only through compliance, which is zero here
        assert!((body.x - start).length() < 1e-3);
    }

    #[test]
    fn test_generic_free_axis_falls() {
        let start = DVec3::new(0.0, 2.0, 0.0);
        let mut translation = AxisLimits::range(DVec3::splat(-0.1), DVec3::splat(0.1));
        translation.min.y = -10.0;
        let joint = Joint::generic(
            (handle(0), Pose::new(start, DQuat::IDENTITY)),
            None,
            translation,
            AxisLimits::FREE,
            0.0,
        );
        let body = run(&joint, dynamic_at(start), 30);
        assert!(body.x.y < 1.0);
        assert_relative_eq!(body.x.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_hinge_keeps_anchor_and_axis() {
        let start = DVec3::new(1.0, 0.0, 0.0);
        let joint = Joint::hinge(
            (handle(0), Pose::new(start, DQuat::IDENTITY)),
            None,
            DVec3::ZERO,
            DVec3::Z,
        )
        .unwrap();
        let body = run(&joint, dynamic_at(start), 60);
        let anchor = body.frame().transform_point(joint.local_anchor_a);
        assert!(anchor.length() < 1e-3);
        let JointKind::Hinge { local_axis_a, .. } = joint.kind else {
            unreachable!()
        };
        let axis = body.q * local_axis_a;
        assert_relative_eq!(axis.z, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_hinge_rejects_zero_axis() {
        let end = (handle(0), Pose::IDENTITY);
        assert!(matches!(
            Joint::hinge(end, None, DVec3::ZERO, DVec3::ZERO),
            Err(PhysicsError::ZeroLengthVector { .. })
        ));
    }
}
