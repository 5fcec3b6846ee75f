//! Persistent Forces and Springs
//!
//! Directed interactions between two bodies at object-space attachment
//! points, evaluated once per step before integration.
//!
//! # Interactions
//!
//! - [`PointForce`]: constant magnitude along the attachment line
//! - [`Spring`]: Hooke spring with axial and global damping, an implicit
//!   "stiff" mode and an optional stretch-only switch
//!
//! Both produce the world-space force acting on body A at its attachment
//! point. Body B receives the opposite force unless the interaction says
//! otherwise.

use crate::body::{BodyHandle, RigidBody};
use crate::math::{is_finite, DVec3, EPSILON};

/// Attachment of an interaction to a body
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attachment {
    /// Attached body
    pub body: BodyHandle,
    /// Attachment point (object space)
    pub local_point: DVec3,
}

impl Attachment {
    /// Attach at `local_point` on `body`
    pub fn new(body: BodyHandle, local_point: DVec3) -> Self {
        Self { body, local_point }
    }

    /// Sample the attachment point on `body`
    pub fn sample(&self, body: &RigidBody) -> PointState {
        let position = body.pose.transform_point(self.local_point);
        PointState {
            position,
            velocity: body.point_velocity(position),
            inv_mass: body.inv_mass(),
        }
    }
}

/// World-space state of an attachment point for one evaluation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointState {
    /// Position (world)
    pub position: DVec3,
    /// Velocity (world)
    pub velocity: DVec3,
    /// Inverse mass of the owning body
    pub inv_mass: f64,
}

impl PointState {
    /// Point at rest with the given inverse mass
    pub fn at_rest(position: DVec3, inv_mass: f64) -> Self {
        Self {
            position,
            velocity: DVec3::ZERO,
            inv_mass,
        }
    }
}

/// Forces produced by one interaction
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ForcePair {
    /// Force on A (world), applied at A's attachment point
    pub on_a: DVec3,
    /// Force on B (world), applied at B's attachment point
    pub on_b: DVec3,
}

impl ForcePair {
    /// No force
    pub const ZERO: Self = Self {
        on_a: DVec3::ZERO,
        on_b: DVec3::ZERO,
    };
}

/// Reduced mass of two bodies; `None` if neither can move
#[inline]
fn reduced_mass(a: &PointState, b: &PointState) -> Option<f64> {
    let w = a.inv_mass + b.inv_mass;
    (w > EPSILON).then(|| 1.0 / w)
}

// ============================================================================
// Constant force
// ============================================================================

/// Constant-magnitude pull of A toward B
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointForce {
    /// Pulled body
    pub a: Attachment,
    /// Reference body
    pub b: Attachment,
    /// Force magnitude (negative pushes A away)
    pub value: f64,
    /// Apply the reaction to B
    pub push_other: bool,
}

impl PointForce {
    /// Create a force of `value` between two attachments
    pub fn new(a: Attachment, b: Attachment, value: f64, push_other: bool) -> Self {
        Self {
            a,
            b,
            value,
            push_other,
        }
    }

    /// Evaluate for the current attachment states
    pub fn evaluate(&self, a: &PointState, b: &PointState) -> ForcePair {
        let Some(dir) = (b.position - a.position).try_normalize() else {
            return ForcePair::ZERO;
        };
        let on_a = dir * self.value;
        if !is_finite(on_a) {
            log::warn!("point force produced a non-finite value; skipped");
            return ForcePair::ZERO;
        }
        ForcePair {
            on_a,
            on_b: if self.push_other { -on_a } else { DVec3::ZERO },
        }
    }
}

// ============================================================================
// Spring
// ============================================================================

/// Damped spring between two attachments
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spring {
    /// First end
    pub a: Attachment,
    /// Second end
    pub b: Attachment,
    /// Rest length (m)
    pub rest_length: f64,
    /// Stiffness (N/m, or 1/s² when relative)
    pub constant: f64,
    /// Damping of the relative velocity along the spring axis
    pub spring_damping: f64,
    /// Damping of the full relative velocity
    pub global_damping: f64,
    /// Implicit effective stiffness for large constants
    pub stiff: bool,
    /// Constants are per unit reduced mass
    pub values_are_relative: bool,
    /// No force while compressed
    pub stretch_only: bool,
}

impl Spring {
    /// Plain Hooke spring with no damping
    pub fn new(a: Attachment, b: Attachment, rest_length: f64, constant: f64) -> Self {
        Self {
            a,
            b,
            rest_length: rest_length.max(0.0),
            constant: constant.max(0.0),
            spring_damping: 0.0,
            global_damping: 0.0,
            stiff: false,
            values_are_relative: false,
            stretch_only: false,
        }
    }

    /// Builder: damping terms
    #[must_use]
    pub fn with_damping(mut self, spring_damping: f64, global_damping: f64) -> Self {
        self.spring_damping = spring_damping.max(0.0);
        self.global_damping = global_damping.max(0.0);
        self
    }

    /// Builder: implicit stiff mode
    #[must_use]
    pub fn stiff(mut self, stiff: bool) -> Self {
        self.stiff = stiff;
        self
    }

    /// Builder: constants relative to the reduced mass
    #[must_use]
    pub fn relative(mut self, relative: bool) -> Self {
        self.values_are_relative = relative;
        self
    }

    /// Builder: stretch-only
    #[must_use]
    pub fn stretch_only(mut self, stretch_only: bool) -> Self {
        self.stretch_only = stretch_only;
        self
    }

    /// Stiffness and axial damping after the relative and stiff adjustments
    pub fn effective_constants(&self, a: &PointState, b: &PointState, dt: f64) -> Option<(f64, f64, f64)> {
        let m_r = reduced_mass(a, b)?;
        let scale = if self.values_are_relative { m_r } else { 1.0 };
        let mut k = self.constant * scale;
        let c = self.spring_damping * scale;
        let g = self.global_damping * scale;
        if self.stiff && dt > 0.0 {
            // Backward-Euler effective stiffness
            k /= 1.0 + dt * c / m_r + dt * dt * k / m_r;
        }
        Some((k, c, g))
    }

    /// Evaluate for the current attachment states over a step of `dt`
    pub fn evaluate(&self, a: &PointState, b: &PointState, dt: f64) -> ForcePair {
        let delta = b.position - a.position;
        let length = delta.length();
        if self.stretch_only && length < self.rest_length {
            return ForcePair::ZERO;
        }
        let Some((k, c, g)) = self.effective_constants(a, b, dt) else {
            return ForcePair::ZERO;
        };

        let v_rel = b.velocity - a.velocity;
        let mut on_a = v_rel * g;
        if length > EPSILON {
            let axis = delta / length;
            on_a += axis * (k * (length - self.rest_length) + c * v_rel.dot(axis));
        }
        if !is_finite(on_a) {
            log::warn!("spring produced a non-finite force; skipped");
            return ForcePair::ZERO;
        }
        ForcePair { on_a, on_b: -on_a }
    }

    /// Current length for two sampled ends
    #[inline]
    pub fn length(a: &PointState, b: &PointState) -> f64 {
        (b.position - a.position).length()
    }
}
