//! Motion Controllers
//!
//! PD target trackers attached to a single body. Each step the controller
//! produces a force and a torque pulling the body toward its target pose:
//!
//! ```text
//! force  = force_factor  * (target_pos - pos) - damp_factor * v
//! torque = torque_factor * rot_error(q, target_q) - angular_damp_factor * w
//! ```
//!
//! Both outputs are clamped per component: the force by the
//! `max_translation_force` vector, the torque by the scalar `max_torque`.

use crate::body::BodyHandle;
use crate::math::{clamp_abs, is_finite, rotation_error, DQuat, DVec3};

/// PD gains of a motion controller
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionGains {
    /// Proportional gain on position error
    pub force_factor: f64,
    /// Damping on linear velocity
    pub damp_factor: f64,
    /// Proportional gain on orientation error
    pub torque_factor: f64,
    /// Damping on angular velocity
    pub angular_damp_factor: f64,
}

impl Default for MotionGains {
    fn default() -> Self {
        Self {
            force_factor: 1.0,
            damp_factor: 0.0,
            torque_factor: 1.0,
            angular_damp_factor: 0.0,
        }
    }
}

/// Drives one body toward a target pose
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionController {
    /// Controlled body
    pub body: BodyHandle,
    /// Target position (world)
    pub target_position: DVec3,
    /// Target orientation
    pub target_rotation: DQuat,
    /// Per-component force cap
    pub max_translation_force: DVec3,
    /// Per-component torque cap
    pub max_torque: f64,
    /// Gains
    pub gains: MotionGains,
}

impl MotionController {
    /// Create a controller holding `target_rotation` and tracking `target_position`
    pub fn new(
        body: BodyHandle,
        target_position: DVec3,
        target_rotation: DQuat,
        max_translation_force: DVec3,
        max_torque: f64,
        gains: MotionGains,
    ) -> Self {
        Self {
            body,
            target_position,
            target_rotation,
            max_translation_force: max_translation_force.abs(),
            max_torque: max_torque.abs(),
            gains,
        }
    }

    /// Retarget the position
    pub fn set_target_position(&mut self, target: DVec3) {
        if is_finite(target) {
            self.target_position = target;
        }
    }

    /// Retarget the orientation
    pub fn set_target_rotation(&mut self, target: DQuat) {
        if target.is_finite() && target.length_squared() > 0.0 {
            self.target_rotation = target.normalize();
        }
    }

    /// Replace the force cap
    pub fn set_max_translation_force(&mut self, max: DVec3) {
        self.max_translation_force = max.abs();
    }

    /// Replace the torque cap
    pub fn set_max_torque(&mut self, max: f64) {
        self.max_torque = max.abs();
    }

    /// Replace the proportional position gain
    pub fn set_force_factor(&mut self, factor: f64) {
        self.gains.force_factor = factor;
    }

    /// Replace the linear damping gain
    pub fn set_damp_factor(&mut self, factor: f64) {
        self.gains.damp_factor = factor;
    }

    /// Replace the angular damping gain
    pub fn set_angular_damp_factor(&mut self, factor: f64) {
        self.gains.angular_damp_factor = factor;
    }

    /// Replace the proportional orientation gain
    pub fn set_torque_factor(&mut self, factor: f64) {
        self.gains.torque_factor = factor;
    }

    /// Control output `(force, torque)` in world space
    pub fn compute(&self, position: DVec3, rotation: DQuat, velocity: DVec3, angular_velocity: DVec3) -> (DVec3, DVec3) {
        let g = &self.gains;
        let force = (self.target_position - position) * g.force_factor - velocity * g.damp_factor;
        let torque =
            rotation_error(rotation, self.target_rotation) * g.torque_factor - angular_velocity * g.angular_damp_factor;

        let force = clamp_abs(force, self.max_translation_force);
        let torque = clamp_abs(torque, DVec3::splat(self.max_torque));
        if !is_finite(force) || !is_finite(torque) {
            log::warn!("motion controller output is not finite; skipped");
            return (DVec3::ZERO, DVec3::ZERO);
        }
        (force, torque)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller(max_force: DVec3, max_torque: f64) -> MotionController {
        MotionController::new(
            BodyHandle::from_bits(1),
            DVec3::new(10.0, 0.0, 0.0),
            DQuat::IDENTITY,
            max_force,
            max_torque,
            MotionGains {
                force_factor: 2.0,
                damp_factor: 1.0,
                torque_factor: 3.0,
                angular_damp_factor: 0.5,
            },
        )
    }

    #[test]
    fn test_proportional_force() {
        let c = controller(DVec3::splat(1000.0), 1000.0);
        let (force, torque) = c.compute(DVec3::ZERO, DQuat::IDENTITY, DVec3::ZERO, DVec3::ZERO);
        assert_relative_eq!(force.x, 20.0, epsilon = 1e-12);
        assert_eq!(torque, DVec3::ZERO);
    }

    #[test]
    fn test_damping_opposes_velocity() {
        let c = controller(DVec3::splat(1000.0), 1000.0);
        let (force, _) = c.compute(DVec3::new(10.0, 0.0, 0.0), DQuat::IDENTITY, DVec3::new(0.0, 4.0, 0.0), DVec3::ZERO);
        assert_relative_eq!(force.y, -4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_outputs_respect_caps() {
        let c = controller(DVec3::new(1.0, 2.0, 3.0), 0.25);
        let rotated = DQuat::from_rotation_y(1.0);
        let (force, torque) = c.compute(
            DVec3::new(-100.0, 50.0, -80.0),
            rotated,
            DVec3::splat(30.0),
            DVec3::splat(-7.0),
        );
        assert!(force.x.abs() <= 1.0 && force.y.abs() <= 2.0 && force.z.abs() <= 3.0);
        assert!(torque.abs().max_element() <= 0.25);
    }

    #[test]
    fn test_torque_turns_toward_target() {
        let c = controller(DVec3::splat(1000.0), 1000.0);
        let (_, torque) = c.compute(DVec3::X * 10.0, DQuat::from_rotation_z(0.5), DVec3::ZERO, DVec3::ZERO);
        assert_relative_eq!(torque.z, -1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_setters_retarget() {
        let mut c = controller(DVec3::splat(1000.0), 1000.0);
        c.set_target_position(DVec3::ZERO);
        c.set_force_factor(1.0);
        c.set_max_translation_force(DVec3::splat(-5.0));
        assert_eq!(c.max_translation_force, DVec3::splat(5.0));
        let (force, _) = c.compute(DVec3::new(2.0, 0.0, 0.0), DQuat::IDENTITY, DVec3::ZERO, DVec3::ZERO);
        assert_relative_eq!(force.x, -2.0, epsilon = 1e-12);
        c.set_target_position(DVec3::splat(f64::NAN));
        assert_eq!(c.target_position, DVec3::ZERO);
    }
}
