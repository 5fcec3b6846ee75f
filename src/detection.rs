//! Detection Helpers
//!
//! Small per-body state machines driven once per step by simulated time.
//!
//! - [`CollDetection`]: speed-windowed impact trigger with a cooldown that
//!   starts once the body slows below a threshold
//! - [`ContractDetection`]: debounced "touching a body of class `col_id`"
//!   state with independent start and end delays
//!
//! ```text
//! ContractDetection:
//!   Idle --touch--> PendingStart --delay_start--> Active
//!   Active --release--> PendingEnd --delay_end--> Idle
//! ```

use crate::body::BodyHandle;
use crate::config::TIME_EPSILON;

// ============================================================================
// Collision detection
// ============================================================================

/// Phase of a [`CollDetection`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CollPhase {
    /// Waiting for an impact
    Ready,
    /// Fired; waiting for the body to slow below the threshold
    Triggered,
    /// Silent for the remaining seconds
    Cooldown(f64),
}

/// Speed-windowed impact trigger
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollDetection {
    /// Watching body
    pub body: BodyHandle,
    /// Classification of the bodies that count as impacts
    pub col_id: i32,
    /// Lower bound of the speed window
    pub min_speed: f64,
    /// Upper bound of the speed window
    pub max_speed: f64,
    /// Silence after the body slowed down (s)
    pub sleep_afterwards: f64,
    /// Body speed below which the silence starts
    pub speed_threshold: f64,
    /// Current phase
    pub phase: CollPhase,
}

impl CollDetection {
    /// Create a ready trigger
    pub fn new(
        body: BodyHandle,
        col_id: i32,
        min_speed: f64,
        max_speed: f64,
        sleep_afterwards: f64,
        speed_threshold: f64,
    ) -> Self {
        Self {
            body,
            col_id,
            min_speed: min_speed.min(max_speed),
            max_speed: min_speed.max(max_speed),
            sleep_afterwards: sleep_afterwards.max(0.0),
            speed_threshold: speed_threshold.max(0.0),
            phase: CollPhase::Ready,
        }
    }

    /// Position of `speed` inside the window, clamped to `[0, 1]`
    pub fn speed_percent(&self, speed: f64) -> f64 {
        let span = self.max_speed - self.min_speed;
        if span <= 0.0 {
            return 1.0;
        }
        ((speed - self.min_speed) / span).clamp(0.0, 1.0)
    }

    /// Advance by `dt`; `impact_speed` is the strongest matching impact of
    /// this step. Returns the speed percent when the trigger fires.
    pub fn update(&mut self, impact_speed: Option<f64>, body_speed: f64, dt: f64) -> Option<f64> {
        match self.phase {
            CollPhase::Ready => {}
            CollPhase::Triggered => {
                if body_speed < self.speed_threshold {
                    self.phase = if self.sleep_afterwards > 0.0 {
                        CollPhase::Cooldown(self.sleep_afterwards)
                    } else {
                        CollPhase::Ready
                    };
                }
                return None;
            }
            CollPhase::Cooldown(remaining) => {
                let remaining = remaining - dt;
                if remaining > TIME_EPSILON {
                    self.phase = CollPhase::Cooldown(remaining);
                    return None;
                }
                self.phase = CollPhase::Ready;
            }
        }

        let speed = impact_speed?;
        if speed < self.min_speed || speed > self.max_speed {
            return None;
        }
        self.phase = CollPhase::Triggered;
        Some(self.speed_percent(speed))
    }
}

// ============================================================================
// Contact ("contract") detection
// ============================================================================

/// Phase of a [`ContractDetection`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContractPhase {
    /// Not touching
    Idle,
    /// Touching for the given seconds, not yet reported
    PendingStart(f64),
    /// Reported as touching
    Active,
    /// Released for the given seconds, not yet reported
    PendingEnd(f64),
}

/// Debounced touching state
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContractDetection {
    /// Watching body
    pub body: BodyHandle,
    /// Classification of the bodies that count as contacts
    pub col_id: i32,
    /// Time the contact must persist before it is reported (s)
    pub delay_start: f64,
    /// Time the release must persist before it is reported (s)
    pub delay_end: f64,
    /// Current phase
    pub phase: ContractPhase,
}

impl ContractDetection {
    /// Create an idle detector
    pub fn new(body: BodyHandle, col_id: i32, delay_start: f64, delay_end: f64) -> Self {
        Self {
            body,
            col_id,
            delay_start,
            delay_end,
            phase: ContractPhase::Idle,
        }
    }

    /// Reported state
    #[inline]
    pub fn is_on(&self) -> bool {
        matches!(self.phase, ContractPhase::Active | ContractPhase::PendingEnd(_))
    }

    /// Advance by `dt` with the raw touching state; returns the new reported
    /// state on a transition
    pub fn update(&mut self, touching: bool, dt: f64) -> Option<bool> {
        let (phase, report) = match (self.phase, touching) {
            (ContractPhase::Idle, false) => (ContractPhase::Idle, None),
            (ContractPhase::Idle, true) => {
                if self.delay_start <= 0.0 {
                    (ContractPhase::Active, Some(true))
                } else {
                    (ContractPhase::PendingStart(0.0), None)
                }
            }
            (ContractPhase::PendingStart(_), false) => (ContractPhase::Idle, None),
            (ContractPhase::PendingStart(t), true) => {
                let t = t + dt;
                if t + TIME_EPSILON >= self.delay_start {
                    (ContractPhase::Active, Some(true))
                } else {
                    (ContractPhase::PendingStart(t), None)
                }
            }
            (ContractPhase::Active, true) => (ContractPhase::Active, None),
            (ContractPhase::Active, false) => {
                if self.delay_end <= 0.0 {
                    (ContractPhase::Idle, Some(false))
                } else {
                    (ContractPhase::PendingEnd(0.0), None)
                }
            }
            (ContractPhase::PendingEnd(_), true) => (ContractPhase::Active, None),
            (ContractPhase::PendingEnd(t), false) => {
                let t = t + dt;
                if t + TIME_EPSILON >= self.delay_end {
                    (ContractPhase::Idle, Some(false))
                } else {
                    (ContractPhase::PendingEnd(t), None)
                }
            }
        };
        self.phase = phase;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn handle() -> BodyHandle {
        BodyHandle::from_bits(3)
    }

    #[test]
    fn test_coll_detection_window_and_cooldown() {
        let dt = 0.1;
        let mut det = CollDetection::new(handle(), 4, 2.0, 10.0, 1.0, 0.5);

        let fired = det.update(Some(5.0), 5.0, dt);
        assert_relative_eq!(fired.unwrap(), 3.0 / 8.0, epsilon = 1e-12);

        // Still fast: stays triggered
        assert_eq!(det.update(Some(5.0), 4.0, dt), None);
        // Slows down: cooldown begins
        assert_eq!(det.update(None, 0.1, dt), None);

        // 0.9 s of further silence
        for _ in 0..9 {
            assert_eq!(det.update(Some(5.0), 0.1, dt), None);
        }
        // 1.0 s elapsed
        assert!(det.update(Some(5.0), 0.1, dt).is_some());
    }

    #[test]
    fn test_contract_delay_survives_rounding() {
        // Ten steps of 0.1 sum to 0.9999999999999999
        let mut det = ContractDetection::new(handle(), 1, 1.0, 0.0);
        for _ in 0..10 {
            assert_eq!(det.update(true, 0.1), None);
        }
        assert_eq!(det.update(true, 0.1), Some(true));
    }

    #[test]
    fn test_coll_detection_outside_window() {
        let mut det = CollDetection::new(handle(), 4, 2.0, 10.0, 1.0, 0.5);
        assert_eq!(det.update(Some(1.0), 1.0, 0.1), None);
        assert_eq!(det.update(Some(11.0), 11.0, 0.1), None);
        assert_eq!(det.phase, CollPhase::Ready);
        assert_relative_eq!(det.update(Some(10.0), 10.0, 0.1).unwrap(), 1.0);
    }

    #[test]
    fn test_coll_detection_no_sleep() {
        let mut det = CollDetection::new(handle(), 4, 0.0, 10.0, 0.0, 1.0);
        assert!(det.update(Some(3.0), 3.0, 0.1).is_some());
        assert_eq!(det.update(None, 0.5, 0.1), None);
        assert_eq!(det.phase, CollPhase::Ready);
        assert!(det.update(Some(3.0), 3.0, 0.1).is_some());
    }

    #[test]
    fn test_contract_debounce_start() {
        let mut det = ContractDetection::new(handle(), 1, 0.25, 0.0);
        assert_eq!(det.update(true, 0.1), None);
        assert_eq!(det.update(true, 0.1), None);
        // A flicker resets the start delay
        assert_eq!(det.update(false, 0.1), None);
        assert_eq!(det.update(true, 0.1), None);
        assert_eq!(det.update(true, 0.1), None);
        assert_eq!(det.update(true, 0.1), None);
        assert_eq!(det.update(true, 0.1), Some(true));
        assert!(det.is_on());
        assert_eq!(det.update(false, 0.1), Some(false));
    }

    #[test]
    fn test_contract_debounce_end() {
        let mut det = ContractDetection::new(handle(), 1, 0.0, 0.2);
        assert_eq!(det.update(true, 0.1), Some(true));
        assert_eq!(det.update(false, 0.1), None);
        // Bounce back before the end delay: no report
        assert_eq!(det.update(true, 0.1), None);
        assert_eq!(det.update(false, 0.1), None);
        assert_eq!(det.update(false, 0.1), None);
        assert_eq!(det.update(false, 0.1), Some(false));
        assert!(!det.is_on());
    }

    #[test]
    fn test_contract_zero_elapsed_update() {
        let mut det = ContractDetection::new(handle(), 1, 0.0, 0.0);
        assert_eq!(det.update(true, 0.0), Some(true));
        assert_eq!(det.update(true, 0.0), None);
    }
}
