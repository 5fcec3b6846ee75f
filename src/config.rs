//! Environment Configuration
//!
//! Configuration is plain data with `Default` and builder methods; every
//! environment validates its config once at creation.

use crate::error::PhysicsError;
use crate::filter::MAX_LAYERS;
use crate::math::DVec3;

/// Default internal step frequency (Hz)
pub const DEFAULT_SIMULATION_RATE: f64 = 66.0;

/// Slack when comparing accumulated simulated time with a target time
pub const TIME_EPSILON: f64 = 1.0e-9;

// ============================================================================
// Solver
// ============================================================================

/// XPBD solver configuration
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverConfig {
    /// Substeps per step (collision detection runs once per step)
    pub substeps: usize,
    /// Position-solve iterations per substep
    pub iterations: usize,
    /// Optional cap on the fixed steps one `simulate_until` call may take.
    /// `None` always catches up to the requested time.
    pub max_internal_steps: Option<usize>,
    /// Contact compliance (inverse stiffness, 0 = rigid)
    pub contact_compliance: f64,
    /// Joint compliance for ball / hinge / fixed constraints
    pub joint_compliance: f64,
    /// Compliance scale for generic constraints (`force_factor` divides it)
    pub generic_compliance: f64,
    /// Contact points kept per body pair
    pub max_contacts_per_pair: usize,
    /// Extra broad-phase margin (meters) so resting contacts stay in the pair set
    pub contact_margin: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            substeps: 4,
            iterations: 2,
            max_internal_steps: None,
            contact_compliance: 0.0,
            joint_compliance: 0.0,
            generic_compliance: 1.0e-4,
            max_contacts_per_pair: 4,
            contact_margin: 0.01,
        }
    }
}

// ============================================================================
// Sleeping
// ============================================================================

/// Automatic freezing of resting bodies
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SleepConfig {
    /// Master switch
    pub enabled: bool,
    /// Kinetic energy per unit mass below which a body counts as resting
    pub energy_threshold: f64,
    /// Seconds a body must rest before it is frozen
    pub time_to_sleep: f64,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: 0.005,
            time_to_sleep: 1.0,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Everything needed to create an [`Environment`](crate::environment::Environment)
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvironmentConfig {
    /// Gravity acceleration (m/s^2)
    pub gravity: DVec3,
    /// Fixed internal step frequency (Hz)
    pub simulation_rate: f64,
    /// `layer_masks[layer]` = bitmask of layers `layer` may collide with.
    /// Layers past the end of the table collide with every layer.
    pub layer_masks: Vec<u32>,
    /// Solver parameters
    pub solver: SolverConfig,
    /// Sleeping parameters
    pub sleep: SleepConfig,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            gravity: DVec3::new(0.0, -9.81, 0.0),
            simulation_rate: DEFAULT_SIMULATION_RATE,
            layer_masks: Vec::new(),
            solver: SolverConfig::default(),
            sleep: SleepConfig::default(),
        }
    }
}

impl EnvironmentConfig {
    /// Builder: gravity
    #[must_use]
    pub fn with_gravity(mut self, gravity: DVec3) -> Self {
        self.gravity = gravity;
        self
    }

    /// Builder: simulation rate (Hz)
    #[must_use]
    pub fn with_simulation_rate(mut self, rate: f64) -> Self {
        self.simulation_rate = rate;
        self
    }

    /// Builder: layer -> mask table
    #[must_use]
    pub fn with_layer_masks(mut self, masks: impl Into<Vec<u32>>) -> Self {
        self.layer_masks = masks.into();
        self
    }

    /// Builder: solver parameters
    #[must_use]
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Builder: sleeping parameters
    #[must_use]
    pub fn with_sleep(mut self, sleep: SleepConfig) -> Self {
        self.sleep = sleep;
        self
    }

    /// Internal fixed step size (seconds)
    #[inline]
    pub fn step_size(&self) -> f64 {
        1.0 / self.simulation_rate
    }

    /// Reject configurations the engine cannot simulate
    pub fn validate(&self) -> Result<(), PhysicsError> {
        if !crate::math::is_finite(self.gravity) {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "gravity must be finite",
            });
        }
        if !self.simulation_rate.is_finite() || self.simulation_rate <= 0.0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "simulation rate must be positive and finite",
            });
        }
        if self.layer_masks.len() > MAX_LAYERS {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "layer mask table longer than 32 entries",
            });
        }
        if self.solver.substeps == 0 || self.solver.iterations == 0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "substeps and iterations must be at least 1",
            });
        }
        if self.solver.max_internal_steps == Some(0) {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "max_internal_steps must be at least 1",
            });
        }
        if self.solver.max_contacts_per_pair == 0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "max_contacts_per_pair must be at least 1",
            });
        }
        if !(self.solver.contact_compliance >= 0.0
            && self.solver.joint_compliance >= 0.0
            && self.solver.generic_compliance >= 0.0
            && self.solver.contact_margin >= 0.0)
        {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "compliance and margin must be non-negative",
            });
        }
        if !(self.sleep.energy_threshold >= 0.0 && self.sleep.time_to_sleep >= 0.0) {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "sleep thresholds must be non-negative",
            });
        }
        Ok(())
    }
}
