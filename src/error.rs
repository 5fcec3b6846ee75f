//! Physics Error Types
//!
//! Unified error type for the engine. Fallible operations (environment
//! creation, physicalization, handle lookup, constraint creation) return
//! `Result<T, PhysicsError>`. The C surface converts failures into null
//! handles and forwards the message to the host's error reporter.

use thiserror::Error;

/// Unified error type for physics operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PhysicsError {
    /// Invalid configuration parameter.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the invalid configuration
        reason: &'static str,
    },
    /// Shape geometry could not be built (coplanar hull, bad indices, NaN).
    #[error("degenerate shape: {reason}")]
    DegenerateShape {
        /// What was wrong with the input geometry
        reason: &'static str,
    },
    /// Physicalize was asked for a body with no geometry at all.
    #[error("body has no collision geometry")]
    EmptyShape,
    /// `use_exists_surface` named a surface that is not cached.
    #[error("surface not found: {name}")]
    SurfaceNotFound {
        /// Requested surface name
        name: String,
    },
    /// A handle was stale or belonged to a destroyed object.
    #[error("invalid {kind} handle")]
    InvalidHandle {
        /// Object kind ("body", "constraint", ...)
        kind: &'static str,
    },
    /// A zero-length direction was provided where a unit vector is required.
    #[error("zero-length vector in {context}")]
    ZeroLengthVector {
        /// Context describing where the zero-length vector was encountered
        context: &'static str,
    },
    /// A constraint references an invalid body combination.
    #[error("invalid constraint: {reason}")]
    InvalidConstraint {
        /// Human-readable description of the problem
        reason: &'static str,
    },
}

impl PhysicsError {
    /// Numeric code passed to C error reporters
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidConfiguration { .. } => 1,
            Self::DegenerateShape { .. } => 2,
            Self::EmptyShape => 3,
            Self::SurfaceNotFound { .. } => 4,
            Self::InvalidHandle { .. } => 5,
            Self::ZeroLengthVector { .. } => 6,
            Self::InvalidConstraint { .. } => 7,
        }
    }
}

/// Result alias used throughout the crate
pub type PhysicsResult<T> = Result<T, PhysicsError>;

/// Receives errors raised inside an environment.
///
/// The environment calls this for construction errors (configuration,
/// shapes, constraints) before returning them.
pub trait ErrorReporter: Send {
    /// Report one error
    fn report(&mut self, error: &PhysicsError);
}

impl<F> ErrorReporter for F
where
    F: FnMut(&PhysicsError) + Send,
{
    fn report(&mut self, error: &PhysicsError) {
        self(error)
    }
}
