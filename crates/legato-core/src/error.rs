use crate::{axes::AxisId, profile::ErrorState, solver::SolverStatus};
use thiserror::Error;

/// Which side of a soft limit (or safe zone) was crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitBound {
    Low,
    High,
}

impl std::fmt::Display for LimitBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitBound::Low => f.write_str("lower"),
            LimitBound::High => f.write_str("higher"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("can't move {axis} to {value}, {bound} than soft limit {limit}")]
    SoftLimitViolation {
        axis: AxisId,
        value: f64,
        limit: f64,
        bound: LimitBound,
    },
    #[error("infeasible waypoint sequence: {0}")]
    InfeasibleWaypointSequence(String),
    #[error("motion profile of axis {axis} violates constraint: {state}")]
    ProfileConstraintViolation { axis: AxisId, state: ErrorState },
    #[error("solver did not converge ({status:?}), remaining error {error}")]
    SolverNonConvergence { status: SolverStatus, error: f64 },
    #[error("motion did not complete within {waited:.3}s")]
    CompletionTimeout { waited: f64 },
    #[error("axis {0} is missing from the location")]
    MissingAxis(AxisId),
    #[error("axis {0} is not configured")]
    UnknownAxis(AxisId),
    #[error("driver {driver} failed: {source}")]
    Driver {
        driver: String,
        #[source]
        source: DriverError,
    },
}

/// Failure reported by a driver implementation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver is disabled")]
    Disabled,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("timed out waiting for the controller")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
