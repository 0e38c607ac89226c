//! Jerk-limited motion planning for multi-axis machines.
//!
//! Move requests enter through [`Planner`], which validates them against the
//! axis configuration, solves one [`MotionProfile`] per axis and keeps the
//! committed motions in a time-ordered plan that can be queried for the
//! machine state at any time.
//!
//! This crate has no knowledge of controller protocols; controllers plug in
//! through the [`Driver`] trait.

pub mod axes;
pub mod clock;
pub mod coordinated;
pub mod driver;
pub mod error;
pub mod location;
pub mod motion;
pub mod path;
pub mod plan;
pub mod planner;
pub mod profile;
pub mod solver;

pub use axes::{Axes, AxisConfig, AxisId, AxisKind, BacklashCompensation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{Driver, SimulatedDriver};
pub use error::{DriverError, Error, LimitBound, Result};
pub use location::AxesLocation;
pub use motion::{Derivative, Motion, MotionOptions};
pub use plan::{MotionPlan, PlanEntry};
pub use planner::{
    CompletionType, Planner, PlannerConfig, PlannerState, PlannerStrategy, SolverConfig,
};
pub use profile::{Boundary, ErrorState, MotionProfile, ProfileLimits, ProfileOptions};
pub use solver::SolverStatus;
