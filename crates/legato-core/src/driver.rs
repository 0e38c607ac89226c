//! Seam to the controllers that physically execute the plan.

use crate::{
    axes::AxisId,
    error::DriverError,
    location::AxesLocation,
    motion::Motion,
    planner::CompletionType,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// A controller driving a subset of the axes.
///
/// Calls are expected to be idempotent and to fail loudly on hardware errors.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn axes(&self) -> &[AxisId];

    fn home(&self, location: &AxesLocation) -> Result<(), DriverError>;

    /// Re-base the controller coordinates of the given axes without moving.
    fn set_global_offsets(&self, location: &AxesLocation) -> Result<(), DriverError>;

    /// Queue a committed motion. `motion.planned_time1()` is set.
    fn move_to(&self, motion: &Motion) -> Result<(), DriverError>;

    fn wait_for_completion(&self, completion: CompletionType) -> Result<(), DriverError>;

    fn set_enabled(&self, enabled: bool) -> Result<(), DriverError>;

    /// Last location reported by the controller.
    fn reported_location(&self) -> AxesLocation;

    fn drives(&self, axis: &AxisId) -> bool {
        self.axes().contains(axis)
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    enabled: bool,
    location: AxesLocation,
    motions: Vec<Arc<Motion>>,
    homed: usize,
    offsets: Vec<AxesLocation>,
}

/// Driver that completes every motion instantly and records what it was
/// asked to do.
#[derive(Debug)]
pub struct SimulatedDriver {
    name: String,
    axes: Vec<AxisId>,
    state: Mutex<SimulatedState>,
}

impl SimulatedDriver {
    pub fn new(name: &str, axes: impl IntoIterator<Item = AxisId>) -> Self {
        Self {
            name: name.to_string(),
            axes: axes.into_iter().collect(),
            state: Mutex::new(SimulatedState {
                enabled: true,
                ..Default::default()
            }),
        }
    }

    /// Motions received so far.
    pub fn motions(&self) -> Vec<Arc<Motion>> {
        self.state.lock().motions.clone()
    }

    pub fn homed(&self) -> usize {
        self.state.lock().homed
    }

    pub fn offsets(&self) -> Vec<AxesLocation> {
        self.state.lock().offsets.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    fn check_enabled(state: &SimulatedState) -> Result<(), DriverError> {
        if state.enabled {
            Ok(())
        } else {
            Err(DriverError::Disabled)
        }
    }
}

impl Driver for SimulatedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn axes(&self) -> &[AxisId] {
        &self.axes
    }

    fn home(&self, location: &AxesLocation) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        Self::check_enabled(&state)?;
        state.location = state.location.put(&location.driven_by(&self.axes));
        state.homed += 1;
        Ok(())
    }

    fn set_global_offsets(&self, location: &AxesLocation) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        Self::check_enabled(&state)?;
        let location = location.driven_by(&self.axes);
        state.location = state.location.put(&location);
        state.offsets.push(location);
        Ok(())
    }

    fn move_to(&self, motion: &Motion) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        Self::check_enabled(&state)?;
        state.location = state.location.put(&motion.driven_target(&self.axes));
        state.motions.push(Arc::new(motion.clone()));
        Ok(())
    }

    fn wait_for_completion(&self, _completion: CompletionType) -> Result<(), DriverError> {
        Self::check_enabled(&self.state.lock())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), DriverError> {
        self.state.lock().enabled = enabled;
        Ok(())
    }

    fn reported_location(&self) -> AxesLocation {
        self.state.lock().location.clone()
    }
}
