//! Motion planner: turns move requests into a timed motion plan and drives
//! its execution.
//!
//! Requests are recorded as commands and re-optimised into motions on every
//! [`Planner::move_to`]. Nothing reaches the plan or the drivers until
//! [`Planner::wait_for_completion`] executes the pending motions, appending
//! them to the plan at the current time or after the last planned motion.
//! Queries such as [`Planner::momentary_location`] only read a snapshot of
//! the plan and never wait for the planner lock.

use crate::{
    axes::{Axes, AxisId, BacklashCompensation, normalize_angle_180},
    clock::Clock,
    coordinated::{coordinate_profiles, synchronize_profiles},
    driver::Driver,
    error::{DriverError, Error, LimitBound, Result},
    location::AxesLocation,
    motion::{Motion, MotionOptions},
    path::{PathSolution, PathSolver},
    plan::{MotionPlan, PlanStore},
    profile::{Boundary, MotionProfile, ProfileLimits},
    solver::{SolverStatus, TruncatedNewton},
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStrategy {
    /// No trajectory planning, the controller plans. Moves take no time.
    Null,
    /// Every move starts and ends in still-stand.
    #[default]
    Simple,
    /// Blend through non-fixed waypoints where it is faster.
    Advanced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannerState {
    Idle,
    Planning,
    Committed,
    Executing,
    Stillstand,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionType {
    /// Execute the pending motions, the motion may stay open for more.
    CommandJog,
    /// Execute the pending motions ending in still-stand, without waiting.
    CommandStillstand,
    /// Execute and wait, bounded by the completion timeout.
    WaitForStillstand,
    WaitForStillstandIndefinitely,
}

impl CompletionType {
    pub fn is_enforcing_stillstand(self) -> bool {
        self.is_waiting_for_drivers() || self == CompletionType::CommandStillstand
    }

    pub fn is_waiting_for_drivers(self) -> bool {
        matches!(
            self,
            CompletionType::WaitForStillstand | CompletionType::WaitForStillstandIndefinitely
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_function_evaluations: usize,
    /// Cost of one second of motion time relative to the squared
    /// continuity error.
    pub time_weight: f64,
    /// Fail the move instead of blending with the best estimate when the
    /// solver does not converge.
    pub reject_non_convergence: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_function_evaluations: 5000,
            time_weight: 1.0,
            reject_non_convergence: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub strategy: PlannerStrategy,
    /// Seconds of executed motion kept for queries.
    pub maximum_plan_history: f64,
    /// Seconds to wait for still-stand with [`CompletionType::WaitForStillstand`].
    pub completion_timeout: f64,
    pub solver: SolverConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: PlannerStrategy::default(),
            maximum_plan_history: 60.0,
            completion_timeout: 30.0,
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
struct MoveCommand {
    from: AxesLocation,
    to: AxesLocation,
    speed: f64,
    options: MotionOptions,
}

#[derive(Debug)]
struct PlannerInner {
    /// Planned coordinates, without backlash offsets.
    location: AxesLocation,
    backlash_offsets: AxesLocation,
    commands: Vec<MoveCommand>,
    pending: Vec<Motion>,
    /// Location and offsets as of the last execution.
    executed: (AxesLocation, AxesLocation),
    last_solver_status: Option<SolverStatus>,
}

pub struct Planner {
    axes: Axes,
    drivers: Vec<Arc<dyn Driver>>,
    clock: Arc<dyn Clock>,
    config: PlannerConfig,
    plan: PlanStore,
    state: RwLock<PlannerState>,
    inner: Mutex<PlannerInner>,
}

impl Planner {
    pub fn new(
        axes: Axes,
        drivers: Vec<Arc<dyn Driver>>,
        clock: Arc<dyn Clock>,
        config: PlannerConfig,
    ) -> Self {
        let location = AxesLocation::from_axes(&axes, |_| 0.0);
        Self {
            axes,
            drivers,
            clock,
            config,
            plan: PlanStore::new(),
            state: RwLock::new(PlannerState::Idle),
            inner: Mutex::new(PlannerInner {
                location: location.clone(),
                backlash_offsets: AxesLocation::new(),
                commands: Vec::new(),
                pending: Vec::new(),
                executed: (location, AxesLocation::new()),
                last_solver_status: None,
            }),
        }
    }

    pub fn axes(&self) -> &Axes {
        &self.axes
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn state(&self) -> PlannerState {
        *self.state.read()
    }

    fn set_state(&self, state: PlannerState) {
        *self.state.write() = state;
    }

    /// Last planned coordinates of all axes.
    pub fn location(&self) -> AxesLocation {
        self.inner.lock().location.clone()
    }

    /// Status of the last path optimisation, if any ran.
    pub fn last_solver_status(&self) -> Option<SolverStatus> {
        self.inner.lock().last_solver_status
    }

    /// Motions planned but not yet executed.
    pub fn pending_motions(&self) -> Vec<Motion> {
        self.inner.lock().pending.clone()
    }

    pub fn plan_snapshot(&self) -> Arc<MotionPlan> {
        self.plan.snapshot()
    }

    /// Request a move of the axes in `target`. Other axes keep their planned
    /// coordinates. The plan is only changed if the move is accepted.
    pub fn move_to(
        &self,
        target: &AxesLocation,
        speed: f64,
        options: MotionOptions,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let limited = self.check_location(&inner.location, target)?;
        let current = inner.location.clone();
        let new_location = current.put(&limited);

        let mut offsets = inner.backlash_offsets.clone();
        let commands =
            self.backlash_commands(&current, &new_location, speed, options, &mut offsets)?;
        let mut tail = inner.commands.clone();
        tail.extend(commands);

        let previous = self.state();
        self.set_state(PlannerState::Planning);
        let mut status = inner.last_solver_status;
        let motions = match self.optimize(&tail, &mut status) {
            Ok(motions) => motions,
            Err(error) => {
                self.set_state(previous);
                return Err(error);
            }
        };
        tracing::debug!(location = %new_location, speed, motions = motions.len(), "move committed");
        inner.commands = tail;
        inner.pending = motions;
        inner.location = new_location;
        inner.backlash_offsets = offsets;
        inner.last_solver_status = status;
        self.set_state(PlannerState::Committed);
        Ok(())
    }

    /// Split a move into the commands needed for backlash compensation.
    fn backlash_commands(
        &self,
        current: &AxesLocation,
        new_location: &AxesLocation,
        speed: f64,
        options: MotionOptions,
        offsets: &mut AxesLocation,
    ) -> Result<Vec<MoveCommand>> {
        let start = current.add(offsets);
        let mut compensated = new_location.clone();
        let mut target = new_location.clone();
        let mut extra_move = false;
        let mut extra_speed = speed;
        if !options.is_speed_over_precision() {
            let segment = current.motion_segment_to(new_location, &self.axes);
            for (axis, _) in current.iter() {
                let config = self.axes.get(axis)?;
                if !segment.contains(axis) {
                    let last = AxesLocation::single(axis.clone(), offsets.coordinate(axis));
                    compensated = compensated.add(&last);
                    target = target.add(&last);
                    continue;
                }
                let offset = config.backlash_offset;
                if offset == 0.0 {
                    continue;
                }
                let same_direction = segment.coordinate(axis).signum() == offset.signum();
                match config.backlash_compensation {
                    BacklashCompensation::OneSidedPositioning => extra_move = true,
                    BacklashCompensation::OneSidedOptimizedPositioning if same_direction => {
                        extra_move = true
                    }
                    BacklashCompensation::DirectionalCompensation => {
                        let effective = if same_direction { offset } else { 0.0 };
                        let shift = AxesLocation::single(axis.clone(), effective);
                        compensated = compensated.add(&shift);
                        target = target.add(&shift);
                        *offsets = offsets.with(axis, effective);
                        continue;
                    }
                    _ => continue,
                }
                compensated = compensated.add(&AxesLocation::single(axis.clone(), offset));
                extra_speed = extra_speed.min(config.backlash_speed_factor);
            }
        }

        let command = |from: &AxesLocation, to: &AxesLocation, speed| MoveCommand {
            from: from.clone(),
            to: to.clone(),
            speed,
            options,
        };
        Ok(if extra_move {
            vec![command(&start, &compensated, speed), command(&compensated, &target, extra_speed)]
        } else {
            vec![command(&start, &target, speed)]
        })
    }

    /// Plan the open tail of commands with the configured strategy.
    fn optimize(
        &self,
        commands: &[MoveCommand],
        status: &mut Option<SolverStatus>,
    ) -> Result<Vec<Motion>> {
        if self.config.strategy == PlannerStrategy::Null {
            return Ok(commands.iter().map(null_motion).collect());
        }
        let baseline = commands
            .iter()
            .zip(self.command_options(commands))
            .map(|(command, options)| self.simple_motion(command, options))
            .collect::<Result<Vec<_>>>()?;
        match self.config.strategy {
            PlannerStrategy::Advanced => self.blend(baseline, status),
            _ => Ok(baseline),
        }
    }

    /// Options each command is planned with. Only the last command may jog.
    /// Blending needs the Advanced strategy and a successor that moves and
    /// ends in a waypoint.
    fn command_options(&self, commands: &[MoveCommand]) -> Vec<MotionOptions> {
        let last = commands.len().saturating_sub(1);
        let blending = self.config.strategy == PlannerStrategy::Advanced;
        commands
            .iter()
            .enumerate()
            .map(|(i, command)| {
                let mut options = command.options;
                if i != last {
                    options = options.without_jog_motion();
                }
                let open_successor = commands.get(i + 1).is_some_and(|next| {
                    self.is_standing(next) || (i + 1 == last && next.options.is_jog_motion())
                });
                if !blending || i == last || open_successor || self.is_standing(command) {
                    options = options.without_blend();
                }
                options
            })
            .collect()
    }

    /// True if the command moves no axis at resolution.
    fn is_standing(&self, command: &MoveCommand) -> bool {
        let segment = command.from.motion_segment_to(&command.to, &self.axes);
        segment.is_empty()
    }

    fn simple_motion(&self, command: &MoveCommand, options: MotionOptions) -> Result<Motion> {
        let (from, to) = (&command.from, &command.to);
        let motion = Motion::new(&self.axes, from, to, command.speed, options)?;
        motion.check_validity()?;
        Ok(motion)
    }

    /// Replace still-stand junctions by blended ones where the path solver
    /// finds a faster valid solution. Every run of moves ending in a fixed
    /// waypoint is blended on its own, moves that stand still or leave their
    /// end open are kept as they are.
    fn blend(
        &self,
        baseline: Vec<Motion>,
        status: &mut Option<SolverStatus>,
    ) -> Result<Vec<Motion>> {
        let mut motions = Vec::with_capacity(baseline.len());
        let mut run = Vec::new();
        for motion in baseline {
            let options = motion.options();
            let standing = motion
                .start_location()
                .motion_segment_to(motion.location(), &self.axes)
                .is_empty();
            if standing || !(options.is_blend() || options.is_fixed_waypoint()) {
                motions.extend(self.blend_run(std::mem::take(&mut run), status)?);
                motions.push(motion);
                continue;
            }
            run.push(motion);
            if options.is_fixed_waypoint() {
                motions.extend(self.blend_run(std::mem::take(&mut run), status)?);
            }
        }
        motions.extend(self.blend_run(run, status)?);
        Ok(motions)
    }

    fn blend_run(
        &self,
        run: Vec<Motion>,
        status: &mut Option<SolverStatus>,
    ) -> Result<Vec<Motion>> {
        let Some(first) = run.first() else {
            return Ok(run);
        };
        if !run.iter().rev().skip(1).any(|m| m.options().is_blend()) {
            return Ok(run);
        }
        let solver = match PathSolver::new(
            &self.axes,
            first.start_location(),
            true,
            &run,
            TruncatedNewton::new(self.config.solver.max_function_evaluations),
            self.config.solver.time_weight,
        ) {
            Ok(solver) => solver,
            Err(Error::InfeasibleWaypointSequence(reason)) => {
                tracing::warn!(%reason, "path cannot be blended, keeping still-stand moves");
                return Ok(run);
            }
            Err(error) => return Err(error),
        };
        let solution = solver.solve();
        *status = Some(solution.status);
        if let Err(error) = solution.check_convergence() {
            if self.config.solver.reject_non_convergence {
                tracing::error!(%error, "path solver did not converge");
                return Err(error);
            }
            tracing::warn!(
                status = ?solution.status,
                error = solution.error,
                "path solver did not converge, using its best estimate"
            );
        }

        let Some(motions) = self.blended_motions(&run, &solution) else {
            return Ok(run);
        };

        let baseline_time: f64 = run.iter().map(Motion::time).sum();
        let blended_time: f64 = motions.iter().map(Motion::time).sum();
        if blended_time > baseline_time {
            tracing::warn!(
                baseline_time,
                blended_time,
                "blending is slower, falling back to still-stand moves"
            );
            return Ok(run);
        }
        tracing::debug!(
            baseline_time,
            blended_time,
            motions = motions.len(),
            "blended motion batch"
        );
        Ok(motions)
    }

    /// Re-solve every motion with the estimated junction velocities. `None`
    /// if any profile turns out invalid.
    fn blended_motions(&self, run: &[Motion], solution: &PathSolution) -> Option<Vec<Motion>> {
        let velocities = straight_junctions(run, &solution.velocities);
        let mut motions = Vec::with_capacity(run.len());
        for (k, motion) in run.iter().enumerate() {
            let mut ids = Vec::new();
            let mut profiles = Vec::new();
            for (axis, profile) in motion.profiles() {
                let entry = Boundary::new(
                    profile.entry().location,
                    velocities[k].coordinate(axis),
                    0.0,
                );
                let exit = Boundary::new(
                    profile.exit().location,
                    velocities[k + 1].coordinate(axis),
                    0.0,
                );
                let limits = ProfileLimits {
                    time_min: 0.0,
                    ..profile.limits()
                };
                ids.push(axis.clone());
                profiles.push(MotionProfile::new(entry, exit, limits, profile.options()));
            }
            if keeps_straight(motion) {
                coordinate_profiles(&mut profiles);
            } else {
                synchronize_profiles(&mut profiles);
            }
            let profiles: BTreeMap<_, _> = ids.into_iter().zip(profiles).collect();
            for (axis, profile) in &profiles {
                if let Some(state) = profile.check_validity() {
                    tracing::warn!(
                        %axis,
                        %state,
                        "blended profile invalid, falling back to still-stand moves"
                    );
                    return None;
                }
            }
            motions.push(Motion::from_profiles(
                motion.start_location().clone(),
                profiles,
                motion.nominal_speed(),
                motion.options(),
            ));
        }
        Some(motions)
    }

    /// Execute pending motions and, depending on `completion`, wait for the
    /// drivers of `axes` (all drivers if `None`) to reach still-stand.
    pub fn wait_for_completion(
        &self,
        axes: Option<&[AxisId]>,
        completion: CompletionType,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        self.complete(&mut inner, axes, completion)
    }

    fn complete(
        &self,
        inner: &mut PlannerInner,
        axes: Option<&[AxisId]>,
        completion: CompletionType,
    ) -> Result<()> {
        self.execute(inner)?;
        if completion.is_waiting_for_drivers() {
            self.wait_for_drivers(axes, completion)?;
            self.wrap_up_coordinates(inner)?;
        }
        if completion.is_enforcing_stillstand() && self.state() != PlannerState::Idle {
            self.set_state(PlannerState::Stillstand);
        }
        self.trim_history(self.clock.now() - self.config.maximum_plan_history);
        Ok(())
    }

    /// Hand the pending motions to the drivers, then append them to the
    /// plan. A failing driver leaves the plan and the pending motions as
    /// they were.
    fn execute(&self, inner: &mut PlannerInner) -> Result<()> {
        if inner.pending.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let moving = inner
            .pending
            .iter()
            .filter(|m| !m.options().is_stillstand());
        let entries = self.plan.snapshot().schedule(now, moving.cloned());
        for entry in &entries {
            let motion = &entry.motion;
            let segment = motion
                .start_location()
                .motion_segment_to(motion.location(), &self.axes);
            for driver in &self.drivers {
                if segment.axes().any(|axis| driver.drives(axis)) {
                    driver
                        .move_to(motion)
                        .map_err(|source| driver_error(driver, source))?;
                }
            }
        }

        let (motions, end) = (entries.len(), entries.last().map_or(now, |e| e.time));
        self.plan.update(|plan| plan.extend(entries));
        inner.pending.clear();
        inner.commands.clear();
        inner.executed = (inner.location.clone(), inner.backlash_offsets.clone());
        self.set_state(PlannerState::Executing);
        tracing::info!(motions, start = now, end, "executing motion plan");
        Ok(())
    }

    fn wait_for_drivers(&self, axes: Option<&[AxisId]>, completion: CompletionType) -> Result<()> {
        let start = self.clock.now();
        let end = self.plan.snapshot().last().map_or(start, |last| last.time);
        if end > start {
            if completion == CompletionType::WaitForStillstand
                && end - start > self.config.completion_timeout
            {
                self.clock.sleep_until(start + self.config.completion_timeout);
                let waited = self.clock.now() - start;
                tracing::warn!(waited, end, "timed out waiting for still-stand");
                return Err(Error::CompletionTimeout { waited });
            }
            self.clock.sleep_until(end);
        }
        for driver in &self.drivers {
            let involved = match axes {
                Some(axes) => driver.axes().iter().any(|axis| axes.contains(axis)),
                None => true,
            };
            if !involved {
                continue;
            }
            driver
                .wait_for_completion(completion)
                .map_err(|source| match source {
                    DriverError::Timeout => Error::CompletionTimeout {
                        waited: self.clock.now() - start,
                    },
                    source => driver_error(driver, source),
                })?;
        }
        Ok(())
    }

    /// Re-base rotation axes that left the +/-180 degree range.
    fn wrap_up_coordinates(&self, inner: &mut PlannerInner) -> Result<()> {
        let mut wrapped_axes = AxesLocation::new();
        for (axis, config) in self.axes.iter() {
            if !(config.is_rotation() && config.limit_rotation && config.wrap_around_rotation) {
                continue;
            }
            let present = inner.location.coordinate(axis);
            let wrapped = normalize_angle_180(present);
            if present == wrapped {
                continue;
            }
            let offset = inner.backlash_offsets.coordinate(axis);
            let driver_location = AxesLocation::single(axis.clone(), wrapped + offset);
            for driver in self.drivers.iter().filter(|d| d.drives(axis)) {
                driver
                    .set_global_offsets(&driver_location)
                    .map_err(|source| driver_error(driver, source))?;
            }
            inner.location = inner.location.with(axis, wrapped);
            wrapped_axes = wrapped_axes.put(&driver_location);
        }
        if wrapped_axes.is_empty() {
            return Ok(());
        }
        tracing::debug!(axes = %wrapped_axes, "wrapped rotation axes");
        self.supersede_tail(&inner.location.add(&inner.backlash_offsets), &wrapped_axes);
        inner.executed = (inner.location.clone(), inner.backlash_offsets.clone());
        Ok(())
    }

    /// Append a still-stand at `changed` (on top of the last planned
    /// location) so queries after the current tail see the new coordinates.
    fn supersede_tail(&self, fallback: &AxesLocation, changed: &AxesLocation) {
        let now = self.clock.now();
        self.plan.update(|plan| {
            let base = plan
                .last()
                .map_or_else(|| fallback.clone(), |last| last.motion.location().clone());
            let time = plan.last().map_or(now, |last| last.time.max(now));
            plan.insert(time, Motion::stillstand(&base.put(changed)));
        });
    }

    /// Motion active at `time`, or a still-stand motion anchored at `time`
    /// if the plan ended before it.
    pub fn momentary_motion(&self, time: f64) -> Arc<Motion> {
        let plan = self.plan.snapshot();
        if let Some(entry) = plan.higher(time) {
            return entry.motion.clone();
        }
        let location = match plan.last() {
            Some(last) => last.motion.location().clone(),
            None => self.live_location(),
        };
        Arc::new(Motion::stillstand(&location).with_planned_time1(time))
    }

    /// Interpolated location of the machine at `time`.
    pub fn momentary_location(&self, time: f64) -> AxesLocation {
        let motion = self.momentary_motion(time);
        motion.momentary_location(self.motion_time(&motion, time))
    }

    pub fn momentary_velocity(&self, time: f64) -> AxesLocation {
        let motion = self.momentary_motion(time);
        motion.momentary_velocity(self.motion_time(&motion, time))
    }

    fn motion_time(&self, motion: &Motion, time: f64) -> f64 {
        let end = motion.planned_time1().unwrap_or(time);
        time - (end - motion.time())
    }

    fn live_location(&self) -> AxesLocation {
        self.drivers.iter().fold(
            AxesLocation::from_axes(&self.axes, |_| 0.0),
            |location, driver| location.put(&driver.reported_location()),
        )
    }

    /// Drop plan entries that ended before `time`. Entries still ahead of
    /// the clock and the last entry are kept.
    pub fn clear_motion_older_than(&self, time: f64) -> usize {
        let _inner = self.inner.lock();
        self.trim_history(time)
    }

    fn trim_history(&self, time: f64) -> usize {
        let now = self.clock.now();
        self.plan.update(|plan| {
            let cutoff = plan.last().map_or(time, |last| time.min(now).min(last.time));
            plan.retain_from(cutoff)
        })
    }

    /// Complete all motion, home the drivers and reset the coordinates to
    /// the home coordinates of the axes.
    pub fn home(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.complete(&mut inner, None, CompletionType::WaitForStillstand)?;
        inner.backlash_offsets = AxesLocation::new();
        let home: AxesLocation = self
            .axes
            .iter()
            .map(|(axis, config)| (axis.clone(), config.home_coordinate))
            .collect();
        for driver in &self.drivers {
            driver
                .home(&home.driven_by(driver.axes()))
                .map_err(|source| driver_error(driver, source))?;
        }
        inner.location = home.clone();
        inner.executed = (home.clone(), AxesLocation::new());
        self.supersede_tail(&home, &home);
        self.set_state(PlannerState::Stillstand);
        tracing::info!(location = %home, "homed");
        Ok(())
    }

    /// Re-base the coordinates of the given axes without moving them.
    pub fn set_global_offsets(&self, location: &AxesLocation) -> Result<()> {
        let mut inner = self.inner.lock();
        for axis in location.axes() {
            self.axes.get(axis)?;
        }
        self.execute(&mut inner)?;
        let driver_location: AxesLocation = location
            .iter()
            .map(|(axis, c)| (axis.clone(), c + inner.backlash_offsets.coordinate(axis)))
            .collect();
        for driver in &self.drivers {
            let driven = driver_location.driven_by(driver.axes());
            if driven.is_empty() {
                continue;
            }
            driver
                .set_global_offsets(&driven)
                .map_err(|source| driver_error(driver, source))?;
        }
        inner.location = inner.location.put(location);
        inner.executed = (inner.location.clone(), inner.backlash_offsets.clone());
        let planned = inner.location.add(&inner.backlash_offsets);
        self.supersede_tail(&planned, &driver_location);
        tracing::info!(%location, "global offsets set");
        Ok(())
    }

    /// Enable or disable all drivers. Disabling drops the motions that were
    /// not executed yet.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if !enabled {
            self.discard(&mut inner);
        }
        for driver in &self.drivers {
            driver
                .set_enabled(enabled)
                .map_err(|source| driver_error(driver, source))?;
        }
        tracing::info!(enabled, "drivers switched");
        Ok(())
    }

    /// Apply soft limits and rotation handling to `location`. In silent mode
    /// a soft limit violation yields `None` instead of an error.
    pub fn limit_axes_location(
        &self,
        location: &AxesLocation,
        silent: bool,
    ) -> Result<Option<AxesLocation>> {
        let current = self.inner.lock().location.clone();
        match self.check_location(&current, location) {
            Ok(limited) => Ok(Some(limited)),
            Err(Error::SoftLimitViolation { .. }) if silent => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn is_valid_location(&self, location: &AxesLocation) -> bool {
        matches!(self.limit_axes_location(location, true), Ok(Some(_)))
    }

    fn check_location(
        &self,
        current: &AxesLocation,
        location: &AxesLocation,
    ) -> Result<AxesLocation> {
        let mut limited = location.clone();
        for (axis, coordinate) in location.iter() {
            let config = self.axes.get(axis)?;
            if config.is_rotation() {
                if config.wrap_around_rotation {
                    let present = current.coordinate(axis);
                    let wrapped = present + normalize_angle_180(coordinate - present);
                    if config.resolution_ticks(wrapped) != config.resolution_ticks(coordinate) {
                        limited = limited.with(axis, wrapped);
                    }
                } else if config.limit_rotation {
                    limited = limited.with(axis, normalize_angle_180(coordinate));
                }
                continue;
            }
            let violation = |limit: f64, bound| Error::SoftLimitViolation {
                axis: axis.clone(),
                value: coordinate,
                limit,
                bound,
            };
            if let Some(low) = config.soft_limit_low
                && coordinate < low
                && !config.coordinates_match(coordinate, low)
            {
                return Err(violation(low, LimitBound::Low));
            }
            if let Some(high) = config.soft_limit_high
                && coordinate > high
                && !config.coordinates_match(coordinate, high)
            {
                return Err(violation(high, LimitBound::High));
            }
        }
        Ok(limited)
    }

    /// Drop the commands and motions not yet executed. Returns the number of
    /// discarded motions.
    pub fn discard_pending(&self) -> usize {
        self.discard(&mut self.inner.lock())
    }

    fn discard(&self, inner: &mut PlannerInner) -> usize {
        let discarded = inner.pending.len();
        inner.pending.clear();
        inner.commands.clear();
        (inner.location, inner.backlash_offsets) = inner.executed.clone();
        if discarded > 0 {
            self.set_state(if self.plan.snapshot().is_empty() {
                PlannerState::Idle
            } else {
                PlannerState::Stillstand
            });
            tracing::debug!(discarded, "discarded pending motions");
        }
        discarded
    }
}

fn null_motion(command: &MoveCommand) -> Motion {
    let limits = ProfileLimits::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let profiles = command
        .to
        .iter()
        .map(|(axis, c)| (axis.clone(), MotionProfile::still(c, 0.0, limits)))
        .collect();
    Motion::from_profiles(
        command.from.clone(),
        profiles,
        command.speed,
        command.options.without_blend().with_fixed_waypoint(),
    )
}

/// True if blending must keep `motion` on its straight line.
fn keeps_straight(motion: &Motion) -> bool {
    let coordinated = |p: &MotionProfile| p.options().is_coordinated();
    motion.options().is_coordinated_waypoint() && motion.profiles().values().any(coordinated)
}

/// Junction velocities of a blended run, restricted so that moves through
/// coordinated waypoints stay on their straight line. A junction between
/// two such moves in different directions is passed at rest.
fn straight_junctions(run: &[Motion], velocities: &[AxesLocation]) -> Vec<AxesLocation> {
    velocities
        .iter()
        .enumerate()
        .map(|(w, velocity)| {
            let adjacent: Vec<&Motion> = [w.checked_sub(1), Some(w)]
                .into_iter()
                .flatten()
                .filter_map(|k| run.get(k))
                .filter(|motion| keeps_straight(motion))
                .collect();
            let mut velocity = velocity.clone();
            for motion in &adjacent {
                velocity = along(&velocity, motion);
            }
            if adjacent.iter().all(|motion| is_along(&velocity, motion)) {
                velocity
            } else {
                velocity.scale(0.0)
            }
        })
        .collect()
}

/// `velocity` projected onto the direction of `motion` by the speed of its
/// lead axis and capped by its velocity limits. Moving backwards stops.
fn along(velocity: &AxesLocation, motion: &Motion) -> AxesLocation {
    let profiles = motion.profiles();
    let lead = profiles.iter().fold(None, |best: Option<(&AxisId, f64)>, (axis, p)| {
        let distance = p.displacement();
        match best {
            Some((_, best_distance)) if best_distance.abs() >= distance.abs() => best,
            _ => Some((axis, distance)),
        }
    });
    let speed = match lead {
        Some((axis, distance)) if distance != 0.0 => {
            (velocity.coordinate(axis) / distance).max(0.0)
        }
        _ => 0.0,
    };
    let speed = profiles
        .values()
        .filter(|p| p.displacement() != 0.0)
        .fold(speed, |speed, p| {
            speed.min(p.limits().velocity_max / p.displacement().abs())
        });
    profiles
        .iter()
        .map(|(axis, p)| (axis.clone(), speed * p.displacement()))
        .collect()
}

fn is_along(velocity: &AxesLocation, motion: &Motion) -> bool {
    let projected = along(velocity, motion);
    velocity
        .iter()
        .all(|(axis, v)| (v - projected.coordinate(axis)).abs() <= 1e-9 * (1.0 + v.abs()))
}

fn driver_error(driver: &Arc<dyn Driver>, source: DriverError) -> Error {
    tracing::error!(driver = driver.name(), %source, "driver failed");
    Error::Driver {
        driver: driver.name().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        axes::AxisConfig, clock::ManualClock, driver::SimulatedDriver, motion::Derivative,
    };

    struct Fixture {
        planner: Planner,
        driver: Arc<SimulatedDriver>,
        clock: Arc<ManualClock>,
    }

    fn x() -> AxisId {
        AxisId::linear("X")
    }

    fn y() -> AxisId {
        AxisId::linear("Y")
    }

    fn c() -> AxisId {
        AxisId::rotation("C")
    }

    fn axis_configs() -> Vec<AxisConfig> {
        let mut c = AxisConfig::rotation("C").with_limits(3600.0, 20000.0, 0.0);
        c.wrap_around_rotation = true;
        c.limit_rotation = true;
        vec![
            AxisConfig::linear("X")
                .with_limits(500.0, 2000.0, 15000.0)
                .with_soft_limits(Some(-10.0), Some(300.0)),
            AxisConfig::linear("Y").with_limits(500.0, 2000.0, 15000.0),
            c,
        ]
    }

    fn fixture_with(configs: Vec<AxisConfig>, config: PlannerConfig) -> Fixture {
        let axes = Axes::new(configs);
        let driver = Arc::new(SimulatedDriver::new("sim", axes.ids().cloned()));
        let clock = Arc::new(ManualClock::new(0.0));
        let drivers: Vec<Arc<dyn Driver>> = vec![driver.clone()];
        let planner = Planner::new(axes, drivers, clock.clone(), config);
        Fixture {
            planner,
            driver,
            clock,
        }
    }

    fn fixture(strategy: PlannerStrategy) -> Fixture {
        fixture_with(
            axis_configs(),
            PlannerConfig {
                strategy,
                ..PlannerConfig::default()
            },
        )
    }

    fn xy(x0: f64, y0: f64) -> AxesLocation {
        [(x(), x0), (y(), y0)].into_iter().collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn move_to(f: &Fixture, target: &AxesLocation) {
        let options = MotionOptions::new();
        f.planner.move_to(target, 1.0, options).unwrap();
    }

    fn is_at(f: &Fixture, location: &AxesLocation) -> bool {
        f.planner.location().matches(location, f.planner.axes())
    }

    fn wait(f: &Fixture) {
        f.planner
            .wait_for_completion(None, CompletionType::WaitForStillstand)
            .unwrap();
    }

    #[test]
    fn moves_are_committed_until_executed() {
        let f = fixture(PlannerStrategy::Simple);
        assert_eq!(f.planner.state(), PlannerState::Idle);
        move_to(&f, &xy(100.0, 50.0));
        assert_eq!(f.planner.state(), PlannerState::Committed);
        assert!(f.planner.plan_snapshot().is_empty());
        assert_eq!(f.planner.pending_motions().len(), 1);
        assert!(f.driver.motions().is_empty());

        wait(&f);
        assert_eq!(f.planner.state(), PlannerState::Stillstand);
        let plan = f.planner.plan_snapshot();
        assert_eq!(plan.len(), 1);
        assert_eq!(f.driver.motions().len(), 1);
        // The clock was advanced to the end of the motion.
        assert_eq!(f.clock.now(), plan.entries()[0].time);
        let now = f.clock.now();
        let location = f.planner.momentary_location(now);
        assert!(location.matches(&xy(100.0, 50.0), f.planner.axes()));
    }

    #[test]
    fn plan_time_is_strictly_increasing() {
        let f = fixture(PlannerStrategy::Simple);
        let targets = [xy(10.0, 0.0), xy(10.0, 0.0), xy(20.0, 30.0), xy(0.0, 0.0)];
        for (i, target) in targets.iter().enumerate() {
            move_to(&f, target);
            if i % 2 == 1 {
                f.planner
                    .wait_for_completion(None, CompletionType::CommandStillstand)
                    .unwrap();
            }
        }
        wait(&f);
        let plan = f.planner.plan_snapshot();
        assert_eq!(plan.len(), 4);
        assert!(plan.entries().windows(2).all(|w| w[0].time < w[1].time));
        for entry in plan.entries() {
            assert_eq!(entry.motion.planned_time1(), Some(entry.time));
        }
    }

    #[test]
    fn momentary_queries_are_pure() {
        let f = fixture(PlannerStrategy::Simple);
        f.clock.set(1.0);
        move_to(&f, &xy(200.0, 0.0));
        f.planner
            .wait_for_completion(None, CompletionType::CommandStillstand)
            .unwrap();
        let entry = f.planner.plan_snapshot().entries()[0].clone();
        let middle = entry.start_time() + entry.motion.time() / 2.0;
        let a = f.planner.momentary_location(middle);
        let b = f.planner.momentary_location(middle);
        assert_eq!(a, b);
        let px = a.get(&x()).unwrap();
        assert!((px - 100.0).abs() < 1e-6, "{a}");
        assert!(f.planner.momentary_velocity(middle).coordinate(&x()) > 0.0);
        // Before the plan starts: initial state.
        assert_eq!(f.planner.momentary_location(0.5).get(&x()).unwrap(), 0.0);
        // After the plan ends: final state.
        let after = entry.time + 10.0;
        assert_eq!(f.planner.momentary_location(after).coordinate(&x()), 200.0);
        assert!(f.planner.momentary_motion(after).options().is_stillstand());
    }

    #[test]
    fn empty_plan_reports_the_live_location() {
        let f = fixture(PlannerStrategy::Simple);
        let location = f.planner.momentary_location(5.0);
        assert_eq!(location.get(&x()).unwrap(), 0.0);
        assert_eq!(location.len(), 3);
    }

    #[test]
    fn soft_limit_rejection_leaves_the_plan_unmodified() {
        let f = fixture(PlannerStrategy::Simple);
        let result = f.planner.move_to(&xy(301.0, 0.0), 1.0, MotionOptions::new());
        assert!(matches!(
            result,
            Err(Error::SoftLimitViolation {
                bound: LimitBound::High,
                limit,
                value,
                ..
            }) if limit == 300.0 && value == 301.0
        ));
        assert_eq!(f.planner.state(), PlannerState::Idle);
        assert!(f.planner.pending_motions().is_empty());
        assert_eq!(f.planner.location().get(&x()).unwrap(), 0.0);

        // Exactly at the limit, within resolution.
        move_to(&f, &xy(300.00004, 0.0));
        wait(&f);
        assert_eq!(f.planner.plan_snapshot().len(), 1);

        assert!(matches!(
            f.planner.move_to(&xy(-11.0, 0.0), 1.0, MotionOptions::new()),
            Err(Error::SoftLimitViolation {
                bound: LimitBound::Low,
                ..
            })
        ));
    }

    #[test]
    fn silent_probing_signals_infeasibility() {
        let f = fixture(PlannerStrategy::Simple);
        let limited = f.planner.limit_axes_location(&xy(400.0, 0.0), true);
        assert_eq!(limited.unwrap(), None);
        let limited = f.planner.limit_axes_location(&xy(400.0, 0.0), false);
        assert!(limited.is_err());
        assert!(!f.planner.is_valid_location(&xy(400.0, 0.0)));
        assert!(f.planner.is_valid_location(&xy(300.0, 0.0)));
        assert!(matches!(
            f.planner.limit_axes_location(&AxesLocation::single(AxisId::linear("Q"), 1.0), true),
            Err(Error::UnknownAxis(_))
        ));
    }

    #[test]
    fn rotation_wraps_around_and_is_rebased() {
        let f = fixture(PlannerStrategy::Simple);
        move_to(&f, &AxesLocation::single(c(), 170.0));
        wait(&f);
        assert_eq!(f.planner.location().get(&c()).unwrap(), 170.0);

        // The short way from 170 to -170 is +20 degrees.
        let limited = f
            .planner
            .limit_axes_location(&AxesLocation::single(c(), -170.0), false)
            .unwrap()
            .unwrap();
        assert!((limited.get(&c()).unwrap() - 190.0).abs() < 1e-9);

        move_to(&f, &AxesLocation::single(c(), -170.0));
        let pending = f.planner.pending_motions();
        assert!(close(pending[0].location().coordinate(&c()), 190.0));
        wait(&f);

        // Re-based after completion, through the driver and the plan.
        assert!((f.planner.location().coordinate(&c()) + 170.0).abs() < 1e-9);
        let offsets = f.driver.offsets();
        assert_eq!(offsets.len(), 1);
        assert!((offsets[0].get(&c()).unwrap() + 170.0).abs() < 1e-9);
        let now = f.clock.now();
        let later = f.planner.momentary_location(now + 1.0);
        assert!((later.coordinate(&c()) + 170.0).abs() < 1e-9);
    }

    #[test]
    fn limited_rotation_is_normalized() {
        let mut configs = axis_configs();
        configs[2].wrap_around_rotation = false;
        let f = fixture_with(configs, PlannerConfig::default());
        let limited = f
            .planner
            .limit_axes_location(&AxesLocation::single(c(), 350.0), false)
            .unwrap()
            .unwrap();
        assert!((limited.get(&c()).unwrap() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn one_sided_backlash_adds_an_overshoot_move() {
        let mut configs = axis_configs();
        configs[0] = configs[0]
            .clone()
            .with_backlash(BacklashCompensation::OneSidedPositioning, -0.1, 0.5);
        let f = fixture_with(configs, PlannerConfig::default());
        move_to(&f, &xy(100.0, 0.0));
        let pending = f.planner.pending_motions();
        assert_eq!(pending.len(), 2);
        assert!(close(pending[0].location().coordinate(&x()), 99.9));
        assert_eq!(pending[1].location().get(&x()).unwrap(), 100.0);
        assert_eq!(pending[1].nominal_speed(), 0.5);
        wait(&f);
        assert_eq!(f.driver.motions().len(), 2);
        assert_eq!(f.planner.location().get(&x()).unwrap(), 100.0);

        // Skipped when speed matters more.
        let options = MotionOptions::new().with_speed_over_precision();
        f.planner.move_to(&xy(50.0, 0.0), 1.0, options).unwrap();
        assert_eq!(f.planner.pending_motions().len(), 1);
    }

    #[test]
    fn optimized_backlash_only_compensates_in_offset_direction() {
        let mut configs = axis_configs();
        let compensation = BacklashCompensation::OneSidedOptimizedPositioning;
        configs[0] = configs[0].clone().with_backlash(compensation, -0.1, 1.0);
        let f = fixture_with(configs, PlannerConfig::default());
        move_to(&f, &xy(100.0, 0.0));
        assert_eq!(f.planner.pending_motions().len(), 1);
        wait(&f);
        move_to(&f, &xy(50.0, 0.0));
        assert_eq!(f.planner.pending_motions().len(), 2);
    }

    #[test]
    fn directional_backlash_is_remembered() {
        let mut configs = axis_configs();
        configs[0] = configs[0]
            .clone()
            .with_backlash(BacklashCompensation::DirectionalCompensation, 0.05, 1.0);
        let f = fixture_with(configs, PlannerConfig::default());
        move_to(&f, &xy(10.0, 0.0));
        let pending = f.planner.pending_motions();
        assert_eq!(pending.len(), 1);
        assert!(close(pending[0].location().coordinate(&x()), 10.05));
        assert_eq!(f.planner.location().get(&x()).unwrap(), 10.0);
        wait(&f);

        // X does not move, but keeps its offset.
        move_to(&f, &xy(10.0, 20.0));
        let pending = f.planner.pending_motions();
        assert!(close(pending[0].start_location().coordinate(&x()), 10.05));
        assert!(close(pending[0].location().coordinate(&x()), 10.05));
        wait(&f);

        // Moving back, against the offset direction, drops it.
        move_to(&f, &xy(5.0, 20.0));
        let pending = f.planner.pending_motions();
        assert_eq!(pending[0].location().get(&x()).unwrap(), 5.0);
    }

    #[test]
    fn homing_rebases_coordinates() {
        let mut configs = axis_configs();
        configs[1].home_coordinate = 5.0;
        let f = fixture_with(configs, PlannerConfig::default());
        move_to(&f, &xy(100.0, 50.0));
        f.planner.home().unwrap();
        assert_eq!(f.driver.homed(), 1);
        // Pending motion was executed first.
        assert_eq!(f.driver.motions().len(), 1);
        assert_eq!(f.planner.location(), xy(0.0, 5.0).put(&AxesLocation::single(c(), 0.0)));
        assert_eq!(f.planner.state(), PlannerState::Stillstand);
        let later = f.clock.now() + 1.0;
        assert_eq!(f.planner.momentary_location(later).get(&y()).unwrap(), 5.0);
    }

    #[test]
    fn global_offsets_rebase_without_moving() {
        let f = fixture(PlannerStrategy::Simple);
        move_to(&f, &xy(100.0, 0.0));
        wait(&f);
        let moves = f.driver.motions().len();
        let offsets = AxesLocation::single(x(), 5.0);
        f.planner.set_global_offsets(&offsets).unwrap();
        assert_eq!(f.driver.motions().len(), moves);
        assert_eq!(f.driver.offsets().len(), 1);
        assert_eq!(f.planner.location().get(&x()).unwrap(), 5.0);
        let later = f.clock.now() + 1.0;
        assert_eq!(f.planner.momentary_location(later).get(&x()).unwrap(), 5.0);
        assert_eq!(f.driver.reported_location().get(&x()).unwrap(), 5.0);
    }

    #[test]
    fn completion_timeout_leaves_the_plan_intact() {
        let f = fixture_with(
            axis_configs(),
            PlannerConfig {
                completion_timeout: 0.01,
                ..PlannerConfig::default()
            },
        );
        move_to(&f, &xy(250.0, 0.0));
        let result = f.planner.wait_for_completion(None, CompletionType::WaitForStillstand);
        let Err(Error::CompletionTimeout { waited }) = result else {
            panic!("{result:?}");
        };
        assert!((waited - 0.01).abs() < 1e-9);
        assert_eq!(f.planner.plan_snapshot().len(), 1);
        assert_eq!(f.planner.state(), PlannerState::Executing);

        f.planner
            .wait_for_completion(None, CompletionType::WaitForStillstandIndefinitely)
            .unwrap();
        assert_eq!(f.planner.state(), PlannerState::Stillstand);
        assert_eq!(f.planner.plan_snapshot().len(), 1);
    }

    #[test]
    fn disabled_driver_fails_loudly() {
        let f = fixture(PlannerStrategy::Simple);
        f.driver.set_enabled(false).unwrap();
        move_to(&f, &xy(10.0, 0.0));
        let result = f.planner.wait_for_completion(None, CompletionType::WaitForStillstand);
        assert!(matches!(
            result,
            Err(Error::Driver {
                source: DriverError::Disabled,
                ..
            })
        ));
        // Nothing reached the plan, the motion is still pending.
        assert!(f.planner.plan_snapshot().is_empty());
        assert_eq!(f.planner.pending_motions().len(), 1);

        f.driver.set_enabled(true).unwrap();
        wait(&f);
        assert_eq!(f.planner.plan_snapshot().len(), 1);
        assert_eq!(f.driver.motions().len(), 1);
    }

    #[test]
    fn disabling_drops_pending_motions() {
        let f = fixture(PlannerStrategy::Simple);
        move_to(&f, &xy(10.0, 0.0));
        f.planner.set_enabled(false).unwrap();
        assert!(!f.driver.is_enabled());
        assert!(f.planner.pending_motions().is_empty());
        assert_eq!(f.planner.location().get(&x()).unwrap(), 0.0);

        f.planner.set_enabled(true).unwrap();
        move_to(&f, &xy(5.0, 0.0));
        wait(&f);
        assert_eq!(f.driver.motions().len(), 1);
    }

    #[test]
    fn discarding_pending_motions_restores_the_location() {
        let f = fixture(PlannerStrategy::Simple);
        move_to(&f, &xy(10.0, 0.0));
        wait(&f);
        move_to(&f, &xy(20.0, 0.0));
        move_to(&f, &xy(30.0, 0.0));
        assert_eq!(f.planner.discard_pending(), 2);
        assert_eq!(f.planner.location().get(&x()).unwrap(), 10.0);
        assert_eq!(f.planner.state(), PlannerState::Stillstand);
        wait(&f);
        assert_eq!(f.planner.plan_snapshot().len(), 1);
    }

    #[test]
    fn history_is_cleared() {
        let f = fixture(PlannerStrategy::Simple);
        move_to(&f, &xy(10.0, 0.0));
        wait(&f);
        move_to(&f, &xy(20.0, 0.0));
        wait(&f);
        let plan = f.planner.plan_snapshot();
        let second = plan.entries()[1].time;
        assert_eq!(f.planner.clear_motion_older_than(second), 1);
        assert_eq!(f.planner.plan_snapshot().len(), 1);

        // Retention horizon applied after completion.
        f.clock.advance(1000.0);
        move_to(&f, &xy(30.0, 0.0));
        wait(&f);
        assert_eq!(f.planner.plan_snapshot().len(), 1);
    }

    #[test]
    fn history_ahead_of_the_clock_is_kept() {
        let f = fixture(PlannerStrategy::Simple);
        for target in [xy(10.0, 0.0), xy(20.0, 0.0)] {
            move_to(&f, &target);
            f.planner
                .wait_for_completion(None, CompletionType::CommandStillstand)
                .unwrap();
        }
        assert_eq!(f.clock.now(), 0.0);
        assert_eq!(f.planner.clear_motion_older_than(1000.0), 0);
        assert_eq!(f.planner.plan_snapshot().len(), 2);

        f.clock.advance(1000.0);
        assert_eq!(f.planner.clear_motion_older_than(2000.0), 1);
        assert_eq!(f.planner.plan_snapshot().len(), 1);
        let now = f.clock.now();
        let location = f.planner.momentary_location(now);
        assert!(location.matches(&xy(20.0, 0.0), f.planner.axes()));
    }

    #[test]
    fn null_strategy_moves_instantly() {
        let f = fixture(PlannerStrategy::Null);
        f.clock.set(2.0);
        move_to(&f, &xy(100.0, 0.0));
        wait(&f);
        let plan = f.planner.plan_snapshot();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries()[0].motion.time(), 0.0);
        assert_eq!(f.clock.now(), 2.0);
        assert_eq!(f.planner.momentary_location(2.5).get(&x()).unwrap(), 100.0);
        assert_eq!(f.driver.motions().len(), 1);
    }

    #[test]
    fn advanced_strategy_is_never_slower() {
        let targets = [xy(50.0, 0.0), xy(100.0, 10.0), xy(150.0, 10.0), xy(150.0, 60.0)];
        let mut ends = Vec::new();
        for strategy in [PlannerStrategy::Simple, PlannerStrategy::Advanced] {
            let f = fixture(strategy);
            for (i, target) in targets.iter().enumerate() {
                let mut options = MotionOptions::new();
                if i + 1 < targets.len() {
                    options = options.with_blend();
                }
                f.planner.move_to(target, 1.0, options).unwrap();
            }
            let pending = f.planner.pending_motions();
            assert_eq!(pending.len(), targets.len());
            for motion in &pending {
                motion.check_validity().unwrap();
            }
            assert!(pending.last().unwrap().options().is_fixed_waypoint());
            if strategy == PlannerStrategy::Advanced {
                assert!(f.planner.last_solver_status().is_some());
            }
            wait(&f);
            assert!(is_at(&f, &xy(150.0, 60.0)));
            ends.push(f.clock.now());
        }
        assert!(ends[1] <= ends[0] + 1e-9, "{ends:?}");
    }

    #[test]
    fn blending_into_a_standing_move_stops_there() {
        for strategy in [PlannerStrategy::Simple, PlannerStrategy::Advanced] {
            let f = fixture(strategy);
            let blend = MotionOptions::new().with_blend();
            f.planner.move_to(&xy(100.0, 0.0), 1.0, blend).unwrap();
            move_to(&f, &xy(100.0, 0.0));
            let pending = f.planner.pending_motions();
            assert_eq!(pending.len(), 2);
            assert!(pending[0].options().is_fixed_waypoint());
            let velocity = pending[0].vector(Derivative::Velocity);
            assert_eq!(velocity.coordinate(&x()), 0.0);
            wait(&f);
            assert!(is_at(&f, &xy(100.0, 0.0)));
        }

        // Blending resumes after the standing move.
        let f = fixture(PlannerStrategy::Advanced);
        let blend = MotionOptions::new().with_blend();
        for target in [xy(50.0, 0.0), xy(100.0, 10.0), xy(100.0, 10.0), xy(150.0, 10.0)] {
            f.planner.move_to(&target, 1.0, blend).unwrap();
        }
        move_to(&f, &xy(200.0, 10.0));
        let pending = f.planner.pending_motions();
        assert_eq!(pending.len(), 5);
        for motion in &pending {
            motion.check_validity().unwrap();
        }
        for standing in &pending[1..3] {
            let velocity = standing.vector(Derivative::Velocity);
            assert!(velocity.iter().all(|(_, v)| v == 0.0), "{velocity}");
        }
        wait(&f);
        assert!(is_at(&f, &xy(200.0, 10.0)));
    }

    #[test]
    fn only_the_last_jog_leaves_its_end_open() {
        let f = fixture(PlannerStrategy::Simple);
        let jog = MotionOptions::new().with_jog_motion();
        f.planner.move_to(&xy(50.0, 0.0), 1.0, jog).unwrap();
        let pending = f.planner.pending_motions();
        pending[0].check_validity().unwrap();
        let velocity = pending[0].vector(Derivative::Velocity);
        assert!(velocity.coordinate(&x()) > 0.0);
        assert!(!pending[0].options().is_fixed_waypoint());

        move_to(&f, &xy(80.0, 0.0));
        let pending = f.planner.pending_motions();
        assert_eq!(pending.len(), 2);
        assert!(!pending[0].options().is_jog_motion());
        let velocity = pending[0].vector(Derivative::Velocity);
        assert_eq!(velocity.coordinate(&x()), 0.0);
        assert!(pending[1].options().is_fixed_waypoint());
        wait(&f);
        assert!(is_at(&f, &xy(80.0, 0.0)));
    }

    #[test]
    fn coordinated_waypoints_stay_on_their_line() {
        let f = fixture(PlannerStrategy::Advanced);
        let line = MotionOptions::new().with_coordinated_waypoint();
        let blend = line.with_blend();
        f.planner.move_to(&xy(30.0, 40.0), 1.0, blend).unwrap();
        f.planner.move_to(&xy(60.0, 80.0), 1.0, blend).unwrap();
        f.planner.move_to(&xy(60.0, 120.0), 1.0, line).unwrap();
        let pending = f.planner.pending_motions();
        assert_eq!(pending.len(), 3);
        for motion in &pending {
            motion.check_validity().unwrap();
            let start = motion.start_location();
            let d = motion.location().subtract(start);
            let (dx, dy) = (d.coordinate(&x()), d.coordinate(&y()));
            for i in 0..=20 {
                let p = motion
                    .momentary_location(motion.time() * i as f64 / 20.0)
                    .subtract(start);
                let cross = p.coordinate(&x()) * dy - p.coordinate(&y()) * dx;
                assert!(cross.abs() < 1e-6 * (dx * dx + dy * dy), "{p} off {d}");
            }
        }

        // Passing straight on keeps to the line, the turn is taken at rest.
        let through = pending[0].vector(Derivative::Velocity);
        let (vx, vy) = (through.coordinate(&x()), through.coordinate(&y()));
        assert!(vx >= 0.0, "{through}");
        assert!((vx * 40.0 - vy * 30.0).abs() < 1e-6, "{through}");
        let turn = pending[1].vector(Derivative::Velocity);
        assert!(turn.iter().all(|(_, v)| v == 0.0), "{turn}");
    }

    #[test]
    fn non_convergence_fails_the_move_when_rejected() {
        for reject in [false, true] {
            let f = fixture_with(
                axis_configs(),
                PlannerConfig {
                    strategy: PlannerStrategy::Advanced,
                    solver: SolverConfig {
                        max_function_evaluations: 1,
                        reject_non_convergence: reject,
                        ..SolverConfig::default()
                    },
                    ..PlannerConfig::default()
                },
            );
            let blend = MotionOptions::new().with_blend();
            f.planner.move_to(&xy(50.0, 0.0), 1.0, blend).unwrap();
            let result = f.planner.move_to(&xy(100.0, 10.0), 1.0, MotionOptions::new());
            if reject {
                assert!(matches!(
                    result,
                    Err(Error::SolverNonConvergence {
                        status: SolverStatus::MaxFunctionEvaluations,
                        ..
                    })
                ));
                assert_eq!(f.planner.pending_motions().len(), 1);
                assert!(is_at(&f, &xy(50.0, 0.0)));
                assert_eq!(f.planner.state(), PlannerState::Committed);
            } else {
                result.unwrap();
                assert_eq!(f.planner.pending_motions().len(), 2);
                assert_eq!(
                    f.planner.last_solver_status(),
                    Some(SolverStatus::MaxFunctionEvaluations)
                );
            }
        }
    }
}
