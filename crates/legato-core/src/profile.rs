//! Single-axis jerk-limited motion profile.
//!
//! A profile consists of seven constant-jerk segments between eight points:
//!
//! ```text
//!   1: jerk up to entry acceleration     5: jerk down to exit deceleration
//!   2: constant entry acceleration       6: constant exit deceleration
//!   3: jerk down to cruise               7: jerk up to exit acceleration
//!   4: cruise at constant velocity
//! ```
//!
//! Point `i` holds location, velocity and acceleration at the end of segment
//! `i`, and `j[i]`/`t[i + 1]` are the jerk and duration of the segment that
//! starts there. Boundary conditions live in points 0 and 7.
//!
//! The solver searches the cruise velocity (`v[4]`) that yields the shortest
//! valid profile, or the one that meets a minimum time. Because the
//! displacement of the cruise segment is not monotonic in the cruise
//! velocity when entry/exit velocities are involved, the velocity range is
//! split into regions with known behavior which are bisected separately.

use std::fmt;
use thiserror::Error;

pub const SEGMENTS: usize = 7;

const ITERATIONS: usize = 80;
const VTOL: f64 = 2.0; // mm/s
const ATOL: f64 = VTOL * 2.0; // mm/s^2
const JTOL: f64 = ATOL * 6.0; // mm/s^3
const TTOL: f64 = 0.000_001; // s
const EPS: f64 = 1e-8;

/// Constraint violated by a solved profile, in descending order of severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum ErrorState {
    #[error("solution not finite")]
    SolutionNotFinite,
    #[error("negative segment time")]
    NegativeSegmentTime,
    #[error("time sum mismatch")]
    TimeSumMismatch,
    #[error("boundary state mismatch")]
    BoundaryMismatch,
    #[error("location discontinuity")]
    LocationDiscontinuity,
    #[error("velocity discontinuity")]
    VelocityDiscontinuity,
    #[error("acceleration discontinuity")]
    AccelerationDiscontinuity,
    #[error("minimum time violated")]
    MinTimeViolated,
    #[error("maximum time violated")]
    MaxTimeViolated,
    #[error("minimum location violated")]
    MinLocationViolated,
    #[error("maximum location violated")]
    MaxLocationViolated,
    #[error("maximum velocity violated")]
    MaxVelocityViolated,
    #[error("maximum acceleration violated")]
    MaxAccelerationViolated,
    #[error("maximum jerk violated")]
    MaxJerkViolated,
}

impl ErrorState {
    /// The profile is continuous, only limits are violated.
    pub fn is_consistent(self) -> bool {
        self > ErrorState::AccelerationDiscontinuity
    }

    /// The profile meets its time constraints.
    pub fn is_coordinated(self) -> bool {
        self > ErrorState::MaxTimeViolated
    }

    /// The profile stays within its location bounds.
    pub fn is_safe(self) -> bool {
        self > ErrorState::MaxLocationViolated
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileOptions(u8);

impl ProfileOptions {
    const COORDINATED: u8 = 1 << 0;
    const JOG: u8 = 1 << 1;
    const UNCONSTRAINED_ENTRY: u8 = 1 << 2;
    const UNCONSTRAINED_EXIT: u8 = 1 << 3;
    const SOLVED: u8 = 1 << 4;

    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn with_coordinated(mut self) -> Self {
        self.0 |= Self::COORDINATED;
        self
    }

    /// Jogging leaves the exit open like [`Self::with_unconstrained_exit`].
    pub const fn with_jog(mut self) -> Self {
        self.0 |= Self::JOG;
        self
    }

    /// Cruise freely through the start location, constrained by distance only.
    pub const fn with_unconstrained_entry(mut self) -> Self {
        self.0 |= Self::UNCONSTRAINED_ENTRY;
        self
    }

    /// Cruise freely through the end location, constrained by distance only.
    pub const fn with_unconstrained_exit(mut self) -> Self {
        self.0 |= Self::UNCONSTRAINED_EXIT;
        self
    }

    pub const fn is_coordinated(&self) -> bool {
        self.0 & Self::COORDINATED != 0
    }

    pub const fn is_jog(&self) -> bool {
        self.0 & Self::JOG != 0
    }

    pub const fn is_unconstrained_entry(&self) -> bool {
        self.0 & Self::UNCONSTRAINED_ENTRY != 0
    }

    pub const fn is_unconstrained_exit(&self) -> bool {
        self.0 & (Self::UNCONSTRAINED_EXIT | Self::JOG) != 0
    }

    /// Entry and exit swapped.
    const fn reversed(self) -> Self {
        let mut options =
            self.0 & !(Self::UNCONSTRAINED_ENTRY | Self::UNCONSTRAINED_EXIT | Self::JOG);
        if self.is_unconstrained_entry() {
            options |= Self::UNCONSTRAINED_EXIT;
        }
        if self.is_unconstrained_exit() {
            options |= Self::UNCONSTRAINED_ENTRY;
        }
        Self(options)
    }

    pub const fn is_solved(&self) -> bool {
        self.0 & Self::SOLVED != 0
    }

    const fn with_solved(mut self) -> Self {
        self.0 |= Self::SOLVED;
        self
    }

    const fn without_solved(mut self) -> Self {
        self.0 &= !Self::SOLVED;
        self
    }
}

/// Location, velocity and acceleration at one end of a profile.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Boundary {
    pub location: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

impl Boundary {
    pub const fn new(location: f64, velocity: f64, acceleration: f64) -> Self {
        Self {
            location,
            velocity,
            acceleration,
        }
    }

    /// At rest in the given location.
    pub const fn at(location: f64) -> Self {
        Self::new(location, 0.0, 0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProfileLimits {
    pub location_min: f64,
    pub location_max: f64,
    pub velocity_max: f64,
    pub entry_acceleration_max: f64,
    pub exit_acceleration_max: f64,
    /// Zero or infinite selects a constant acceleration profile.
    pub jerk_max: f64,
    pub time_min: f64,
    pub time_max: f64,
}

impl ProfileLimits {
    pub fn new(velocity_max: f64, acceleration_max: f64, jerk_max: f64) -> Self {
        Self {
            location_min: f64::NEG_INFINITY,
            location_max: f64::INFINITY,
            velocity_max,
            entry_acceleration_max: acceleration_max,
            exit_acceleration_max: acceleration_max,
            jerk_max,
            time_min: 0.0,
            time_max: f64::INFINITY,
        }
    }

    pub fn with_location_bounds(mut self, location_min: f64, location_max: f64) -> Self {
        self.location_min = location_min;
        self.location_max = location_max;
        self
    }

    pub fn with_time_min(mut self, time_min: f64) -> Self {
        self.time_min = time_min;
        self
    }

    /// The higher of the entry and exit acceleration limits.
    pub fn acceleration_max(&self) -> f64 {
        self.entry_acceleration_max.max(self.exit_acceleration_max)
    }
}

/// Sign function returning 0.0 for zero, unlike [`f64::signum`].
fn signum(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MotionProfile {
    s: [f64; SEGMENTS + 1],
    v: [f64; SEGMENTS + 1],
    a: [f64; SEGMENTS + 1],
    j: [f64; SEGMENTS + 1],
    t: [f64; SEGMENTS + 1],

    entry: Boundary,
    exit: Boundary,
    limits: ProfileLimits,
    options: ProfileOptions,

    time: f64,
    eval: usize,
    bound0: (f64, f64),
    bound1: (f64, f64),
}

impl MotionProfile {
    pub fn new(
        entry: Boundary,
        exit: Boundary,
        limits: ProfileLimits,
        options: ProfileOptions,
    ) -> Self {
        let mut profile = Self {
            s: [0.0; SEGMENTS + 1],
            v: [0.0; SEGMENTS + 1],
            a: [0.0; SEGMENTS + 1],
            j: [0.0; SEGMENTS + 1],
            t: [0.0; SEGMENTS + 1],
            entry,
            exit,
            limits,
            options: options.without_solved(),
            time: 0.0,
            eval: 0,
            bound0: (entry.location, 0.0),
            bound1: (exit.location, 0.0),
        };
        profile.reset_boundaries();
        profile
    }

    /// A solved profile resting in `location` for `time`.
    pub fn still(location: f64, time: f64, limits: ProfileLimits) -> Self {
        let mut profile = Self::new(
            Boundary::at(location),
            Boundary::at(location),
            limits.with_time_min(time),
            ProfileOptions::new(),
        );
        profile.solve();
        profile
    }

    fn reset_boundaries(&mut self) {
        self.s[0] = self.entry.location;
        self.v[0] = self.entry.velocity;
        self.a[0] = self.entry.acceleration;
        self.s[SEGMENTS] = self.exit.location;
        self.v[SEGMENTS] = self.exit.velocity;
        self.a[SEGMENTS] = self.exit.acceleration;
    }

    pub fn location(&self, point: usize) -> f64 {
        self.s[point]
    }

    pub fn velocity(&self, point: usize) -> f64 {
        self.v[point]
    }

    pub fn acceleration(&self, point: usize) -> f64 {
        self.a[point]
    }

    pub fn jerk(&self, point: usize) -> f64 {
        self.j[point]
    }

    /// Duration of segment `segment` (1..=7).
    pub fn segment_time(&self, segment: usize) -> f64 {
        self.t[segment]
    }

    pub fn entry(&self) -> Boundary {
        self.entry
    }

    pub fn exit(&self) -> Boundary {
        self.exit
    }

    pub fn limits(&self) -> ProfileLimits {
        self.limits
    }

    pub fn options(&self) -> ProfileOptions {
        self.options
    }

    pub fn time_min(&self) -> f64 {
        self.limits.time_min
    }

    pub fn set_time_min(&mut self, time_min: f64) {
        self.limits.time_min = time_min;
    }

    pub fn is_solved(&self) -> bool {
        self.options.is_solved()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Number of profile computations spent by the solver.
    pub fn evaluations(&self) -> usize {
        self.eval
    }

    pub fn displacement(&self) -> f64 {
        self.exit.location - self.entry.location
    }

    pub fn profile_velocity(&self) -> f64 {
        self.v[4].abs()
    }

    pub fn profile_entry_acceleration(&self) -> f64 {
        self.a[2].abs()
    }

    pub fn profile_exit_acceleration(&self) -> f64 {
        self.a[6].abs()
    }

    pub fn profile_jerk(&self) -> f64 {
        self.j[0].abs().max(self.j[6].abs())
    }

    /// Peak values of the solved profile as limits, without time constraint.
    /// Boundary states count, so entry and exit velocities above the cruise
    /// velocity are covered.
    pub fn solved_limits(&self) -> ProfileLimits {
        let peak = |values: &[f64]| values.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        ProfileLimits {
            velocity_max: peak(&self.v),
            entry_acceleration_max: peak(&self.a[..=SEGMENTS / 2]),
            exit_acceleration_max: peak(&self.a[SEGMENTS / 2 + 1..]),
            jerk_max: peak(&self.j),
            time_min: 0.0,
            ..self.limits
        }
    }

    /// The same move in the opposite direction, unsolved.
    pub fn reversed(&self) -> MotionProfile {
        let (entry, exit) = (self.entry, self.exit);
        MotionProfile::new(
            Boundary::new(exit.location, -exit.velocity, exit.acceleration),
            Boundary::new(entry.location, -entry.velocity, entry.acceleration),
            ProfileLimits {
                entry_acceleration_max: self.limits.exit_acceleration_max,
                exit_acceleration_max: self.limits.entry_acceleration_max,
                ..self.limits
            },
            self.options.reversed(),
        )
    }

    /// Lowest location reached and the time it is reached.
    pub fn lower_bound(&self) -> (f64, f64) {
        self.bound0
    }

    /// Highest location reached and the time it is reached.
    pub fn upper_bound(&self) -> (f64, f64) {
        self.bound1
    }

    pub fn is_constant_acceleration(&self) -> bool {
        self.limits.jerk_max == 0.0 || self.limits.jerk_max.is_infinite()
    }

    fn momentary(&self, time: f64, f0: f64, f7: f64, f: impl Fn(usize, f64) -> f64) -> f64 {
        if time <= 0.0 {
            return f0;
        }
        if time >= self.time {
            return f7;
        }
        let mut ts = time;
        for i in 1..=SEGMENTS {
            if ts <= self.t[i] {
                return f(i, ts);
            }
            ts -= self.t[i];
        }
        f7
    }

    pub fn momentary_location(&self, time: f64) -> f64 {
        self.momentary(time, self.s[0], self.s[SEGMENTS], |i, ts| {
            self.s[i - 1]
                + self.v[i - 1] * ts
                + 0.5 * self.a[i - 1] * ts.powi(2)
                + 1.0 / 6.0 * self.j[i - 1] * ts.powi(3)
        })
    }

    pub fn momentary_velocity(&self, time: f64) -> f64 {
        self.momentary(time, self.v[0], self.v[SEGMENTS], |i, ts| {
            self.v[i - 1] + self.a[i - 1] * ts + 0.5 * self.j[i - 1] * ts.powi(2)
        })
    }

    pub fn momentary_acceleration(&self, time: f64) -> f64 {
        self.momentary(time, self.a[0], self.a[SEGMENTS], |i, ts| {
            self.a[i - 1] + self.j[i - 1] * ts
        })
    }

    pub fn momentary_jerk(&self, time: f64) -> f64 {
        self.momentary(time, 0.0, 0.0, |i, _| self.j[i - 1])
    }

    fn mismatch(a: f64, b: f64) -> bool {
        (a - b).abs() > EPS
    }

    /// Re-derive continuity and limits from the solved segments. Returns the
    /// most severe violation, or `None` for a physically valid profile.
    pub fn check_validity(&self) -> Option<ErrorState> {
        let (s, v, a, j, t) = (&self.s, &self.v, &self.a, &self.j, &self.t);
        let limits = &self.limits;
        if self.boundary_mismatch() {
            return Some(ErrorState::BoundaryMismatch);
        }
        let mut t_sum = 0.0;
        for i in 0..=SEGMENTS {
            if !(t[i].is_finite()
                && s[i].is_finite()
                && v[i].is_finite()
                && a[i].is_finite()
                && j[i].is_finite())
            {
                return Some(ErrorState::SolutionNotFinite);
            }
            if i == 0 {
                if t[i] != 0.0 {
                    return Some(ErrorState::NegativeSegmentTime);
                }
                continue;
            }
            if t[i] < -EPS {
                return Some(ErrorState::NegativeSegmentTime);
            }
            t_sum += t[i];
            let ti = t[i];
            let s_end = s[i - 1]
                + v[i - 1] * ti
                + 0.5 * a[i - 1] * ti.powi(2)
                + 1.0 / 6.0 * j[i - 1] * ti.powi(3);
            if Self::mismatch(s[i], s_end) {
                return Some(ErrorState::LocationDiscontinuity);
            }
            if Self::mismatch(v[i], v[i - 1] + a[i - 1] * ti + 0.5 * j[i - 1] * ti.powi(2)) {
                return Some(ErrorState::VelocityDiscontinuity);
            }
            if Self::mismatch(a[i], a[i - 1] + j[i - 1] * ti) && !self.is_constant_acceleration() {
                return Some(ErrorState::AccelerationDiscontinuity);
            }
        }
        if Self::mismatch(t_sum, self.time) {
            return Some(ErrorState::TimeSumMismatch);
        }
        if t_sum < limits.time_min - TTOL {
            return Some(ErrorState::MinTimeViolated);
        }
        if t_sum > limits.time_max + EPS {
            return Some(ErrorState::MaxTimeViolated);
        }
        if self.bound0.0 < limits.location_min - EPS {
            return Some(ErrorState::MinLocationViolated);
        }
        if self.bound1.0 > limits.location_max + EPS {
            return Some(ErrorState::MaxLocationViolated);
        }
        for i in 0..=SEGMENTS {
            if i < SEGMENTS && s[i] < limits.location_min - EPS {
                return Some(ErrorState::MinLocationViolated);
            }
            if i < SEGMENTS && s[i] > limits.location_max + EPS {
                return Some(ErrorState::MaxLocationViolated);
            }
            if i < SEGMENTS && v[i].abs() > limits.velocity_max + VTOL {
                return Some(ErrorState::MaxVelocityViolated);
            }
            if i <= SEGMENTS / 2 && a[i].abs() > limits.entry_acceleration_max + ATOL {
                return Some(ErrorState::MaxAccelerationViolated);
            }
            if i > SEGMENTS / 2
                && i < SEGMENTS
                && a[i].abs() > limits.exit_acceleration_max + ATOL
            {
                return Some(ErrorState::MaxAccelerationViolated);
            }
            if j[i].abs() > limits.jerk_max + JTOL {
                return Some(ErrorState::MaxJerkViolated);
            }
        }
        None
    }

    /// Points 0 and 7 differ from the requested entry and exit. Open ends
    /// only keep their location, constant acceleration profiles jump their
    /// boundary acceleration.
    fn boundary_mismatch(&self) -> bool {
        let open_entry = self.options.is_unconstrained_entry();
        let open_exit = self.options.is_unconstrained_exit();
        let constant = self.is_constant_acceleration();
        let (entry, exit) = (&self.entry, &self.exit);
        Self::mismatch(self.s[0], entry.location)
            || Self::mismatch(self.s[SEGMENTS], exit.location)
            || (!open_entry && Self::mismatch(self.v[0], entry.velocity))
            || (!open_exit && Self::mismatch(self.v[SEGMENTS], exit.velocity))
            || (!(open_entry || constant) && Self::mismatch(self.a[0], entry.acceleration))
            || (!(open_exit || constant) && Self::mismatch(self.a[SEGMENTS], exit.acceleration))
    }

    /// Solve with tolerances scaled down for tiny moves.
    pub fn solve(&mut self) {
        let magnitude = EPS.max(
            1.0_f64.min(
                0.01 * ((self.s[0] - self.s[SEGMENTS]).abs()
                    + self.v[0].abs()
                    + self.v[SEGMENTS].abs()
                    + self.a[0].abs()
                    + self.a[SEGMENTS].abs()),
            ),
        );
        self.solve_with(ITERATIONS, VTOL * magnitude.sqrt(), TTOL * magnitude.sqrt());
    }

    pub fn solve_with(&mut self, iterations: usize, vtol: f64, ttol: f64) {
        self.reset_boundaries();
        self.solve_by_velocity(iterations, vtol, ttol);
        self.options = self.options.with_solved();
        tracing::trace!(profile = %self, "solved motion profile");
    }

    /// Solve unless already solved.
    pub fn ensure_solved(&mut self) {
        if !self.is_solved() {
            self.solve();
        }
    }

    /// Follow `lead` at a constant ratio of its displacement. A zero factor
    /// keeps the profile resting for the lead's duration.
    pub(crate) fn follow(&mut self, lead: &MotionProfile, factor: f64) {
        let s0 = self.s[0];
        for i in 0..=SEGMENTS {
            if factor == 0.0 {
                self.t[i] = 0.0;
                self.s[i] = s0;
                self.v[i] = 0.0;
                self.a[i] = 0.0;
                self.j[i] = 0.0;
            } else {
                self.t[i] = lead.t[i];
                self.s[i] = (lead.s[i] - lead.s[0]) * factor + s0;
                self.v[i] = lead.v[i] * factor;
                self.a[i] = lead.a[i] * factor;
                self.j[i] = lead.j[i] * factor;
            }
        }
        if factor == 0.0 {
            self.t[4] = lead.time;
        }
        self.time = lead.time;
        self.limits.time_min = lead.limits.time_min;
        self.compute_bounds();
        self.eval = 0;
        self.options = self.options.with_solved();
    }

    fn solve_by_velocity(&mut self, iterations: usize, vtol: f64, ttol: f64) {
        let time_min = self.limits.time_min;
        let v_max = self.limits.velocity_max;

        // Null move: nothing to do but wait.
        if self.s[0] == self.s[SEGMENTS]
            && self.v[0] == self.v[SEGMENTS]
            && (self.is_constant_acceleration() || self.a[0] == self.a[SEGMENTS])
            && (time_min == 0.0 || (self.v[0] == 0.0 && self.a[0] == 0.0))
        {
            self.j[0] = 0.0;
            for i in 1..=SEGMENTS {
                if i < SEGMENTS {
                    self.s[i] = self.s[0];
                    self.v[i] = self.v[0];
                    self.a[i] = self.a[0];
                }
                self.j[i] = 0.0;
                self.t[i] = 0.0;
            }
            self.t[4] = time_min;
            self.time = time_min;
            self.bound0 = (self.s[0], 0.0);
            self.bound1 = (self.s[0], time_min);
            return;
        }

        let v_eff_entry = self.effective_entry_velocity(self.limits.jerk_max);
        let v_eff_exit = self.effective_exit_velocity(self.limits.jerk_max);
        let signum_travel = self.profile_signum(v_eff_entry, v_eff_exit);

        // Long moves reaching the velocity limit are solved right away.
        self.compute_profile(signum_travel * v_max, v_eff_entry, v_eff_exit, time_min);
        if time_min == 0.0
            && self.t[4] >= 0.0
            && self.v[0] == self.v[SEGMENTS]
            && self.a[0] == 0.0
            && self.a[SEGMENTS] == 0.0
        {
            return;
        }

        let mut best_time = f64::INFINITY;
        let mut best_velocity = f64::NAN;

        // Regions from -vMax to +vMax are split by zero and the effective
        // entry/exit velocities. Solutions beyond vMax are never allowed.
        let clamp = |v: f64| (-v_max).max(v_max.min(v));
        let mut borders = [-v_max, 0.0, v_max, clamp(v_eff_entry), clamp(v_eff_exit)];
        borders.sort_by(f64::total_cmp);
        let mut regions: Vec<(usize, usize)> = Vec::with_capacity(borders.len() - 1);
        let mut border_s = [f64::NAN; 5];
        let mut border_t = [f64::NAN; 5];
        let mut i0 = 0;
        let mut i_vmax = None;
        for i in 1..borders.len() {
            if borders[i0] < borders[i] {
                regions.push((i0, i));
                i0 = i;
                if borders[i] == self.v[4] {
                    i_vmax = Some(i);
                }
            }
        }
        if let Some(i) = i_vmax {
            border_s[i] = self.s[4] - self.s[3];
            border_t[i] = self.time;
        }

        let vttol = ttol.sqrt();
        let stol = ttol;

        // Analytic initial guess from the half profile.
        if time_min == 0.0 && self.s[0] != self.s[SEGMENTS] {
            let mut guess = f64::NAN;
            let (s, v, a, j) = (&self.s, &self.v, &self.a, &self.j);
            if self.is_constant_acceleration() {
                let limits = &self.limits;
                if limits.entry_acceleration_max == limits.exit_acceleration_max {
                    let sd = signum_travel * (s[SEGMENTS] - s[0]);
                    let (a_max, v0, v1) = (limits.entry_acceleration_max, v[0], v[SEGMENTS]);
                    let square = a_max * sd + 0.5 * v0.powi(2) + v0 * v1 - 0.5 * v1.powi(2);
                    guess = signum_travel * square.sqrt();
                }
            } else {
                let options = self.options;
                let half_profile =
                    !(options.is_unconstrained_entry() || options.is_unconstrained_exit());
                let middle = (s[4] + s[3]) * 0.5;
                if self.t[2] > -self.t[4] * 0.25 {
                    // Acceleration segment is long enough.
                    let s3 = (if half_profile { middle } else { s[4] }) - s[1];
                    guess = -1.0 / 6.0
                        * (3.0 * a[1].powi(2)
                            - 2.0
                                * (3.0 * a[1].powi(4)
                                    + 18.0 * a[1] * j[0].powi(2) * s3
                                    + 9.0 * j[0].powi(2) * v[1].powi(2))
                                .sqrt())
                        / j[0];
                } else if self.t[5] > -self.t[4] * 0.25 {
                    // Deceleration segment is long enough.
                    let s4 = s[6] - (if half_profile { middle } else { s[3] });
                    guess = -1.0 / 6.0
                        * (3.0 * a[6].powi(2)
                            - 2.0
                                * (3.0 * a[6].powi(4) - 18.0 * a[6] * j[6].powi(2) * s4
                                    + 9.0 * j[6].powi(2) * v[6].powi(2))
                                .sqrt())
                        / j[6];
                }
            }
            if guess.is_finite() && guess.abs() > 0.0 && guess.abs() <= v_max {
                self.compute_profile(guess, v_eff_entry, v_eff_exit, time_min);
                if self.t[4] >= -ttol && self.t[4] < vttol {
                    return;
                }
            }
        }

        // Border cases are solutions when valid.
        for i in 0..borders.len() {
            if i == 0 || borders[i - 1] < borders[i] {
                let v_peak = borders[i];
                if border_s[i].is_nan() {
                    self.compute_profile(v_peak, v_eff_entry, v_eff_exit, time_min);
                    border_s[i] = self.s[4] - self.s[3];
                    border_t[i] = self.time;
                }
                let sign = signum(v_peak);
                // A displacement at zero velocity is never valid.
                let s_result = if sign == 0.0 {
                    -border_s[i].abs()
                } else {
                    sign * border_s[i]
                };
                let t_result = signed_infinity(border_t[i], s_result);
                if s_result >= -stol
                    && (time_min == 0.0 || t_result >= time_min - ttol)
                    && t_result < best_time
                {
                    best_velocity = v_peak;
                    best_time = t_result;
                }
            }
        }

        // Visit regions in the order most likely to eclipse later ones.
        let order: Vec<usize> = if signum_travel >= 0.0 {
            (0..regions.len()).rev().collect()
        } else {
            (0..regions.len()).collect()
        };
        let search = RegionSearch {
            v_eff_entry,
            v_eff_exit,
            iterations,
            stol,
            vtol,
            ttol,
        };
        for region in order {
            let (b0, b1) = regions[region];
            let v_peak0 = borders[b0];
            let v_peak1 = borders[b1];
            let sign = signum(v_peak0 + v_peak1);

            let s_result0 = sign * border_s[b0];
            let s_result1 = sign * border_s[b1];
            let s_valid0 = s_result0 >= -stol;
            let s_valid1 = s_result1 >= -stol;
            if !(s_valid0 || s_valid1) {
                continue;
            }

            let t_result0 = signed_infinity(border_t[b0], s_result0);
            let t_result1 = signed_infinity(border_t[b1], s_result1);
            let t_valid0 = time_min == 0.0 || t_result0 >= time_min - ttol;
            let t_valid1 = time_min == 0.0 || t_result1 >= time_min - ttol;
            if !(t_valid0 || t_valid1) {
                continue;
            }
            if t_result0.min(t_result1) >= best_time {
                continue;
            }

            let take = |profile: &mut Self, best_time: &mut f64, best_velocity: &mut f64| {
                if profile.time < *best_time {
                    *best_velocity = profile.v[4];
                    *best_time = profile.time;
                }
            };

            if s_valid0
                && s_valid1
                && v_eff_entry.min(v_eff_exit) <= v_peak0
                && v_eff_entry.max(v_eff_exit) >= v_peak1
            {
                // Between the entry and exit velocities the cruise displacement
                // has a basin between two peaks. Look for an invalid point
                // inside the basin to split the region into two monotonic
                // halves, moving towards the higher absolute velocity.
                let mut v_secant = if sign > 0.0 { v_peak0 } else { v_peak1 };
                let mut s_secant = if sign > 0.0 { s_result0 } else { s_result1 };
                let mut v_search = (v_peak0 + v_peak1) * 0.5;
                let mut s_result = f64::NAN;
                let mut t_result = f64::NAN;
                for _ in 0..=iterations {
                    self.compute_profile(v_search, v_eff_entry, v_eff_exit, time_min);
                    s_result = sign * (self.s[4] - self.s[3]);
                    t_result = self.time;
                    if s_result < 0.0 || s_result > s_secant {
                        break;
                    }
                    let gradient = (s_result - s_secant) / (v_secant - v_search);
                    if !gradient.is_finite() || gradient.abs() < vttol {
                        // Tangent situations are not supported.
                        break;
                    }
                    let delta = -s_result / gradient;
                    v_secant = v_search;
                    s_secant = s_result;
                    v_search = v_peak0.max(v_peak1.min(v_search + delta));
                }
                if s_result < 0.0 {
                    if self.solve_region(
                        &search,
                        (v_peak0, v_search),
                        (s_result0, s_result),
                        (t_result0, t_result),
                        best_time,
                    ) {
                        t_result = self.time;
                        take(self, &mut best_time, &mut best_velocity);
                    }
                    if self.solve_region(
                        &search,
                        (v_search, v_peak1),
                        (s_result, s_result1),
                        (t_result, t_result1),
                        best_time,
                    ) {
                        take(self, &mut best_time, &mut best_velocity);
                    }
                } else if self.solve_region(
                    &search,
                    (v_peak0, v_peak1),
                    (s_result0, s_result1),
                    (t_result0, t_result1),
                    best_time,
                ) {
                    take(self, &mut best_time, &mut best_velocity);
                }
            } else if self.solve_region(
                &search,
                (v_peak0, v_peak1),
                (s_result0, s_result1),
                (t_result0, t_result1),
                best_time,
            ) {
                take(self, &mut best_time, &mut best_velocity);
            }
        }

        if best_velocity != self.v[4] {
            self.compute_profile(best_velocity, v_eff_entry, v_eff_exit, time_min);
        }
        if time_min > 0.0 && time_min != self.time && (self.time / time_min - 1.0).abs() < 0.001 {
            // Stretch a slightly approximated solution into the exact time.
            self.retime(time_min);
        }
    }

    /// Bisect the cruise velocity within one region. Leaves the profile
    /// computed with the solution when returning true.
    fn solve_region(
        &mut self,
        search: &RegionSearch,
        (mut v_peak0, mut v_peak1): (f64, f64),
        (s_result0, s_result1): (f64, f64),
        (t_result0, t_result1): (f64, f64),
        best_time: f64,
    ) -> bool {
        let time_min = self.limits.time_min;
        if t_result0.min(t_result1) >= best_time || best_time == time_min {
            return false;
        }

        let (mut v_secant, sign) = if v_peak0.abs() < v_peak1.abs() {
            (v_peak1, 1.0)
        } else {
            (v_peak0, -1.0)
        };
        let mut v_peak = (v_peak1 + v_peak0) * 0.5;
        let mut converging = 0;
        let mut v_valid = None;
        let s_ascending = s_result0 < s_result1;
        let t_ascending = t_result0 < t_result1;

        for _ in 0..=search.iterations {
            self.compute_profile(v_peak, search.v_eff_entry, search.v_eff_exit, time_min);
            let s_result = sign * (self.s[4] - self.s[3]);
            let t_result = self.time;
            let magnitude = EPS.max(
                1.0_f64.min(
                    0.0001
                        * ((self.s[3] - self.s[0]).abs() + (self.s[SEGMENTS] - self.s[4]).abs()),
                ),
            );
            if (v_peak - v_secant).abs() < magnitude * search.vtol {
                converging += 1;
            } else {
                converging = 0;
            }
            if s_result >= -search.stol && t_result >= time_min - search.ttol {
                if t_result < time_min + search.ttol || converging >= 2 {
                    return true;
                }
                // Valid, but a better one may still turn up.
                v_valid = Some(v_peak);
            } else if converging >= 4 {
                return match v_valid {
                    Some(v_valid) => {
                        self.compute_profile(
                            v_valid,
                            search.v_eff_entry,
                            search.v_eff_exit,
                            time_min,
                        );
                        true
                    }
                    None => false,
                };
            }
            if s_result >= 0.0 {
                // Valid continuity, optimize by time.
                if t_ascending ^ (t_result > time_min) {
                    v_peak0 = v_peak;
                } else {
                    v_peak1 = v_peak;
                }
            } else if s_ascending {
                v_peak0 = v_peak;
            } else {
                v_peak1 = v_peak;
            }
            v_secant = v_peak;
            v_peak = (v_peak0 + v_peak1) * 0.5;
        }
        false
    }

    fn profile_signum(&self, v_eff_entry: f64, v_eff_exit: f64) -> f64 {
        let sign = signum(self.s[SEGMENTS] - self.s[0]);
        if sign == 0.0 && (-v_eff_entry - v_eff_exit).abs() > EPS {
            // Zero displacement: the entry/exit velocity balance decides.
            return signum(-v_eff_entry - v_eff_exit);
        }
        sign
    }

    /// Scale the profile in time to take exactly `new_time`.
    ///
    /// Scaling changes every velocity and acceleration, so only profiles
    /// resting at their constrained ends qualify. Shortening is refused when
    /// the scaled profile would exceed its limits. Returns whether the
    /// profile changed.
    pub fn retime(&mut self, new_time: f64) -> bool {
        if new_time == self.time || !(new_time > 0.0 && self.time > 0.0) {
            return false;
        }
        let resting = |v: f64, a: f64| v == 0.0 && a == 0.0;
        let entry_free = self.options.is_unconstrained_entry() || resting(self.v[0], self.a[0]);
        let exit_free =
            self.options.is_unconstrained_exit() || resting(self.v[SEGMENTS], self.a[SEGMENTS]);
        if !(entry_free && exit_free) {
            return false;
        }
        let v_factor = self.time / new_time;
        let a_factor = v_factor * v_factor;
        let j_factor = a_factor * v_factor;
        if v_factor > 1.0 {
            let limits = &self.limits;
            let exceeded = (0..=SEGMENTS).any(|i| {
                let a_max = if i <= SEGMENTS / 2 {
                    limits.entry_acceleration_max
                } else {
                    limits.exit_acceleration_max
                };
                self.v[i].abs() * v_factor > limits.velocity_max + VTOL
                    || self.a[i].abs() * a_factor > a_max + ATOL
                    || self.j[i].abs() * j_factor > limits.jerk_max + JTOL
            });
            if exceeded {
                return false;
            }
        }
        for i in 0..=SEGMENTS {
            self.t[i] /= v_factor;
            self.v[i] *= v_factor;
            self.a[i] *= a_factor;
            self.j[i] *= j_factor;
        }
        self.time = new_time;
        self.compute_bounds();
        true
    }

    /// Compute all segments for the given cruise velocity.
    fn compute_profile(&mut self, v_peak: f64, v_eff_entry: f64, v_eff_exit: f64, time_min: f64) {
        let mut signum_entry = signum(v_peak - v_eff_entry);
        let mut signum_exit = signum(v_peak - v_eff_exit);
        if signum_entry == 0.0 {
            signum_entry = if signum_exit == 0.0 { 1.0 } else { signum_exit };
        }
        if signum_exit == 0.0 {
            signum_exit = signum_entry;
        }
        let jerk_max = self.limits.jerk_max;
        let unconstrained_entry = self.options.is_unconstrained_entry();
        let unconstrained_exit = self.options.is_unconstrained_exit();
        let (s, v, a, j, t) = (
            &mut self.s,
            &mut self.v,
            &mut self.a,
            &mut self.j,
            &mut self.t,
        );

        if self.limits.jerk_max == 0.0 || self.limits.jerk_max.is_infinite() {
            let a_max_entry = self.limits.entry_acceleration_max;
            let a_max_exit = self.limits.exit_acceleration_max;
            // Acceleration jumps right up, so the entry acceleration changes.
            j[0] = 0.0;
            j[1] = 0.0;
            a[0] = signum_entry * a_max_entry;
            let t_accel_entry = (v_peak - v[0]) / a[0];
            t[1] = t_accel_entry * 0.5;
            v[1] = v[0] + a[0] * t[1];
            s[1] = s[0] + v[0] * t[1] + 0.5 * a[0] * t[1].powi(2);

            t[2] = 0.0;
            j[2] = 0.0;
            a[1] = a[0];
            v[2] = v[1];
            s[2] = s[1];

            t[3] = t_accel_entry * 0.5;
            j[3] = 0.0;
            a[2] = a[1];
            v[3] = v_peak;
            s[3] = s[2] + v[2] * t[3] + 0.5 * a[2] * t[3].powi(2);
            a[3] = 0.0;

            // Reverse exit ramp.
            j[6] = 0.0;
            a[6] = -signum_exit * a_max_exit;
            let t_accel_exit = (v[SEGMENTS] - v_peak) / a[6];
            t[7] = t_accel_exit * 0.5;
            v[6] = v[7] - a[6] * t[7];
            s[6] = s[7] - v[7] * t[7] + 0.5 * a[6] * t[7].powi(2);

            t[6] = 0.0;
            j[5] = 0.0;
            a[5] = a[6];
            v[5] = v[6];
            s[5] = s[6];

            t[5] = t_accel_exit * 0.5;
            j[4] = 0.0;
            a[4] = a[5];
            v[4] = v_peak;
            s[4] = s[5] - v[5] * t[5] + 0.5 * a[4] * t[5].powi(2);
        } else {
            if !unconstrained_entry {
                // Pretend to accelerate from a = 0 by moving the start back or
                // forth in time, then decide whether the entry reaches the
                // acceleration limit or turns into an S-curve.
                let j0 = signum_entry * jerk_max;
                let t0_early = a[0] / j0;
                let v0_early = v[0] - a[0] * t0_early + 0.5 * j0 * t0_early.powi(2);
                let t1 = (0.0_f64).max((v_peak - v0_early) / j0).sqrt();
                let a1 = t1 * j0;
                let a_max_entry = self.limits.entry_acceleration_max.min(a1.abs());

                // Jerk to acceleration, possibly cropped by the early start.
                j[0] = j0;
                t[1] = (0.0_f64).max(signum_entry * a_max_entry / j0 - t0_early);
                a[1] = a[0] + j[0] * t[1];
                s[1] = s[0]
                    + v[0] * t[1]
                    + 0.5 * a[0] * t[1].powi(2)
                    + 1.0 / 6.0 * j[0] * t[1].powi(3);
                v[1] = v[0] + a[0] * t[1] + 0.5 * j[0] * t[1].powi(2);

                // Constant acceleration, looking ahead at the jerk down.
                a[2] = a[1];
                j[1] = 0.0;
                j[2] = -j0;
                t[3] = (0.0 - a[2]) / j[2];
                v[2] = v_peak + 0.5 * j[2] * t[3].powi(2);
                t[2] = if a[2] == 0.0 {
                    0.0
                } else {
                    (v[2] - v[1]) / a[2]
                };
                s[2] = s[1] + v[1] * t[2] + 0.5 * a[1] * t[2].powi(2);

                // Jerk down to cruise.
                v[3] = v_peak;
                a[3] = 0.0;
                s[3] = s[2]
                    + v[2] * t[3]
                    + 0.5 * a[2] * t[3].powi(2)
                    + 1.0 / 6.0 * j[2] * t[3].powi(3);
            }

            j[3] = 0.0;

            if !unconstrained_exit {
                v[4] = v_peak;
                a[4] = 0.0;

                // Pretend to decelerate to a = 0 by moving the end in time.
                let j6 = signum_exit * jerk_max;
                let t7_late = -a[7] / j6;
                let v7_late = v[7] + a[7] * t7_late + 0.5 * j6 * t7_late.powi(2);
                let t6 = (0.0_f64).max((v_peak - v7_late) / j6).sqrt();
                let a6 = -t6 * j6;
                let a_max_exit = self.limits.exit_acceleration_max.min(a6.abs());

                j[4] = -j6;
                j[6] = j6;
                t[7] = (0.0_f64).max(signum_exit * a_max_exit / j[6] - t7_late);
                a[6] = a[7] - j[6] * t[7];

                a[5] = a[6];
                t[5] = a[5] / j[4];
                v[5] = v[4] + 0.5 * j[4] * t[5].powi(2);

                j[5] = 0.0;
                v[6] = v[7] - a[7] * t[7] + 0.5 * j[6] * t[7].powi(2);
                t[6] = if a[6] == 0.0 {
                    0.0
                } else {
                    (v[6] - v[5]) / a[6]
                };

                // Locations are integrated backwards from the end.
                s[6] = s[7]
                    - v[7] * t[7]
                    + 0.5 * a[7] * t[7].powi(2)
                    - 1.0 / 6.0 * j[6] * t[7].powi(3);
                s[5] = s[6] - v[6] * t[6] + 0.5 * a[6] * t[6].powi(2);
                s[4] = s[5]
                    - v[5] * t[5]
                    + 0.5 * a[5] * t[5].powi(2)
                    - 1.0 / 6.0 * j[4] * t[5].powi(3);
            }
        }

        if unconstrained_entry {
            for i in 1..=3 {
                s[i] = s[0];
                v[i] = v[4];
                a[i] = 0.0;
                j[i] = 0.0;
                t[i] = 0.0;
            }
            v[0] = v[4];
            a[0] = 0.0;
            j[0] = 0.0;
        }
        if unconstrained_exit {
            for i in 4..=6 {
                s[i] = s[SEGMENTS];
                v[i] = v[3];
                a[i] = 0.0;
                j[i] = 0.0;
            }
            t[5] = 0.0;
            t[6] = 0.0;
            v[7] = v[3];
            a[7] = 0.0;
            j[7] = 0.0;
            t[7] = 0.0;
        }
        self.compute_time(time_min);
        self.compute_bounds();
        self.eval += 1;
    }

    fn compute_time(&mut self, time_min: f64) {
        let resting = self.v[4] == 0.0 && (self.s[3] - self.s[4]).abs() < EPS;
        self.t[4] = if resting {
            0.0
        } else {
            (self.s[4] - self.s[3]) / self.v[4]
        };
        self.time = self.t.iter().sum();
        if time_min > self.time && resting {
            // Zero velocity profile can absorb the minimum time directly.
            self.t[4] = time_min - self.time;
            self.time = time_min;
        }
    }

    /// Track the extreme locations, including overshoot inside segments.
    fn compute_bounds(&mut self) {
        let (s, v, a, j, t) = (&self.s, &self.v, &self.a, &self.j, &self.t);
        let (mut bound0, mut bound1) = if s[0] <= s[SEGMENTS] {
            ((s[0], 0.0), (s[SEGMENTS], self.time))
        } else {
            ((s[SEGMENTS], self.time), (s[0], 0.0))
        };
        let mut extreme = |s_extreme: f64, time: f64| {
            if s_extreme < bound0.0 {
                bound0 = (s_extreme, time);
            }
            if s_extreme > bound1.0 {
                bound1 = (s_extreme, time);
            }
        };
        let mut t_seg = 0.0;
        for i in 1..=SEGMENTS {
            // Zero crossings of the velocity may be location extremes.
            if j[i - 1] != 0.0 {
                let dt = (a[i - 1].powi(2) - 2.0 * v[i - 1] * j[i - 1]).sqrt();
                for t_cross in [-(a[i - 1] + dt) / j[i - 1], -(a[i - 1] - dt) / j[i - 1]] {
                    if t_cross >= 0.0 && t_cross <= t[i] {
                        extreme(
                            s[i - 1]
                                + v[i - 1] * t_cross
                                + 0.5 * a[i - 1] * t_cross.powi(2)
                                + 1.0 / 6.0 * j[i - 1] * t_cross.powi(3),
                            t_seg + t_cross,
                        );
                    }
                }
            } else if a[i - 1] != 0.0 {
                let t_cross = -v[i - 1] / a[i - 1];
                if t_cross >= 0.0 && t_cross <= t[i] {
                    extreme(
                        s[i - 1] + v[i - 1] * t_cross + 0.5 * a[i - 1] * t_cross.powi(2),
                        t_seg + t_cross,
                    );
                }
            }
            t_seg += t[i];
        }
        self.bound0 = bound0;
        self.bound1 = bound1;
    }

    /// Velocity reached after jerking the entry acceleration to zero.
    pub fn effective_entry_velocity(&self, jerk_max: f64) -> f64 {
        if self.options.is_unconstrained_entry() {
            0.0
        } else if self.is_constant_acceleration() {
            self.entry.velocity
        } else {
            let a0 = self.entry.acceleration;
            let j_entry = (if a0 == 0.0 { 1.0 } else { -signum(a0) }) * jerk_max;
            let t_entry = -a0 / j_entry;
            self.entry.velocity + a0 * t_entry + 0.5 * j_entry * t_entry.powi(2)
        }
    }

    /// Velocity the exit is reached from when jerking from zero acceleration.
    pub fn effective_exit_velocity(&self, jerk_max: f64) -> f64 {
        if self.options.is_unconstrained_exit() {
            0.0
        } else if self.is_constant_acceleration() {
            self.exit.velocity
        } else {
            let a7 = self.exit.acceleration;
            let j_exit = (if a7 == 0.0 { 1.0 } else { signum(a7) }) * jerk_max;
            let t_exit = -a7 / j_exit;
            self.exit.velocity + a7 * t_exit + 0.5 * j_exit * t_exit.powi(2)
        }
    }

    /// First time the profile passes `s_cross`, optionally only searching the
    /// entry half.
    pub fn forward_crossing_time(&self, s_cross: f64, half_profile: bool) -> Option<f64> {
        let mut t_seg = 0.0;
        if half_profile {
            let sign = signum(self.v[4]);
            if sign * s_cross >= sign * self.s[3] {
                return Some(self.t[1..=3].iter().sum());
            }
        }
        let last = if half_profile { 3 } else { SEGMENTS };
        for i in 1..=last {
            if let Some(ts) = self.segment_crossing_time(s_cross, t_seg, i, true) {
                return Some(ts);
            }
            t_seg += self.t[i];
        }
        None
    }

    /// Last time the profile passes `s_cross`, optionally only searching the
    /// exit half.
    pub fn backward_crossing_time(&self, s_cross: f64, half_profile: bool) -> Option<f64> {
        let mut t_seg = self.time;
        if half_profile {
            let sign = signum(self.v[4]);
            if sign * s_cross <= sign * self.s[4] {
                return Some(self.time - self.t[5..=SEGMENTS].iter().sum::<f64>());
            }
        }
        let first = if half_profile { 4 } else { 1 };
        for i in (first..=SEGMENTS).rev() {
            t_seg -= self.t[i];
            if let Some(ts) = self.segment_crossing_time(s_cross, t_seg, i, false) {
                return Some(ts);
            }
        }
        None
    }

    fn segment_crossing_time(
        &self,
        s_cross: f64,
        t_seg: f64,
        i: usize,
        forward: bool,
    ) -> Option<f64> {
        let ti = self.t[i];
        let s0 = self.s[i - 1];
        let v0 = self.v[i - 1];
        let a0 = self.a[i - 1];
        let j = self.j[i - 1];
        let ds = s_cross - s0;

        if (s0 - s_cross).abs() < EPS {
            return Some(if i == 1 { 0.0 } else { t_seg });
        }
        if (self.s[i] - s_cross).abs() < EPS {
            return Some(if i == SEGMENTS { self.time } else { t_seg + ti });
        }
        if j != 0.0 {
            // Velocity roots split the segment into monotonic intervals.
            let s_term = (a0 * a0 - 2.0 * j * v0).sqrt();
            let mut ti1 = 0.0_f64.max(ti.min(-(a0 + s_term) / j));
            let mut ti2 = 0.0_f64.max(ti.min(-(a0 - s_term) / j));
            if ti1 > ti2 {
                std::mem::swap(&mut ti1, &mut ti2);
            }
            let f = |t: f64| -ds + v0 * t + 0.5 * a0 * t.powi(2) + 1.0 / 6.0 * j * t.powi(3);
            let g = |t: f64| v0 + a0 * t + 0.5 * j * t.powi(2);
            let intervals = if forward {
                [(0.0, ti1), (ti1, ti2), (ti2, ti)]
            } else {
                [(ti2, ti), (ti1, ti2), (0.0, ti1)]
            };
            for (x0, x1) in intervals {
                if x0 < x1 {
                    if let Some(ts) = newton_solve(x0, x1, f, g) {
                        return Some(ts + t_seg);
                    }
                }
            }
        } else if a0 != 0.0 {
            let r_term = 2.0 * a0 * ds + v0 * v0;
            if r_term >= 0.0 {
                let s_term = r_term.sqrt();
                let mut ts1 = -(v0 + s_term) / a0;
                let mut ts2 = -(v0 - s_term) / a0;
                if (ts1 > ts2) ^ !forward {
                    std::mem::swap(&mut ts1, &mut ts2);
                }
                if ts1 >= 0.0 && ts1 < ti {
                    return Some(ts1 + t_seg);
                } else if ts2 >= 0.0 && ts2 < ti {
                    return Some(ts2 + t_seg);
                }
            }
        } else if v0 != 0.0 {
            let ts = ds / v0;
            if ts > 0.0 && ts < ti {
                return Some(ts + t_seg);
            }
        }
        None
    }
}

/// Parameters shared by the region searches of one solve.
struct RegionSearch {
    v_eff_entry: f64,
    v_eff_exit: f64,
    iterations: usize,
    stol: f64,
    vtol: f64,
    ttol: f64,
}

/// Infinite times take the sign of the displacement result.
fn signed_infinity(time: f64, s_result: f64) -> f64 {
    if time.is_infinite() {
        if s_result > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        }
    } else {
        time
    }
}

/// Newton root search of `f` (derivative `g`) confined to `[x0, x1]`.
fn newton_solve(x0: f64, x1: f64, f: impl Fn(f64) -> f64, g: impl Fn(f64) -> f64) -> Option<f64> {
    let mut x = (x0 + x1) * 0.5;
    let mut escape_neg = 0;
    let mut escape_pos = 0;
    for _ in 0..ITERATIONS {
        let y = f(x);
        let dydt = g(x);
        if dydt.abs() < VTOL {
            return None;
        }
        let xn = x0.max(x1.min(x - y / dydt));
        if xn <= x0 {
            escape_neg += 1;
            if escape_neg > 1 {
                return None;
            }
            escape_pos = 0;
        } else if xn >= x1 {
            escape_pos += 1;
            if escape_pos > 1 {
                return None;
            }
            escape_neg = 0;
        } else {
            escape_neg = 0;
            escape_pos = 0;
            if y.abs() <= TTOL {
                return Some(xn);
            }
        }
        x = xn;
    }
    Some(x)
}

impl fmt::Display for MotionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = |f: &mut fmt::Formatter<'_>, name: &str, values: &[f64], precision: usize| {
            write!(f, "{name} =")?;
            for value in values {
                write!(f, " {value:.precision$}")?;
            }
            Ok(())
        };
        f.write_str("{")?;
        row(f, "s", &self.s, 2)?;
        row(f, ", V", &self.v, 2)?;
        row(f, ", a", &self.a, 2)?;
        row(f, ", j", &self.j, 2)?;
        row(f, ", t", &self.t, 4)?;
        write!(
            f,
            ", time = {:.6}, tMin = {:.6}s, bounds s@t = {:.2}@{:.4}, {:.2}@{:.4}, eval = {}}}",
            self.time,
            self.limits.time_min,
            self.bound0.0,
            self.bound0.1,
            self.bound1.0,
            self.bound1.1,
            self.eval
        )
    }
}
