//! Estimate of blended velocities along a sequence of waypoints.
//!
//! Each motion is approximated per axis by [`PIECES`] constant-jerk pieces
//! of equal length. The variables are the motion durations, the location,
//! velocity and acceleration of every waypoint and the piece jerks. The
//! cost is the squared mismatch between the state reached by integrating
//! the jerks and the state of the next waypoint, plus a weight on the total
//! time. Waypoint locations are pinned, fixed waypoints also pin velocity
//! and acceleration to zero.

use crate::{
    axes::{Axes, AxisId},
    error::{Error, Result},
    location::AxesLocation,
    motion::Motion,
    solver::{Objective, SolverStatus, TruncatedNewton},
};

pub const PIECES: usize = 3;

const LOCATION_WEIGHT: f64 = 1.0;
const VELOCITY_WEIGHT: f64 = 1e-2;
const ACCELERATION_WEIGHT: f64 = 1e-4;
const MIN_SEGMENT_TIME: f64 = 1e-3;
/// Jerk bound of constant acceleration axes, relative to their acceleration limit.
const CONSTANT_ACCELERATION_JERK: f64 = 100.0;
const MAX_JERK: f64 = 1e9;

fn remaining(piece: usize) -> f64 {
    (PIECES - 1 - piece) as f64
}

/// Weight of a piece jerk on the exit velocity, over `h²`.
fn velocity_coefficient(piece: usize) -> f64 {
    0.5 + remaining(piece)
}

/// Weight of a piece jerk on the exit location, over `h³`.
fn location_coefficient(piece: usize) -> f64 {
    let r = remaining(piece);
    1.0 / 6.0 + r / 2.0 + r * r / 2.0
}

/// Flattened variable layout and cost function.
struct PathProblem {
    motions: usize,
    axes: usize,
    time_weight: f64,
    /// Internal variables are the physical ones divided by this.
    scale: Vec<f64>,
}

#[derive(Clone, Copy)]
enum State {
    Location = 0,
    Velocity = 1,
    Acceleration = 2,
}

impl PathProblem {
    fn dimensions(&self) -> usize {
        self.motions + (self.motions + 1) * self.axes * 3 + self.motions * self.axes * PIECES
    }

    fn time(&self, motion: usize) -> usize {
        motion
    }

    fn state(&self, waypoint: usize, axis: usize, state: State) -> usize {
        self.motions + (waypoint * self.axes + axis) * 3 + state as usize
    }

    fn jerk(&self, motion: usize, axis: usize, piece: usize) -> usize {
        let states = (self.motions + 1) * self.axes * 3;
        self.motions + states + (motion * self.axes + axis) * PIECES + piece
    }

    fn physical(&self, x: &[f64]) -> Vec<f64> {
        x.iter().zip(&self.scale).map(|(x, s)| x * s).collect()
    }

    /// Cost and, if requested, its gradient in physical variables.
    fn evaluate(&self, y: &[f64], time_weight: f64, mut gradient: Option<&mut [f64]>) -> f64 {
        if let Some(g) = gradient.as_deref_mut() {
            g.fill(0.0);
        }
        let k = PIECES as f64;
        let mut cost = 0.0;
        for m in 0..self.motions {
            let t = y[self.time(m)];
            let h = t / k;
            cost += time_weight * t;
            let mut dt = time_weight;
            for a in 0..self.axes {
                let s0 = y[self.state(m, a, State::Location)];
                let v0 = y[self.state(m, a, State::Velocity)];
                let a0 = y[self.state(m, a, State::Acceleration)];
                let s1 = y[self.state(m + 1, a, State::Location)];
                let v1 = y[self.state(m + 1, a, State::Velocity)];
                let a1 = y[self.state(m + 1, a, State::Acceleration)];
                let (mut sum_j, mut sum_jv, mut sum_js) = (0.0, 0.0, 0.0);
                for p in 0..PIECES {
                    let j = y[self.jerk(m, a, p)];
                    sum_j += j;
                    sum_jv += j * velocity_coefficient(p);
                    sum_js += j * location_coefficient(p);
                }
                let a_end = a0 + h * sum_j;
                let v_end = v0 + k * h * a0 + h * h * sum_jv;
                let s_end = s0 + k * h * v0 + (k * h).powi(2) / 2.0 * a0 + h.powi(3) * sum_js;
                let (rs, rv, ra) = (s_end - s1, v_end - v1, a_end - a1);
                cost += LOCATION_WEIGHT * rs * rs
                    + VELOCITY_WEIGHT * rv * rv
                    + ACCELERATION_WEIGHT * ra * ra;

                let Some(g) = gradient.as_deref_mut() else {
                    continue;
                };
                let (gs, gv, ga) = (
                    2.0 * LOCATION_WEIGHT * rs,
                    2.0 * VELOCITY_WEIGHT * rv,
                    2.0 * ACCELERATION_WEIGHT * ra,
                );
                let ds_dh = k * v0 + k * k * h * a0 + 3.0 * h * h * sum_js;
                let dv_dh = k * a0 + 2.0 * h * sum_jv;
                let da_dh = sum_j;
                dt += (gs * ds_dh + gv * dv_dh + ga * da_dh) / k;

                g[self.state(m, a, State::Location)] += gs;
                g[self.state(m + 1, a, State::Location)] -= gs;
                g[self.state(m, a, State::Velocity)] += gs * k * h + gv;
                g[self.state(m + 1, a, State::Velocity)] -= gv;
                g[self.state(m, a, State::Acceleration)] +=
                    gs * (k * h).powi(2) / 2.0 + gv * k * h + ga;
                g[self.state(m + 1, a, State::Acceleration)] -= ga;
                for p in 0..PIECES {
                    g[self.jerk(m, a, p)] += gs * h.powi(3) * location_coefficient(p)
                        + gv * h * h * velocity_coefficient(p)
                        + ga * h;
                }
            }
            if let Some(g) = gradient.as_deref_mut() {
                g[self.time(m)] += dt;
            }
        }
        cost
    }
}

impl Objective for PathProblem {
    fn value(&self, x: &[f64]) -> f64 {
        self.evaluate(&self.physical(x), self.time_weight, None)
    }

    fn gradient(&self, x: &[f64], _fx: f64, gradient: &mut [f64]) {
        self.evaluate(&self.physical(x), self.time_weight, Some(gradient));
        for (g, s) in gradient.iter_mut().zip(&self.scale) {
            *g *= s;
        }
    }

    fn gradient_cost(&self, _dimensions: usize) -> usize {
        1
    }
}

/// Result of a path optimisation.
#[derive(Clone, Debug)]
pub struct PathSolution {
    /// Estimated duration per motion.
    pub times: Vec<f64>,
    /// Velocity per waypoint, starting with the start location.
    pub velocities: Vec<AxesLocation>,
    pub status: SolverStatus,
    pub value: f64,
    /// Remaining continuity error, without the time weight.
    pub error: f64,
    pub evaluations: usize,
}

impl PathSolution {
    pub fn is_converged(&self) -> bool {
        self.status == SolverStatus::Converged
    }

    /// `SolverNonConvergence` unless the solver converged.
    pub fn check_convergence(&self) -> Result<()> {
        if self.is_converged() {
            Ok(())
        } else {
            Err(Error::SolverNonConvergence {
                status: self.status,
                error: self.error,
            })
        }
    }
}

pub struct PathSolver {
    ids: Vec<AxisId>,
    problem: PathProblem,
    solver: TruncatedNewton,
    x0: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl PathSolver {
    /// Set up the path from `start` through the end locations of `motions`.
    ///
    /// Waypoint `i > 0` is fixed if motion `i - 1` is a fixed waypoint. The
    /// path must begin and end in a fixed waypoint and every motion must
    /// move at least one axis.
    pub fn new(
        axes: &Axes,
        start: &AxesLocation,
        start_fixed: bool,
        motions: &[Motion],
        solver: TruncatedNewton,
        time_weight: f64,
    ) -> Result<Self> {
        let (Some(first), Some(last)) = (motions.first(), motions.last()) else {
            return Err(Error::InfeasibleWaypointSequence("path without motions".into()));
        };
        if !start_fixed {
            return Err(Error::InfeasibleWaypointSequence(
                "path does not begin with a fixed waypoint".into(),
            ));
        }
        if !last.options().is_fixed_waypoint() {
            return Err(Error::InfeasibleWaypointSequence(
                "path does not end with a fixed waypoint".into(),
            ));
        }

        let ids: Vec<AxisId> = first.profiles().keys().cloned().collect();
        let mut waypoints = Vec::with_capacity(motions.len() + 1);
        waypoints.push(start.clone());
        for (i, motion) in motions.iter().enumerate() {
            let location = motion.location();
            if waypoints[i].motion_segment_to(location, axes).is_empty() {
                return Err(Error::InfeasibleWaypointSequence(format!(
                    "motion {i} has no reference vector"
                )));
            }
            waypoints.push(location.clone());
        }
        let mut fixed = vec![true; waypoints.len()];
        for (i, motion) in motions.iter().enumerate() {
            fixed[i + 1] = motion.options().is_fixed_waypoint();
        }

        let mut problem = PathProblem {
            motions: motions.len(),
            axes: ids.len(),
            time_weight,
            scale: Vec::new(),
        };
        let n = problem.dimensions();
        let mut x0 = vec![0.0; n];
        let mut lower = vec![0.0; n];
        let mut upper = vec![0.0; n];
        let mut scale = vec![1.0; n];

        for (m, motion) in motions.iter().enumerate() {
            let baseline = motion.time().max(MIN_SEGMENT_TIME);
            let i = problem.time(m);
            let upper_time = (10.0 * baseline).max(1.0);
            (x0[i], lower[i], upper[i], scale[i]) =
                (baseline, MIN_SEGMENT_TIME, upper_time, baseline);

            let h = baseline / PIECES as f64;
            for (a, axis) in ids.iter().enumerate() {
                let profile = motion
                    .profile(axis)
                    .ok_or_else(|| Error::MissingAxis(axis.clone()))?;
                let limits = profile.limits();
                let mut bound = limits.jerk_max;
                if !(bound.is_finite() && bound > 0.0) {
                    bound = limits.acceleration_max() * CONSTANT_ACCELERATION_JERK;
                }
                let bound = if bound.is_finite() {
                    bound.min(MAX_JERK)
                } else {
                    MAX_JERK
                };
                for p in 0..PIECES {
                    let i = problem.jerk(m, a, p);
                    let t0 = h * p as f64;
                    let a0 = profile.momentary_acceleration(t0);
                    let guess = (profile.momentary_acceleration(t0 + h) - a0) / h;
                    (x0[i], lower[i], upper[i]) = (guess.clamp(-bound, bound), -bound, bound);
                    scale[i] = bound.max(1.0);
                }
            }
        }

        for (w, location) in waypoints.iter().enumerate() {
            for (a, axis) in ids.iter().enumerate() {
                let s = location.get(axis)?;
                let i = problem.state(w, a, State::Location);
                (x0[i], lower[i], upper[i]) = (s, s, s);

                let i = problem.state(w, a, State::Acceleration);
                (x0[i], lower[i], upper[i]) = (0.0, 0.0, 0.0);

                let i = problem.state(w, a, State::Velocity);
                (x0[i], lower[i], upper[i]) = (0.0, 0.0, 0.0);
                if fixed[w] {
                    continue;
                }
                // Blend only where the axis keeps its direction.
                let d_in = s - waypoints[w - 1].get(axis)?;
                let d_out = waypoints[w + 1].get(axis)? - s;
                if d_in * d_out <= 0.0 {
                    continue;
                }
                let velocity = |motion: &Motion| {
                    motion
                        .profile(axis)
                        .map(|p| p.limits().velocity_max)
                        .unwrap_or(0.0)
                };
                let cap = velocity(&motions[w - 1]).min(velocity(&motions[w]));
                if cap.is_finite() && cap > 0.0 {
                    if d_in > 0.0 {
                        upper[i] = cap;
                    } else {
                        lower[i] = -cap;
                    }
                    scale[i] = cap;
                }
            }
        }

        // Work in scaled variables.
        for i in 0..n {
            x0[i] /= scale[i];
            lower[i] /= scale[i];
            upper[i] /= scale[i];
        }
        problem.scale = scale;

        Ok(Self {
            ids,
            problem,
            solver,
            x0,
            lower,
            upper,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.problem.dimensions()
    }

    /// Cost of the starting point.
    pub fn initial_value(&self) -> f64 {
        self.problem.value(&self.x0)
    }

    pub fn solve(&self) -> PathSolution {
        let solution = self.solver.minimize(&self.problem, &self.x0, &self.lower, &self.upper);
        let y = self.problem.physical(&solution.x);
        let error = self.problem.evaluate(&y, 0.0, None).sqrt();
        let times = (0..self.problem.motions).map(|m| y[self.problem.time(m)]).collect();
        let velocities = (0..=self.problem.motions)
            .map(|w| {
                self.ids
                    .iter()
                    .enumerate()
                    .map(|(a, axis)| (axis.clone(), y[self.problem.state(w, a, State::Velocity)]))
                    .collect()
            })
            .collect();
        tracing::debug!(
            status = ?solution.status,
            error,
            evaluations = solution.evaluations,
            "path solved"
        );
        PathSolution {
            times,
            velocities,
            status: solution.status,
            value: solution.value,
            error,
            evaluations: solution.evaluations,
        }
    }
}
