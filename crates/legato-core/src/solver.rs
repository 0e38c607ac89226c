//! Box-constrained truncated-Newton minimiser.
//!
//! Each outer iteration solves the Newton system on the free variables with
//! a truncated conjugate-gradient loop. Hessian-vector products are finite
//! differences of the gradient, so only the objective (and optionally its
//! gradient) is needed. Steps are projected onto the bounds and accepted by
//! an Armijo line search.

use std::cell::Cell;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverStatus {
    Converged,
    MaxFunctionEvaluations,
    LineSearchFailed,
}

/// Scalar function to be minimised.
pub trait Objective {
    fn value(&self, x: &[f64]) -> f64;

    /// Forward-difference gradient unless overridden.
    fn gradient(&self, x: &[f64], fx: f64, gradient: &mut [f64]) {
        let mut near = x.to_vec();
        for i in 0..x.len() {
            let h = FD_STEP * (1.0 + x[i].abs());
            near[i] = x[i] + h;
            gradient[i] = (self.value(&near) - fx) / h;
            near[i] = x[i];
        }
    }

    /// Objective evaluations one gradient costs.
    fn gradient_cost(&self, dimensions: usize) -> usize {
        dimensions
    }
}

const FD_STEP: f64 = 1.49e-8; // sqrt(f64::EPSILON)
// Larger step for gradient differences, which carry the gradient's own noise.
const HV_STEP: f64 = 1e-5;
const ARMIJO: f64 = 1e-4;
const BACKTRACKING: usize = 30;

#[derive(Clone, Debug)]
pub struct Solution {
    pub x: Vec<f64>,
    pub value: f64,
    pub status: SolverStatus,
    pub evaluations: usize,
    pub iterations: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TruncatedNewton {
    pub max_function_evaluations: usize,
    /// Convergence threshold on the projected gradient (infinity norm).
    pub gradient_tolerance: f64,
    /// Convergence threshold on the relative change of the objective.
    pub value_tolerance: f64,
    pub max_cg_iterations: usize,
}

impl Default for TruncatedNewton {
    fn default() -> Self {
        Self {
            max_function_evaluations: 5000,
            gradient_tolerance: 1e-6,
            value_tolerance: 1e-12,
            max_cg_iterations: 50,
        }
    }
}

/// Objective wrapper counting evaluations.
struct Counted<'a, O: Objective> {
    objective: &'a O,
    count: Cell<usize>,
}

impl<O: Objective> Counted<'_, O> {
    fn value(&self, x: &[f64]) -> f64 {
        self.count.set(self.count.get() + 1);
        self.objective.value(x)
    }

    fn gradient(&self, x: &[f64], fx: f64, gradient: &mut [f64]) {
        self.count
            .set(self.count.get() + self.objective.gradient_cost(x.len()));
        self.objective.gradient(x, fx, gradient);
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn project(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for ((x, lo), hi) in x.iter_mut().zip(lower).zip(upper) {
        *x = x.max(*lo).min(*hi);
    }
}

impl TruncatedNewton {
    pub fn new(max_function_evaluations: usize) -> Self {
        Self {
            max_function_evaluations,
            ..Self::default()
        }
    }

    /// Minimise `objective` within `[lower, upper]`, starting at `x0`. The
    /// best point found is returned whatever the status.
    pub fn minimize(
        &self,
        objective: &impl Objective,
        x0: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Solution {
        let n = x0.len();
        debug_assert!(lower.len() == n && upper.len() == n);
        let counted = Counted {
            objective,
            count: Cell::new(0),
        };
        let mut x = x0.to_vec();
        project(&mut x, lower, upper);
        let mut fx = counted.value(&x);
        let mut g = vec![0.0; n];
        counted.gradient(&x, fx, &mut g);

        let mut iterations = 0;
        let status = loop {
            let free: Vec<bool> = (0..n)
                .map(|i| !((x[i] <= lower[i] && g[i] > 0.0) || (x[i] >= upper[i] && g[i] < 0.0)))
                .collect();
            let pg: Vec<f64> = (0..n).map(|i| if free[i] { g[i] } else { 0.0 }).collect();
            if pg.iter().fold(0.0_f64, |m, g| m.max(g.abs())) <= self.gradient_tolerance {
                break SolverStatus::Converged;
            }
            if counted.count.get() >= self.max_function_evaluations {
                break SolverStatus::MaxFunctionEvaluations;
            }
            iterations += 1;

            let newton = self.newton_direction(&counted, &x, &g, &pg, &free);
            let steepest: Vec<f64> = pg.iter().map(|g| -g).collect();
            let mut accepted = None;
            for direction in [newton, steepest] {
                let step = self.line_search(&counted, &x, fx, &g, &direction, lower, upper);
                if let Some(step) = step {
                    accepted = Some(step);
                    break;
                }
            }
            let Some((x_new, f_new)) = accepted else {
                break if counted.count.get() >= self.max_function_evaluations {
                    SolverStatus::MaxFunctionEvaluations
                } else {
                    SolverStatus::LineSearchFailed
                };
            };
            let decrease = fx - f_new;
            x = x_new;
            fx = f_new;
            counted.gradient(&x, fx, &mut g);
            if decrease <= self.value_tolerance * (1.0 + fx.abs()) {
                break SolverStatus::Converged;
            }
        };

        let evaluations = counted.count.get();
        tracing::debug!(?status, value = fx, evaluations, iterations, "truncated newton finished");
        Solution {
            x,
            value: fx,
            status,
            evaluations,
            iterations,
        }
    }

    /// Truncated conjugate-gradient solve of `H d = -g` on the free variables.
    fn newton_direction<O: Objective>(
        &self,
        counted: &Counted<'_, O>,
        x: &[f64],
        g: &[f64],
        pg: &[f64],
        free: &[bool],
    ) -> Vec<f64> {
        let n = x.len();
        let mut d = vec![0.0; n];
        let mut r: Vec<f64> = pg.iter().map(|g| -g).collect();
        let mut p = r.clone();
        let mut rr = dot(&r, &r);
        let g_norm = rr.sqrt();
        let forcing = 0.5_f64.min(g_norm.sqrt()) * g_norm;
        let mut near = vec![0.0; n];
        let mut g_near = vec![0.0; n];
        let x_norm = norm(x);

        for k in 0..self.max_cg_iterations.min(n.max(1)) {
            // Hessian-vector product by gradient differences.
            let p_norm = norm(&p);
            if p_norm == 0.0 {
                break;
            }
            let h = HV_STEP * (1.0 + x_norm) / p_norm;
            for i in 0..n {
                near[i] = x[i] + h * p[i];
            }
            let f_near = counted.value(&near);
            counted.gradient(&near, f_near, &mut g_near);
            let hp: Vec<f64> = (0..n)
                .map(|i| if free[i] { (g_near[i] - g[i]) / h } else { 0.0 })
                .collect();

            let curvature = dot(&p, &hp);
            if curvature <= 0.0 {
                // Negative curvature: fall back to the gradient on the first
                // iteration, else keep what we have.
                if k == 0 {
                    return p;
                }
                break;
            }
            let alpha = rr / curvature;
            for i in 0..n {
                d[i] += alpha * p[i];
                r[i] -= alpha * hp[i];
            }
            let rr_new = dot(&r, &r);
            if rr_new.sqrt() <= forcing {
                break;
            }
            let beta = rr_new / rr;
            for i in 0..n {
                p[i] = r[i] + beta * p[i];
            }
            rr = rr_new;
        }
        d
    }

    /// Projected backtracking line search with the Armijo condition.
    #[allow(clippy::too_many_arguments)]
    fn line_search<O: Objective>(
        &self,
        counted: &Counted<'_, O>,
        x: &[f64],
        fx: f64,
        g: &[f64],
        direction: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Option<(Vec<f64>, f64)> {
        if dot(direction, g) >= 0.0 {
            return None;
        }
        let mut alpha = 1.0;
        let mut candidate = vec![0.0; x.len()];
        for _ in 0..BACKTRACKING {
            for i in 0..x.len() {
                candidate[i] = x[i] + alpha * direction[i];
            }
            project(&mut candidate, lower, upper);
            let step: Vec<f64> = candidate.iter().zip(x).map(|(c, x)| c - x).collect();
            let expected = dot(g, &step);
            if expected < 0.0 {
                let f_candidate = counted.value(&candidate);
                if f_candidate <= fx + ARMIJO * expected {
                    return Some((candidate, f_candidate));
                }
            }
            if counted.count.get() >= self.max_function_evaluations {
                return None;
            }
            alpha *= 0.5;
        }
        None
    }
}
