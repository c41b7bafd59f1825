//! Damped-free Newton corrector for one BDF step attempt.
//!
//! The corrector solves r(x) = M * (alpha_0 x + h) - dt * f(x, t_new) = 0
//! with the iteration matrix J_iter = alpha_0 M - dt J, where h collects the
//! history part of the BDF update. Full Newton refactorises J_iter on every
//! iteration, modified Newton only on the first one of the attempt.
use crate::global::{float_type, state_type};
use crate::matrix::sparse_matrix::{SparseMatrix, SparseMatrixError};
use crate::numerical::DAE::common::{DaeRhs, wrms_norm};
use crate::numerical::DAE::jacobian::{JacobianError, JacobianProvider};
use crate::numerical::DAE::options::SolverCounters;
use crate::somelinalg::LUsolver::{LinearSolverError, SparseLU};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum NewtonFailure {
    MaxIterations,
    /// Correction norms grew by more than a factor of two.
    Diverged { iteration: usize },
    NonFinite,
    Jacobian(JacobianError),
    BadMatrix(SparseMatrixError),
    LinearSolver(LinearSolverError),
}

impl fmt::Display for NewtonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NewtonFailure::MaxIterations => {
                write!(f, "newton did not converge within the iteration budget")
            }
            NewtonFailure::Diverged { iteration } => {
                write!(f, "newton corrections grew at iteration {}", iteration)
            }
            NewtonFailure::NonFinite => {
                write!(f, "non-finite evaluation during the newton iteration")
            }
            NewtonFailure::Jacobian(e) => write!(f, "jacobian assembly failed: {}", e),
            NewtonFailure::BadMatrix(e) => {
                write!(f, "malformed matrix in the newton iteration: {}", e)
            }
            NewtonFailure::LinearSolver(e) => write!(f, "linear solver failed: {}", e),
        }
    }
}

impl std::error::Error for NewtonFailure {}

pub struct NewtonOutcome {
    pub x: state_type,
    pub iterations: usize,
}

/// Builds J_iter = alpha_0 * M - dt * J into `j_iter` and returns the RHS
/// evaluations spent on the Jacobian. Non-finite Jacobian values fail the
/// attempt, structural defects are reported as `BadMatrix`.
#[allow(clippy::too_many_arguments)]
pub fn assemble_iteration_matrix(
    rhs: &dyn DaeRhs,
    jacobian: &JacobianProvider,
    mass: &SparseMatrix,
    alpha0: float_type,
    dt: float_type,
    x: &state_type,
    t: float_type,
    jac: &mut SparseMatrix,
    j_iter: &mut SparseMatrix,
) -> Result<usize, NewtonFailure> {
    let evals = jacobian
        .assemble(rhs, x, t, jac)
        .map_err(NewtonFailure::Jacobian)?;
    jac.compress();
    match jac.check(x.len()) {
        Ok(()) => {}
        Err(SparseMatrixError::NonFinite { .. }) => return Err(NewtonFailure::NonFinite),
        Err(e) => return Err(NewtonFailure::BadMatrix(e)),
    }
    j_iter.clear();
    j_iter.axpy(alpha0, mass);
    j_iter.axpy(-dt, jac);
    j_iter.compress();
    Ok(evals)
}

/// Runs the corrector from the predictor value. `alpha` are the BDF weights
/// of the attempt, `hist_term` is sum_{i>=1} alpha_i x_{n+1-i}. Convergence
/// is declared on a small weighted residual or a small correction; both are
/// measured against `weights`.
#[allow(clippy::too_many_arguments)]
pub fn solve_newton_system(
    rhs: &dyn DaeRhs,
    jacobian: &JacobianProvider,
    mass: &SparseMatrix,
    alpha: &[float_type],
    hist_term: &state_type,
    t_new: float_type,
    dt: float_type,
    x_predict: &state_type,
    weights: &state_type,
    newton_tol: float_type,
    max_iter: usize,
    fact_every_iter: bool,
    lu: &mut SparseLU,
    jac: &mut SparseMatrix,
    j_iter: &mut SparseMatrix,
    counters: &mut SolverCounters,
) -> Result<NewtonOutcome, NewtonFailure> {
    let n = x_predict.len();
    let alpha0 = alpha[0];
    let mut x = x_predict.clone_owned();
    let mut f = state_type::zeros(n);
    let mut prev_correction: Option<float_type> = None;

    for iteration in 0..max_iter {
        rhs.rhs(&x, &mut f, t_new);
        counters.rhs_evals += 1;
        if !f.iter().all(|v| v.is_finite()) {
            return Err(NewtonFailure::NonFinite);
        }
        let residual = mass.mul_vec(&(&x * alpha0 + hist_term)) - &f * dt;
        if wrms_norm(&residual, weights) <= newton_tol {
            return Ok(NewtonOutcome {
                x,
                iterations: iteration,
            });
        }

        if iteration == 0 || fact_every_iter {
            let evals = assemble_iteration_matrix(
                rhs, jacobian, mass, alpha0, dt, &x, t_new, jac, j_iter,
            )?;
            counters.rhs_evals += evals;
            counters.jac_evals += 1;
            lu.factorise(j_iter).map_err(NewtonFailure::LinearSolver)?;
        }
        let delta = lu.solve(&(-residual)).map_err(NewtonFailure::LinearSolver)?;
        x += &delta;
        counters.newton_iters += 1;

        let correction = wrms_norm(&delta, weights);
        if let Some(prev) = prev_correction {
            if correction > 2.0 * prev {
                return Err(NewtonFailure::Diverged {
                    iteration: iteration + 1,
                });
            }
        }
        if correction <= newton_tol {
            return Ok(NewtonOutcome {
                x,
                iterations: iteration + 1,
            });
        }
        prev_correction = Some(correction);
    }

    // the budget is spent, but the last correction may still have landed
    rhs.rhs(&x, &mut f, t_new);
    counters.rhs_evals += 1;
    if f.iter().all(|v| v.is_finite()) {
        let residual = mass.mul_vec(&(&x * alpha0 + hist_term)) - &f * dt;
        if wrms_norm(&residual, weights) <= newton_tol {
            return Ok(NewtonOutcome {
                x,
                iterations: max_iter,
            });
        }
    }
    Err(NewtonFailure::MaxIterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_mass(n: usize) -> SparseMatrix {
        let mut m = SparseMatrix::new();
        for k in 0..n {
            m.add(1.0, k, k);
        }
        m.compress();
        m
    }

    #[test]
    fn iteration_matrix_combines_mass_and_jacobian() {
        let rhs = |_x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = 0.0;
            f[1] = 0.0;
        };
        let analytic = |j: &mut SparseMatrix, _x: &state_type, _t: float_type| {
            j.add(-1.0, 0, 0);
            j.add(0.5, 0, 1);
            j.add(2.0, 1, 0);
            j.add(-3.0, 1, 1);
        };
        let provider = JacobianProvider::Analytic(Box::new(analytic));
        // singular mass: only the first row is differential
        let mut mass = SparseMatrix::new();
        mass.add(1.0, 0, 0);
        mass.compress();

        let x = state_type::from_vec(vec![0.0, 0.0]);
        let mut jac = SparseMatrix::new();
        let mut j_iter = SparseMatrix::new();
        let evals = assemble_iteration_matrix(
            &rhs, &provider, &mass, 1.5, 0.1, &x, 0.0, &mut jac, &mut j_iter,
        )
        .unwrap();
        assert_eq!(evals, 0);

        let dense = j_iter.to_dense(2, 2);
        assert_relative_eq!(dense[(0, 0)], 1.5 + 0.1, epsilon = 1.0e-12);
        assert_relative_eq!(dense[(0, 1)], -0.05, epsilon = 1.0e-12);
        assert_relative_eq!(dense[(1, 0)], -0.2, epsilon = 1.0e-12);
        assert_relative_eq!(dense[(1, 1)], 0.3, epsilon = 1.0e-12);
    }

    #[test]
    fn linear_problem_converges_in_one_correction() {
        // x' = -5x, implicit Euler step from x = 1 with dt = 0.1:
        // x_new = 1 / 1.5 = 2/3
        let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = -5.0 * x[0];
        };
        let analytic = |j: &mut SparseMatrix, _x: &state_type, _t: float_type| {
            j.add(-5.0, 0, 0);
        };
        let provider = JacobianProvider::Analytic(Box::new(analytic));
        let mass = identity_mass(1);
        let alpha = [1.0, -1.0];
        let hist = state_type::from_vec(vec![-1.0]);
        let x_predict = state_type::from_vec(vec![1.0]);
        let weights = state_type::from_element(1, 1.0);

        let mut lu = SparseLU::new(1);
        let mut jac = SparseMatrix::new();
        let mut j_iter = SparseMatrix::new();
        let mut counters = SolverCounters::default();
        let out = solve_newton_system(
            &rhs, &provider, &mass, &alpha, &hist, 0.1, 0.1, &x_predict, &weights,
            1.0e-12, 15, true, &mut lu, &mut jac, &mut j_iter, &mut counters,
        )
        .unwrap();
        assert_relative_eq!(out.x[0], 2.0 / 3.0, epsilon = 1.0e-12);
        assert!(out.iterations <= 2);
        assert_eq!(counters.newton_iters, 1);
        assert!(counters.rhs_evals >= 2);
    }

    #[cfg(not(feature = "single"))]
    #[test]
    fn nonlinear_step_with_finite_difference_jacobian() {
        // x' = -x^2 from x = 1, dt = 0.1: root of x - 1 + 0.1 x^2
        let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = -x[0] * x[0];
        };
        let provider = JacobianProvider::FiniteDifference { tol: 1.0e-8 };
        let mass = identity_mass(1);
        let alpha = [1.0, -1.0];
        let hist = state_type::from_vec(vec![-1.0]);
        let x_predict = state_type::from_vec(vec![1.0]);
        let weights = state_type::from_element(1, 1.0);

        let mut lu = SparseLU::new(1);
        let mut jac = SparseMatrix::new();
        let mut j_iter = SparseMatrix::new();
        let mut counters = SolverCounters::default();
        let out = solve_newton_system(
            &rhs, &provider, &mass, &alpha, &hist, 0.1, 0.1, &x_predict, &weights,
            1.0e-12, 15, true, &mut lu, &mut jac, &mut j_iter, &mut counters,
        )
        .unwrap();
        let x = out.x[0];
        assert!((x - 1.0 + 0.1 * x * x).abs() <= 1.0e-10);
        assert!(out.iterations < 6);
        assert!(counters.jac_evals >= 1);
    }

    #[test]
    fn growing_corrections_are_reported_as_divergence() {
        // the claimed jacobian makes the fixed-point map expand by 2.25x
        let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = x[0];
        };
        let wrong = |j: &mut SparseMatrix, _x: &state_type, _t: float_type| {
            j.add(1.2, 0, 0);
        };
        let provider = JacobianProvider::Analytic(Box::new(wrong));
        let mass = identity_mass(1);
        let alpha = [1.0, -1.0];
        let hist = state_type::from_vec(vec![-1.0]);
        let x_predict = state_type::from_vec(vec![1.0]);
        let weights = state_type::from_element(1, 1.0);

        let mut lu = SparseLU::new(1);
        let mut jac = SparseMatrix::new();
        let mut j_iter = SparseMatrix::new();
        let mut counters = SolverCounters::default();
        let result = solve_newton_system(
            &rhs, &provider, &mass, &alpha, &hist, 0.9, 0.9, &x_predict, &weights,
            1.0e-12, 15, false, &mut lu, &mut jac, &mut j_iter, &mut counters,
        );
        assert!(matches!(result, Err(NewtonFailure::Diverged { iteration: 2 })));
    }

    #[test]
    fn non_finite_rhs_fails_the_attempt() {
        let rhs = |_x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = float_type::NAN;
        };
        let provider = JacobianProvider::FiniteDifference { tol: 1.0e-8 };
        let mass = identity_mass(1);
        let alpha = [1.0, -1.0];
        let hist = state_type::from_vec(vec![-1.0]);
        let x_predict = state_type::from_vec(vec![1.0]);
        let weights = state_type::from_element(1, 1.0);

        let mut lu = SparseLU::new(1);
        let mut jac = SparseMatrix::new();
        let mut j_iter = SparseMatrix::new();
        let mut counters = SolverCounters::default();
        let result = solve_newton_system(
            &rhs, &provider, &mass, &alpha, &hist, 0.1, 0.1, &x_predict, &weights,
            1.0e-12, 15, true, &mut lu, &mut jac, &mut j_iter, &mut counters,
        );
        assert!(matches!(result, Err(NewtonFailure::NonFinite)));
        assert_eq!(counters.rhs_evals, 1);
    }
}
