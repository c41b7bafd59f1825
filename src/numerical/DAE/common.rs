//! Shared pieces of the DAE solver: the capability traits user problems
//! plug into, the weighted norm used by both the Newton corrector and the
//! local error test, and the error/status types every layer reports through.
use crate::global::{float_type, state_type};
use crate::matrix::sparse_matrix::{SparseMatrix, SparseMatrixError};
use std::fmt;
use strum_macros::Display;

/// Right-hand side f(x, t) of the system M * dx/dt = f(x, t).
///
/// Must be deterministic and side-effect free. `Sync` because the
/// finite-difference Jacobian probes the columns in parallel.
pub trait DaeRhs: Sync {
    fn rhs(&self, x: &state_type, f: &mut state_type, t: float_type);
}

impl<F> DaeRhs for F
where
    F: Fn(&state_type, &mut state_type, float_type) + Sync,
{
    fn rhs(&self, x: &state_type, f: &mut state_type, t: float_type) {
        self(x, f, t)
    }
}

/// Fills the mass matrix for time `t`. Values may move with `t`, the
/// sparsity structure must stay the same for the whole run. Rows left
/// empty are algebraic constraint rows.
pub trait DaeMassMatrix {
    fn mass(&self, m: &mut SparseMatrix, t: float_type);
}

impl<F> DaeMassMatrix for F
where
    F: Fn(&mut SparseMatrix, float_type),
{
    fn mass(&self, m: &mut SparseMatrix, t: float_type) {
        self(m, t)
    }
}

/// Analytic Jacobian J = df/dx written as triples. Structure must stay
/// the same across the run so the symbolic factorisation can be reused.
pub trait DaeJacobian {
    fn jacobian(&self, j: &mut SparseMatrix, x: &state_type, t: float_type);
}

impl<F> DaeJacobian for F
where
    F: Fn(&mut SparseMatrix, &state_type, float_type),
{
    fn jacobian(&self, j: &mut SparseMatrix, x: &state_type, t: float_type) {
        self(j, x, t)
    }
}

/// Called with (x, t) after every accepted step, including the initial
/// state. Read-only with respect to the integrator; the observer may
/// accumulate whatever it wants in itself.
pub trait DaeObserver {
    fn observe(&mut self, x: &state_type, t: float_type);
}

impl<F> DaeObserver for F
where
    F: FnMut(&state_type, float_type),
{
    fn observe(&mut self, x: &state_type, t: float_type) {
        self(x, t)
    }
}

/// Per-component error weights w_i = atol + rtol * |x_i|.
pub fn error_weights(x: &state_type, atol: float_type, rtol: float_type) -> state_type {
    state_type::from_iterator(x.len(), x.iter().map(|xi| atol + rtol * xi.abs()))
}

/// Weighted root-mean-square norm: sqrt(1/n * sum((v_i / w_i)^2)).
/// A value of one means the vector sits exactly at the tolerance.
pub fn wrms_norm(v: &state_type, weights: &state_type) -> float_type {
    if v.is_empty() {
        return 0.0;
    }
    let scaled = v.component_div(weights);
    scaled.norm() / (v.len() as float_type).sqrt()
}

/// Setup-level failures: integration never started or cannot start.
#[derive(Debug, Clone, PartialEq)]
pub enum DaeError {
    InvalidOptions(String),
    InvalidMatrix(SparseMatrixError),
    Singular(String),
    JacobianFailure(String),
}

impl fmt::Display for DaeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaeError::InvalidOptions(msg) => write!(f, "invalid solver options: {}", msg),
            DaeError::InvalidMatrix(e) => write!(f, "malformed sparse matrix: {}", e),
            DaeError::Singular(msg) => write!(f, "singular system: {}", msg),
            DaeError::JacobianFailure(msg) => write!(f, "jacobian evaluation failed: {}", msg),
        }
    }
}

impl std::error::Error for DaeError {}

impl From<SparseMatrixError> for DaeError {
    fn from(e: SparseMatrixError) -> Self {
        DaeError::InvalidMatrix(e)
    }
}

/// Terminal outcome of a run that did start stepping. The last accepted
/// state is always left in the caller's vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SolverStatus {
    Ok,
    MaxStepsExceeded,
    StepTooSmall,
    NewtonFailurePersistent,
    LinearSolverFailure,
}

impl SolverStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SolverStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wrms_norm_is_one_at_the_tolerance() {
        let x = state_type::from_vec(vec![1.0, -2.0, 0.5]);
        let w = error_weights(&x, 1.0e-6, 1.0e-3);
        assert_relative_eq!(wrms_norm(&w, &w), 1.0, epsilon = 1.0e-14);
        let zero = state_type::zeros(3);
        assert_relative_eq!(wrms_norm(&zero, &w), 0.0);
    }

    #[test]
    fn error_weights_combine_atol_and_rtol() {
        let x = state_type::from_vec(vec![0.0, -10.0]);
        let w = error_weights(&x, 1.0e-8, 1.0e-2);
        assert_relative_eq!(w[0], 1.0e-8);
        assert_relative_eq!(w[1], 1.0e-8 + 0.1, epsilon = 1.0e-14);
    }

    #[test]
    fn closures_satisfy_the_capability_traits() {
        let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = -x[0];
        };
        let boxed: Box<dyn DaeRhs> = Box::new(rhs);
        let x = state_type::from_vec(vec![3.0]);
        let mut f = state_type::zeros(1);
        boxed.rhs(&x, &mut f, 0.0);
        assert_relative_eq!(f[0], -3.0);

        let mass = |m: &mut SparseMatrix, _t: float_type| {
            m.add(1.0, 0, 0);
        };
        let boxed_mass: Box<dyn DaeMassMatrix> = Box::new(mass);
        let mut m = SparseMatrix::new();
        boxed_mass.mass(&mut m, 0.0);
        assert_eq!(m.N_elements(), 1);

        let mut count = 0usize;
        {
            let mut obs: Box<dyn DaeObserver + '_> = Box::new(|_x: &state_type, _t: float_type| {
                count += 1;
            });
            obs.observe(&x, 0.0);
            obs.observe(&x, 1.0);
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn status_display_and_is_ok() {
        assert!(SolverStatus::Ok.is_ok());
        assert!(!SolverStatus::StepTooSmall.is_ok());
        assert_eq!(SolverStatus::MaxStepsExceeded.to_string(), "MaxStepsExceeded");
    }

    #[test]
    fn dae_error_wraps_matrix_errors() {
        let e = SparseMatrixError::DuplicateEntry { row: 1, col: 2 };
        let wrapped: DaeError = e.clone().into();
        assert_eq!(wrapped, DaeError::InvalidMatrix(e));
        assert!(wrapped.to_string().contains("duplicate"));
    }
}
