//! Jacobian access for the Newton corrector: either the user's analytic
//! matrix or a forward-difference estimate swept column by column.
use crate::global::{float_type, state_type};
use crate::matrix::sparse_matrix::SparseMatrix;
use crate::numerical::DAE::common::{DaeJacobian, DaeRhs};
use rayon::prelude::*;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianError {
    /// f(x, t) itself came back non-finite.
    NonFiniteBase,
    /// The difference quotient of one column came back non-finite.
    NonFiniteColumn { col: usize },
}

impl fmt::Display for JacobianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JacobianError::NonFiniteBase => {
                write!(f, "right-hand side is not finite at the evaluation point")
            }
            JacobianError::NonFiniteColumn { col } => {
                write!(f, "finite-difference jacobian column {} is not finite", col)
            }
        }
    }
}

impl std::error::Error for JacobianError {}

/// Source of J = df/dx. The finite-difference variant exists so users can
/// start without an analytic Jacobian; it costs n + 1 RHS evaluations per
/// call, so large systems want the analytic route.
pub enum JacobianProvider {
    Analytic(Box<dyn DaeJacobian>),
    /// Forward differences with perturbation eps_j = max(tol, tol * |x_j|).
    FiniteDifference { tol: float_type },
}

impl JacobianProvider {
    pub fn is_analytic(&self) -> bool {
        matches!(self, JacobianProvider::Analytic(_))
    }

    /// Writes J(x, t) into `jac` (uncompressed triples) and returns the
    /// number of RHS evaluations spent.
    pub fn assemble(
        &self,
        rhs: &dyn DaeRhs,
        x: &state_type,
        t: float_type,
        jac: &mut SparseMatrix,
    ) -> Result<usize, JacobianError> {
        jac.clear();
        match self {
            JacobianProvider::Analytic(user) => {
                user.jacobian(jac, x, t);
                Ok(0)
            }
            JacobianProvider::FiniteDifference { tol } => {
                finite_difference(rhs, x, t, *tol, jac)
            }
        }
    }
}

/// Forward-difference sweep. Columns are independent and run in parallel;
/// the result is assembled column-major in index order, so the emitted
/// pattern is dense and identical on every call.
fn finite_difference(
    rhs: &dyn DaeRhs,
    x: &state_type,
    t: float_type,
    tol: float_type,
    jac: &mut SparseMatrix,
) -> Result<usize, JacobianError> {
    let n = x.len();
    let mut f0 = state_type::zeros(n);
    rhs.rhs(x, &mut f0, t);
    if !f0.iter().all(|v| v.is_finite()) {
        return Err(JacobianError::NonFiniteBase);
    }

    let columns: Result<Vec<Vec<float_type>>, JacobianError> = (0..n)
        .into_par_iter()
        .map(|j| {
            let eps = tol.max(tol * x[j].abs());
            let mut x1 = x.clone_owned();
            x1[j] += eps;
            let mut f1 = state_type::zeros(n);
            rhs.rhs(&x1, &mut f1, t);
            let inv = 1.0 / eps;
            let mut col = Vec::with_capacity(n);
            for i in 0..n {
                let d = (f1[i] - f0[i]) * inv;
                if !d.is_finite() {
                    return Err(JacobianError::NonFiniteColumn { col: j });
                }
                col.push(d);
            }
            Ok(col)
        })
        .collect();

    let columns = columns?;
    jac.reserve(n * n);
    for (j, col) in columns.iter().enumerate() {
        for (i, value) in col.iter().enumerate() {
            jac.add(*value, i, j);
        }
    }
    Ok(n + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn polynomial_rhs(x: &state_type, f: &mut state_type, _t: float_type) {
        f[0] = x[0] * x[0] + 2.0 * x[1];
        f[1] = x[0] * x[1] - x[2];
        f[2] = 3.0 * x[2] * x[2];
    }

    #[cfg(not(feature = "single"))]
    #[test]
    fn finite_difference_matches_the_analytic_jacobian() {
        let provider = JacobianProvider::FiniteDifference { tol: 1.0e-8 };
        let x = state_type::from_vec(vec![1.5, -0.5, 2.0]);
        let mut jac = SparseMatrix::new();
        let evals = provider
            .assemble(&polynomial_rhs, &x, 0.0, &mut jac)
            .unwrap();
        assert_eq!(evals, 4);
        jac.compress();
        let dense = jac.to_dense(3, 3);
        let expected = [
            [2.0 * x[0], 2.0, 0.0],
            [x[1], x[0], -1.0],
            [0.0, 0.0, 6.0 * x[2]],
        ];
        for r in 0..3 {
            for c in 0..3 {
                assert_relative_eq!(dense[(r, c)], expected[r][c], epsilon = 1.0e-6);
            }
        }
    }

    #[test]
    fn analytic_provider_passes_triples_through() {
        let analytic = |j: &mut SparseMatrix, x: &state_type, _t: float_type| {
            j.add(2.0 * x[0], 0, 0);
            j.add(1.0, 0, 1);
        };
        let provider = JacobianProvider::Analytic(Box::new(analytic));
        assert!(provider.is_analytic());
        let x = state_type::from_vec(vec![3.0, 1.0]);
        let mut jac = SparseMatrix::new();
        let evals = provider
            .assemble(&polynomial_rhs, &x, 0.0, &mut jac)
            .unwrap();
        assert_eq!(evals, 0);
        assert_eq!(jac.N_elements(), 2);
        assert_relative_eq!(jac.A[0], 6.0);
    }

    #[test]
    fn finite_difference_is_deterministic() {
        let provider = JacobianProvider::FiniteDifference { tol: 1.0e-6 };
        let x = state_type::from_vec(vec![0.3, 0.7, -1.1]);
        let mut a = SparseMatrix::new();
        let mut b = SparseMatrix::new();
        provider.assemble(&polynomial_rhs, &x, 0.0, &mut a).unwrap();
        provider.assemble(&polynomial_rhs, &x, 0.0, &mut b).unwrap();
        assert_eq!(a.A, b.A);
        assert_eq!(a.i, b.i);
        assert_eq!(a.j, b.j);
        // dense pattern in column-major order
        assert_eq!(a.N_elements(), 9);
        assert_eq!(a.j[0..3], [0, 0, 0]);
    }

    #[test]
    fn non_finite_columns_are_reported() {
        let wall = |x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = if x[1] > 1.0 { float_type::NAN } else { x[0] };
            f[1] = x[1];
        };
        let provider = JacobianProvider::FiniteDifference { tol: 1.0e-6 };
        let x = state_type::from_vec(vec![0.5, 1.0]);
        let mut jac = SparseMatrix::new();
        match provider.assemble(&wall, &x, 0.0, &mut jac) {
            Err(JacobianError::NonFiniteColumn { col }) => assert_eq!(col, 1),
            other => panic!("unexpected result {:?}", other),
        }

        let broken = |_x: &state_type, f: &mut state_type, _t: float_type| {
            f[0] = float_type::INFINITY;
            f[1] = 0.0;
        };
        assert_eq!(
            provider.assemble(&broken, &x, 0.0, &mut jac),
            Err(JacobianError::NonFiniteBase)
        );
    }
}
