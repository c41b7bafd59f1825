//! Ready-made mass matrices for the two most common layouts: a plain ODE
//! system (identity mass) and a fully algebraic system (empty mass).
use crate::global::float_type;
use crate::matrix::sparse_matrix::SparseMatrix;
use crate::numerical::DAE::common::DaeMassMatrix;

/// Identity mass matrix of size n: the system is a plain ODE
/// dx/dt = f(x, t).
pub struct MassMatrixIdentity {
    n: usize,
}

impl MassMatrixIdentity {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl DaeMassMatrix for MassMatrixIdentity {
    fn mass(&self, m: &mut SparseMatrix, _t: float_type) {
        m.reserve(self.n);
        for k in 0..self.n {
            m.add(1.0, k, k);
        }
    }
}

/// Zero mass matrix: every row is algebraic and the solver finds roots of
/// 0 = f(x, t) along the requested time grid.
pub struct MassMatrixZero;

impl DaeMassMatrix for MassMatrixZero {
    fn mass(&self, _m: &mut SparseMatrix, _t: float_type) {}
}
