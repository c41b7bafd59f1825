//! Three-array sparse matrix in coordinate format.
//!
//! The matrix is assembled as a plain list of triples: value `A[k]` sits at
//! row `i[k]`, column `j[k]`. User code fills it in any order, duplicates
//! allowed (they are summed by `compress`). The solver pipeline compresses
//! the triples, validates them with `check` and converts to the column-major
//! form the sparse LU consumes with `to_faer`.
use crate::global::{float_type, state_type};
use faer::sparse::{SparseColMat, Triplet};
use itertools::Itertools;
use nalgebra::DMatrix;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SparseMatrixError {
    LengthMismatch {
        values: usize,
        rows: usize,
        cols: usize,
    },
    IndexOutOfRange {
        element: usize,
        row: usize,
        col: usize,
        size: usize,
    },
    DuplicateEntry {
        row: usize,
        col: usize,
    },
    NonFinite {
        row: usize,
        col: usize,
    },
    Creation(String),
}

impl fmt::Display for SparseMatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparseMatrixError::LengthMismatch { values, rows, cols } => write!(
                f,
                "sparse matrix arrays have different lengths: A = {}, i = {}, j = {}",
                values, rows, cols
            ),
            SparseMatrixError::IndexOutOfRange {
                element,
                row,
                col,
                size,
            } => write!(
                f,
                "element {} at ({}, {}) is outside the {}x{} matrix",
                element, row, col, size, size
            ),
            SparseMatrixError::DuplicateEntry { row, col } => {
                write!(f, "duplicate entry at ({}, {})", row, col)
            }
            SparseMatrixError::NonFinite { row, col } => {
                write!(f, "non-finite value at ({}, {})", row, col)
            }
            SparseMatrixError::Creation(msg) => {
                write!(f, "sparse matrix creation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for SparseMatrixError {}

/// Sparse matrix holder in (value, row, column) format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseMatrix {
    pub A: Vec<float_type>,
    pub i: Vec<usize>,
    pub j: Vec<usize>,
}

impl SparseMatrix {
    pub fn new() -> Self {
        Self {
            A: Vec::new(),
            i: Vec::new(),
            j: Vec::new(),
        }
    }

    /// Reserves memory for `n` elements in all three arrays.
    pub fn reserve(&mut self, n: usize) {
        self.A.reserve(n);
        self.i.reserve(n);
        self.j.reserve(n);
    }

    /// Appends one element. Duplicates are allowed here and summed later.
    pub fn add(&mut self, value: float_type, row: usize, col: usize) {
        self.A.push(value);
        self.i.push(row);
        self.j.push(col);
    }

    pub fn N_elements(&self) -> usize {
        self.A.len()
    }

    pub fn clear(&mut self) {
        self.A.clear();
        self.i.clear();
        self.j.clear();
    }

    /// Strict validation: equal array lengths, indices inside an `n` by `n`
    /// matrix, finite values, no duplicate coordinates. Duplicates are only
    /// legal through the `compress` path.
    pub fn check(&self, n: usize) -> Result<(), SparseMatrixError> {
        if self.A.len() != self.i.len() || self.A.len() != self.j.len() {
            return Err(SparseMatrixError::LengthMismatch {
                values: self.A.len(),
                rows: self.i.len(),
                cols: self.j.len(),
            });
        }
        for k in 0..self.A.len() {
            if self.i[k] >= n || self.j[k] >= n {
                return Err(SparseMatrixError::IndexOutOfRange {
                    element: k,
                    row: self.i[k],
                    col: self.j[k],
                    size: n,
                });
            }
            if !self.A[k].is_finite() {
                return Err(SparseMatrixError::NonFinite {
                    row: self.i[k],
                    col: self.j[k],
                });
            }
        }
        let mut coords: Vec<(usize, usize)> =
            self.i.iter().copied().zip(self.j.iter().copied()).collect();
        coords.sort_unstable();
        for w in coords.windows(2) {
            if w[0] == w[1] {
                return Err(SparseMatrixError::DuplicateEntry {
                    row: w[0].0,
                    col: w[0].1,
                });
            }
        }
        Ok(())
    }

    /// Sorts the triples row-major and sums duplicates. Explicit zeros are
    /// kept: a stored zero is part of the structure.
    pub fn compress(&mut self) {
        let triples: Vec<(usize, usize, float_type)> = self
            .i
            .iter()
            .copied()
            .zip(self.j.iter().copied())
            .zip(self.A.iter().copied())
            .map(|((r, c), v)| (r, c, v))
            .sorted_by_key(|t| (t.0, t.1))
            .collect();
        self.clear();
        for ((r, c), group) in &triples.into_iter().chunk_by(|t| (t.0, t.1)) {
            let sum: float_type = group.map(|t| t.2).sum();
            self.add(sum, r, c);
        }
    }

    /// Multiplies every stored value by `factor`.
    pub fn scale(&mut self, factor: float_type) {
        for v in self.A.iter_mut() {
            *v *= factor;
        }
    }

    /// Merges `other` scaled by `alpha` into self: self <- self + alpha * other.
    /// The result is left uncompressed.
    pub fn axpy(&mut self, alpha: float_type, other: &SparseMatrix) {
        self.reserve(other.N_elements());
        for k in 0..other.N_elements() {
            self.add(alpha * other.A[k], other.i[k], other.j[k]);
        }
    }

    /// Matrix-vector product for a square matrix of the vector's size.
    pub fn mul_vec(&self, v: &state_type) -> state_type {
        let mut out = state_type::zeros(v.len());
        for k in 0..self.A.len() {
            out[self.i[k]] += self.A[k] * v[self.j[k]];
        }
        out
    }

    /// Dense form with duplicates summed, mainly for tests and small checks.
    pub fn to_dense(&self, nrows: usize, ncols: usize) -> DMatrix<float_type> {
        let mut m = DMatrix::zeros(nrows, ncols);
        for k in 0..self.A.len() {
            m[(self.i[k], self.j[k])] += self.A[k];
        }
        m
    }

    /// Column-major sparse form for the linear solver.
    pub fn to_faer(
        &self,
        nrows: usize,
        ncols: usize,
    ) -> Result<SparseColMat<usize, float_type>, SparseMatrixError> {
        let triplets: Vec<Triplet<usize, usize, float_type>> = (0..self.A.len())
            .map(|k| Triplet::new(self.i[k], self.j[k], self.A[k]))
            .collect();
        SparseColMat::try_new_from_triplets(nrows, ncols, triplets.as_slice())
            .map_err(|e| SparseMatrixError::Creation(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;

    #[test]
    fn assembly_and_check() {
        // mass matrix of the circle DAE: diag(1, 0) with the zero stored
        let mut m = SparseMatrix::new();
        m.reserve(2);
        m.add(1.0, 0, 0);
        m.add(0.0, 1, 1);
        assert_eq!(m.N_elements(), 2);
        assert!(m.check(2).is_ok());
        m.clear();
        assert_eq!(m.N_elements(), 0);
    }

    #[test]
    fn check_rejects_out_of_range() {
        let mut m = SparseMatrix::new();
        m.add(1.0, 0, 3);
        match m.check(2) {
            Err(SparseMatrixError::IndexOutOfRange { col, .. }) => assert_eq!(col, 3),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn check_rejects_duplicates_and_nonfinite() {
        let mut m = SparseMatrix::new();
        m.add(1.0, 0, 0);
        m.add(2.0, 0, 0);
        assert!(matches!(
            m.check(2),
            Err(SparseMatrixError::DuplicateEntry { row: 0, col: 0 })
        ));
        let mut m2 = SparseMatrix::new();
        m2.add(float_type::NAN, 1, 1);
        assert!(matches!(
            m2.check(2),
            Err(SparseMatrixError::NonFinite { .. })
        ));
    }

    #[test]
    fn compress_sums_duplicates_and_sorts() {
        let mut m = SparseMatrix::new();
        m.add(1.0, 1, 0);
        m.add(2.5, 0, 0);
        m.add(3.0, 1, 0);
        m.add(-1.0, 0, 1);
        m.compress();
        assert_eq!(m.N_elements(), 3);
        assert!(m.check(2).is_ok());
        assert_eq!(m.i, vec![0, 0, 1]);
        assert_eq!(m.j, vec![0, 1, 0]);
        assert_relative_eq!(m.A[2], 4.0);
    }

    #[test]
    fn compress_matches_dense_reference_on_random_input() {
        let mut rng = rand::rng();
        let n = 8;
        let mut m = SparseMatrix::new();
        let mut dense = DMatrix::<float_type>::zeros(n, n);
        let mut coords = std::collections::HashSet::new();
        for _ in 0..60 {
            let r = rng.random_range(0..n);
            let c = rng.random_range(0..n);
            let v: float_type = rng.random_range(-2.0..2.0);
            m.add(v, r, c);
            dense[(r, c)] += v;
            coords.insert((r, c));
        }
        m.compress();
        assert_eq!(m.N_elements(), coords.len());
        let dense2 = m.to_dense(n, n);
        for r in 0..n {
            for c in 0..n {
                assert_relative_eq!(dense[(r, c)], dense2[(r, c)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn axpy_and_scale_form_iteration_matrix() {
        // alpha0 * M - dt * J against dense arithmetic
        let alpha0 = 1.5;
        let dt = 0.1;
        let mut mass = SparseMatrix::new();
        mass.add(1.0, 0, 0);
        let mut jac = SparseMatrix::new();
        jac.add(0.0, 0, 0);
        jac.add(1.0, 0, 1);
        jac.add(0.8, 1, 0);
        jac.add(-0.6, 1, 1);
        let mut it = mass.clone();
        it.scale(alpha0);
        it.axpy(-dt, &jac);
        it.compress();
        let dense = it.to_dense(2, 2);
        let expected = alpha0 * mass.to_dense(2, 2) - dt * jac.to_dense(2, 2);
        for r in 0..2 {
            for c in 0..2 {
                assert_relative_eq!(dense[(r, c)], expected[(r, c)], epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn mul_vec_matches_dense_product() {
        let mut m = SparseMatrix::new();
        m.add(2.0, 0, 0);
        m.add(-1.0, 0, 1);
        m.add(0.5, 1, 0);
        m.add(1.0, 1, 1);
        m.add(0.25, 1, 1); // duplicate contributes to the sum
        let v = state_type::from_vec(vec![3.0, 4.0]);
        let got = m.mul_vec(&v);
        let expected = m.to_dense(2, 2) * v.clone();
        assert_relative_eq!(got[0], expected[0], epsilon = 1e-14);
        assert_relative_eq!(got[1], expected[1], epsilon = 1e-14);
    }

    #[test]
    fn to_faer_round_trips_values() {
        let mut m = SparseMatrix::new();
        m.add(4.0, 0, 0);
        m.add(1.0, 0, 2);
        m.add(3.0, 1, 1);
        m.add(5.0, 2, 2);
        m.compress();
        let f = m.to_faer(3, 3).unwrap();
        assert_eq!(f.nrows(), 3);
        assert_eq!(f.ncols(), 3);
        assert_relative_eq!(*f.get(0, 2).unwrap_or(&0.0), 1.0);
        assert_relative_eq!(*f.get(1, 1).unwrap_or(&0.0), 3.0);
    }

    #[test]
    fn to_faer_rejects_out_of_range() {
        let mut m = SparseMatrix::new();
        m.add(1.0, 5, 0);
        assert!(matches!(
            m.to_faer(2, 2),
            Err(SparseMatrixError::Creation(_))
        ));
    }
}
