//! Sparse LU facade with the three-phase lifecycle the time integrator
//! relies on: symbolic analysis of the pattern, numeric factorisation of the
//! values, then any number of solves against the same factorisation.
//!
//! The symbolic work is cached and reused as long as the sparsity pattern of
//! the incoming matrix stays the same, so a run with a frozen structure pays
//! for the fill-in analysis exactly once.
use crate::global::{float_type, state_type};
use crate::matrix::sparse_matrix::SparseMatrix;
use faer::col::Col;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use std::fmt;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FactorPhase {
    Uninitialised,
    SymbolicReady,
    NumericReady,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinearSolverError {
    Analyse(String),
    Singular(String),
    NotFactorised,
    Dimension { expected: usize, got: usize },
}

impl fmt::Display for LinearSolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverError::Analyse(msg) => write!(f, "symbolic analysis failed: {}", msg),
            LinearSolverError::Singular(msg) => write!(f, "matrix is singular: {}", msg),
            LinearSolverError::NotFactorised => {
                write!(f, "solve called before a successful factorisation")
            }
            LinearSolverError::Dimension { expected, got } => {
                write!(f, "right-hand side has length {}, expected {}", got, expected)
            }
        }
    }
}

impl std::error::Error for LinearSolverError {}

/// Direct sparse solver handle. One instance per integrator; holds the
/// symbolic factorisation keyed by the matrix pattern and the latest
/// numeric LU.
pub struct SparseLU {
    n: usize,
    phase: FactorPhase,
    symbolic: Option<SymbolicLu<usize>>,
    lu: Option<Lu<usize, float_type>>,
    pattern_rows: Vec<usize>,
    pattern_cols: Vec<usize>,
    pub n_analyse: usize,
    pub n_factor: usize,
    pub n_solve: usize,
}

impl SparseLU {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            phase: FactorPhase::Uninitialised,
            symbolic: None,
            lu: None,
            pattern_rows: Vec::new(),
            pattern_cols: Vec::new(),
            n_analyse: 0,
            n_factor: 0,
            n_solve: 0,
        }
    }

    pub fn phase(&self) -> FactorPhase {
        self.phase
    }

    fn pattern_matches(&self, m: &SparseMatrix) -> bool {
        self.pattern_rows == m.i && self.pattern_cols == m.j
    }

    /// Symbolic analysis of the pattern. Idempotent while the pattern of
    /// `m` is unchanged; a different pattern rebuilds the fill-in ordering
    /// and drops the stale numeric factorisation.
    pub fn analyse(&mut self, m: &SparseMatrix) -> Result<(), LinearSolverError> {
        if self.symbolic.is_some() && self.pattern_matches(m) {
            return Ok(());
        }
        let mat = m
            .to_faer(self.n, self.n)
            .map_err(|e| LinearSolverError::Analyse(e.to_string()))?;
        let symbolic = SymbolicLu::try_new(mat.symbolic())
            .map_err(|e| LinearSolverError::Analyse(format!("{:?}", e)))?;
        self.symbolic = Some(symbolic);
        self.pattern_rows = m.i.clone();
        self.pattern_cols = m.j.clone();
        self.lu = None;
        self.phase = FactorPhase::SymbolicReady;
        self.n_analyse += 1;
        Ok(())
    }

    /// Numeric LU of the current values, reusing the symbolic work.
    pub fn factorise(&mut self, m: &SparseMatrix) -> Result<(), LinearSolverError> {
        if self.symbolic.is_none() || !self.pattern_matches(m) {
            self.analyse(m)?;
        }
        let mat = m
            .to_faer(self.n, self.n)
            .map_err(|e| LinearSolverError::Analyse(e.to_string()))?;
        let Some(symbolic) = self.symbolic.clone() else {
            return Err(LinearSolverError::Analyse(
                "symbolic analysis missing".to_string(),
            ));
        };
        let lu = Lu::try_new_with_symbolic(symbolic, mat.as_ref())
            .map_err(|e| LinearSolverError::Singular(format!("{:?}", e)))?;
        self.lu = Some(lu);
        self.phase = FactorPhase::NumericReady;
        self.n_factor += 1;
        Ok(())
    }

    /// Solves A x = b with the latest factorisation. Several right-hand
    /// sides may reuse one factorisation.
    pub fn solve(&mut self, b: &state_type) -> Result<state_type, LinearSolverError> {
        if b.len() != self.n {
            return Err(LinearSolverError::Dimension {
                expected: self.n,
                got: b.len(),
            });
        }
        let lu = self.lu.as_ref().ok_or(LinearSolverError::NotFactorised)?;
        let rhs: Col<float_type> = Col::from_fn(self.n, |k| b[k]);
        let sol = lu.solve(rhs.as_mat());
        let x = state_type::from_iterator(self.n, sol.row_iter().map(|r| r[0]));
        if !x.iter().all(|v| v.is_finite()) {
            return Err(LinearSolverError::Singular(
                "solution contains non-finite values".to_string(),
            ));
        }
        self.n_solve += 1;
        Ok(x)
    }

    pub fn reset(&mut self) {
        self.symbolic = None;
        self.lu = None;
        self.pattern_rows.clear();
        self.pattern_cols.clear();
        self.phase = FactorPhase::Uninitialised;
    }
}
