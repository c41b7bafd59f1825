//! Implicit integration of M(t) dx/dt = f(x, t) with a possibly singular
//! sparse mass matrix: variable-step, variable-order BDF(1..6), a Newton
//! corrector on the update equation and a cached sparse LU behind it.
//!
//! The shortest route from a right-hand side to a trajectory:
//!
//! ```
//! use RustedDAE::global::{float_type, state_type};
//! use RustedDAE::numerical::DAE::DAE_solver::DAEsolver;
//! use RustedDAE::numerical::DAE::mass_matrix::MassMatrixIdentity;
//! use RustedDAE::numerical::DAE::options::SolverOptions;
//!
//! let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
//!     f[0] = -x[0];
//! };
//! let mut solver = DAEsolver::new(rhs, MassMatrixIdentity::new(1), SolverOptions::default());
//! let mut x = state_type::from_vec(vec![1.0]);
//! let status = solver.solve(&mut x, 1.0).unwrap();
//! assert!(status.is_ok());
//! assert!((x[0] as f64 - (-1.0f64).exp()).abs() < 1.0e-4);
//! ```
pub mod DAE_solver;
pub mod common;
pub mod controller;
pub mod jacobian;
pub mod mass_matrix;
pub mod newton;
pub mod options;
pub mod time_scheme;
