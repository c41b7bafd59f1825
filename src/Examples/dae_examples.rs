#![allow(non_snake_case)]
use crate::global::{float_type, state_type};
use crate::matrix::sparse_matrix::SparseMatrix;
use crate::numerical::DAE::DAE_solver::DAEsolver;
use crate::numerical::DAE::mass_matrix::MassMatrixIdentity;
use crate::numerical::DAE::options::{SolverOptions, TimeStepping};

use std::cell::RefCell;
use std::rc::Rc;

pub fn dae_examples(example: usize) {
    match example {
        0 => {
            // circular motion x' = -y, y' = x with an analytic Jacobian,
            // exact solution (cos t, sin t)
            let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
                f[0] = -x[1];
                f[1] = x[0];
            };
            let jac = |j: &mut SparseMatrix, _x: &state_type, _t: float_type| {
                j.add(-1.0, 0, 1);
                j.add(1.0, 1, 0);
            };
            let mut options = SolverOptions::default();
            options.atol = 1e-8 as float_type;
            options.rtol = 1e-8 as float_type;
            options.dt_init = 1e-3 as float_type;
            let mut solver = DAEsolver::new(rhs, MassMatrixIdentity::new(2), options);
            solver.set_jacobian(jac);

            let t_end = 6.283_185_307_179_586 as float_type; // one full turn
            let mut x = state_type::from_vec(vec![1.0, 0.0]);
            let status = solver.solve(&mut x, t_end).unwrap();
            println!("status = {}", status);
            println!("x(2 pi) = {:?}, exact (1, 0)", x);
            println!(
                "radius drift = {:e}",
                (x[0] * x[0] + x[1] * x[1] - 1.0).abs()
            );
            let (t, xs) = solver.get_result();
            println!(
                "recorded {} states, {} columns",
                t.unwrap().len(),
                xs.unwrap().ncols()
            );
        }
        1 => {
            // semi-explicit index-1 system u' = v, 0 = u + v with the
            // singular mass diag(1, 0); u(t) = exp(-t)
            let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
                f[0] = x[1];
                f[1] = x[0] + x[1];
            };
            let mass = |m: &mut SparseMatrix, _t: float_type| {
                m.add(1.0, 0, 0);
            };
            let jac = |j: &mut SparseMatrix, _x: &state_type, _t: float_type| {
                j.add(1.0, 0, 1);
                j.add(1.0, 1, 0);
                j.add(1.0, 1, 1);
            };
            let mut options = SolverOptions::default();
            options.atol = 1e-9 as float_type;
            options.rtol = 1e-9 as float_type;
            let mut solver = DAEsolver::new(rhs, mass, options);
            solver.set_jacobian(jac);

            // consistent initial data: v(0) = -u(0)
            let mut x = state_type::from_vec(vec![1.0, -1.0]);
            let status = solver.solve(&mut x, 2.0 as float_type).unwrap();
            println!("status = {}", status);
            let exact = (-2.0 as float_type).exp();
            println!("u(2) = {:e}, exact = {:e}", x[0], exact);
            println!("constraint residual u + v = {:e}", (x[0] + x[1]).abs());
        }
        2 => {
            // heat equation on an N x N grid with insulated walls, the
            // Jacobian left to the parallel finite-difference fallback;
            // an observer tracks the total heat after every step
            let N: usize = 16;
            let n = N * N;
            let rhs = move |x: &state_type, f: &mut state_type, _t: float_type| {
                for i in 0..N {
                    for j in 0..N {
                        let c = x[i * N + j];
                        let left = if j > 0 { x[i * N + j - 1] } else { c };
                        let right = if j + 1 < N { x[i * N + j + 1] } else { c };
                        let down = if i > 0 { x[(i - 1) * N + j] } else { c };
                        let up = if i + 1 < N { x[(i + 1) * N + j] } else { c };
                        f[i * N + j] = left + right + down + up - 4.0 * c;
                    }
                }
            };
            let mut options = SolverOptions::default();
            options.atol = 1e-8 as float_type;
            options.rtol = 1e-6 as float_type;
            options.dt_init = 1e-3 as float_type;
            options.fact_every_iter = false;
            let mut solver = DAEsolver::new(rhs, MassMatrixIdentity::new(n), options);

            let heat_trace: Rc<RefCell<Vec<float_type>>> = Rc::new(RefCell::new(Vec::new()));
            let trace = Rc::clone(&heat_trace);
            solver.set_observer(move |x: &state_type, _t: float_type| {
                trace.borrow_mut().push(x.sum());
            });

            // hot square in the middle of a cold plate
            let mut x = state_type::zeros(n);
            for i in N / 4..3 * N / 4 {
                for j in N / 4..3 * N / 4 {
                    x[i * N + j] = 1.0;
                }
            }
            let status = solver.solve(&mut x, 5.0 as float_type).unwrap();
            println!("status = {}", status);
            let trace = heat_trace.borrow();
            let first = trace[0];
            let worst = trace
                .iter()
                .map(|s| (s - first).abs())
                .fold(0.0 as float_type, float_type::max);
            println!("total heat = {}, largest drift = {:e}", first, worst);
            let spread = x.max() - x.min();
            println!("temperature spread at t = 5: {:e}", spread);
        }
        3 => {
            // Robertson's chemical kinetics as an index-1 DAE: the third
            // equation is replaced by the conservation law y1 + y2 + y3 = 1
            let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
                f[0] = -0.04 * x[0] + 1.0e4 * x[1] * x[2];
                f[1] = 0.04 * x[0] - 1.0e4 * x[1] * x[2] - 3.0e7 * x[1] * x[1];
                f[2] = x[0] + x[1] + x[2] - 1.0;
            };
            let mass = |m: &mut SparseMatrix, _t: float_type| {
                m.add(1.0, 0, 0);
                m.add(1.0, 1, 1);
            };
            let jac = |j: &mut SparseMatrix, x: &state_type, _t: float_type| {
                j.add(-0.04, 0, 0);
                j.add(1.0e4 * x[2], 0, 1);
                j.add(1.0e4 * x[1], 0, 2);
                j.add(0.04, 1, 0);
                j.add(-1.0e4 * x[2] - 6.0e7 * x[1], 1, 1);
                j.add(-1.0e4 * x[1], 1, 2);
                j.add(1.0, 2, 0);
                j.add(1.0, 2, 1);
                j.add(1.0, 2, 2);
            };
            let mut options = SolverOptions::default();
            options.atol = 1e-10 as float_type;
            options.rtol = 1e-8 as float_type;
            options.dt_init = 1e-6 as float_type;
            options.verbosity = 1;
            let mut solver = DAEsolver::new(rhs, mass, options);
            solver.set_jacobian(jac);
            solver.set_log_file("robertson_log.txt");

            let mut x = state_type::from_vec(vec![1.0, 0.0, 0.0]);
            let status = solver.solve(&mut x, 100.0 as float_type).unwrap();
            println!("status = {}", status);
            println!("y1 = {:e}, y2 = {:e}, y3 = {:e}", x[0], x[1], x[2]);
            println!("sum - 1 = {:e}", (x[0] + x[1] + x[2] - 1.0).abs());
        }
        4 => {
            // scalar decay sampled at prescribed times with solve_to; the
            // integrator lands on every target exactly
            let rhs = |x: &state_type, f: &mut state_type, _t: float_type| {
                f[0] = -x[0];
            };
            let mut options = SolverOptions::default();
            options.atol = 1e-9 as float_type;
            options.rtol = 1e-9 as float_type;
            let mut solver = DAEsolver::new(rhs, MassMatrixIdentity::new(1), options);

            let targets: Vec<float_type> = vec![0.25, 0.5, 1.0, 2.0, 4.0];
            let mut x = state_type::from_vec(vec![1.0]);
            let status = solver.solve_to(&mut x, &targets).unwrap();
            println!("status = {}", status);
            for &target in &targets {
                let idx = solver
                    .t_result()
                    .iter()
                    .position(|&t| t == target)
                    .unwrap();
                let value = solver.x_result()[idx][0];
                println!(
                    "t = {:.2}: x = {:.8}, exact = {:.8}",
                    target,
                    value,
                    (-target).exp()
                );
            }
        }
        5 => {
            // fixed-step implicit Euler through the stability controller:
            // order 1 with all adaptation factors set to one
            let rhs = |x: &state_type, f: &mut state_type, t: float_type| {
                f[0] = -50.0 * (x[0] - t.cos());
            };
            let mut options = SolverOptions::default();
            options.bdf_order = 1;
            options.time_stepping = Some(TimeStepping::Stability);
            options.dt_init = 1e-2 as float_type;
            options.dt_increase_factor = 1.0;
            options.dt_decrease_factor = 1.0;
            let mut solver = DAEsolver::new(rhs, MassMatrixIdentity::new(1), options);

            let mut x = state_type::from_vec(vec![0.0]);
            let status = solver.solve(&mut x, 3.0 as float_type).unwrap();
            println!("status = {}", status);
            println!(
                "accepted {} steps of constant length",
                solver.counters().accepted
            );
            println!("x(3) = {:.6}, forcing cos(3) = {:.6}", x[0], (3.0 as float_type).cos());
        }
        _ => {
            println!("no such example; valid numbers are 0..=5");
        }
    }
}
