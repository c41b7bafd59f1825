//! Driver for M(t) dx/dt = f(x, t) with a possibly singular mass matrix.
//!
//! The driver owns the whole stepping loop: BDF history, predictor, Newton
//! corrector, linear solver facade, step/order controller, trajectory
//! recording and the observer hook. A run is one call to `integrate`,
//! `solve` or `solve_to`; every run starts from the caller's state at t0
//! and leaves the last accepted state in the caller's vector, whatever the
//! terminal status was.
use crate::Utils::logger::init_logger;
use crate::global::{float_type, state_type};
use crate::matrix::sparse_matrix::SparseMatrix;
use crate::numerical::DAE::common::{
    DaeError, DaeJacobian, DaeMassMatrix, DaeObserver, DaeRhs, SolverStatus, error_weights,
    wrms_norm,
};
use crate::numerical::DAE::controller::{RejectReason, StepController};
use crate::numerical::DAE::jacobian::JacobianProvider;
use crate::numerical::DAE::newton::{self, NewtonFailure};
use crate::numerical::DAE::options::{SolverCounters, SolverOptions, TimeStepping};
use crate::numerical::DAE::time_scheme::TimeScheme;
use crate::somelinalg::LUsolver::SparseLU;
use log::{debug, error, info, warn};
use nalgebra::DMatrix;
use std::time::Instant;

enum StepOutcome {
    Accepted {
        x_new: state_type,
        order: usize,
        newton_iters: usize,
        error_norm: Option<float_type>,
    },
    Rejected(RejectReason),
}

pub struct DAEsolver {
    rhs: Box<dyn DaeRhs>,
    mass_source: Box<dyn DaeMassMatrix>,
    jacobian: JacobianProvider,
    observer: Option<Box<dyn DaeObserver>>,
    pub options: SolverOptions,
    log_file: Option<String>,

    t: float_type,
    dt: float_type,
    scheme: TimeScheme,
    controller: StepController,
    lu: SparseLU,
    mass: SparseMatrix,
    jac: SparseMatrix,
    j_iter: SparseMatrix,
    counters: SolverCounters,
    consecutive_newton_failures: usize,
    t_result: Vec<float_type>,
    x_result: Vec<state_type>,
}

impl DAEsolver {
    /// Without `set_jacobian` the corrector falls back to the
    /// forward-difference Jacobian with perturbation scale atol.
    pub fn new(
        rhs: impl DaeRhs + 'static,
        mass: impl DaeMassMatrix + 'static,
        options: SolverOptions,
    ) -> Self {
        Self {
            rhs: Box::new(rhs),
            mass_source: Box::new(mass),
            jacobian: JacobianProvider::FiniteDifference { tol: options.atol },
            observer: None,
            log_file: None,
            t: options.t0,
            dt: options.dt_init,
            scheme: TimeScheme::new(options.bdf_order),
            controller: StepController::from_options(&options),
            lu: SparseLU::new(0),
            mass: SparseMatrix::new(),
            jac: SparseMatrix::new(),
            j_iter: SparseMatrix::new(),
            counters: SolverCounters::default(),
            consecutive_newton_failures: 0,
            t_result: Vec::new(),
            x_result: Vec::new(),
            options,
        }
    }

    pub fn set_jacobian(&mut self, jacobian: impl DaeJacobian + 'static) {
        self.jacobian = JacobianProvider::Analytic(Box::new(jacobian));
    }

    pub fn set_observer(&mut self, observer: impl DaeObserver + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Mirrors log records into the given file when `solve`/`solve_to`
    /// initialise the logger.
    pub fn set_log_file(&mut self, path: impl Into<String>) {
        self.log_file = Some(path.into());
    }

    pub fn counters(&self) -> &SolverCounters {
        &self.counters
    }

    pub fn t_result(&self) -> &[float_type] {
        &self.t_result
    }

    pub fn x_result(&self) -> &[state_type] {
        &self.x_result
    }

    /// Recorded trajectory as (times, states), one row per accepted step,
    /// the initial state included. None before the first run.
    pub fn get_result(&self) -> (Option<state_type>, Option<DMatrix<float_type>>) {
        if self.t_result.is_empty() {
            return (None, None);
        }
        let rows = self.t_result.len();
        let cols = self.x_result[0].len();
        let t = state_type::from_vec(self.t_result.clone());
        let mut xs = DMatrix::zeros(rows, cols);
        for (r, state) in self.x_result.iter().enumerate() {
            for c in 0..cols {
                xs[(r, c)] = state[c];
            }
        }
        (Some(t), Some(xs))
    }

    /// Integrates from t0 to `t_end`. On `Err` the caller's vector is
    /// untouched; on `Ok` it holds the state at the last accepted time.
    pub fn integrate(
        &mut self,
        x: &mut state_type,
        t_end: float_type,
    ) -> Result<SolverStatus, DaeError> {
        if !(t_end > self.options.t0) {
            return Err(DaeError::InvalidOptions(format!(
                "t_end = {:e} must lie beyond t0 = {:e}",
                t_end, self.options.t0
            )));
        }
        self.prepare(x)?;
        self.advance_to(x, t_end)
    }

    /// `integrate` wrapped with logger initialisation and an end-of-run
    /// statistics report.
    pub fn solve(
        &mut self,
        x: &mut state_type,
        t_end: float_type,
    ) -> Result<SolverStatus, DaeError> {
        init_logger(self.options.verbosity, self.log_file.as_deref());
        let started = Instant::now();
        let status = self.integrate(x, t_end)?;
        self.report(status, started);
        Ok(status)
    }

    /// Integrates through every target time in order, landing on each one
    /// exactly. Targets must increase strictly beyond t0.
    pub fn solve_to(
        &mut self,
        x: &mut state_type,
        targets: &[float_type],
    ) -> Result<SolverStatus, DaeError> {
        init_logger(self.options.verbosity, self.log_file.as_deref());
        if targets.is_empty() {
            return Err(DaeError::InvalidOptions(
                "no target times given".to_string(),
            ));
        }
        let mut previous = self.options.t0;
        for &target in targets {
            if !(target > previous) {
                return Err(DaeError::InvalidOptions(format!(
                    "target times must increase strictly beyond t0, got {:e} after {:e}",
                    target, previous
                )));
            }
            previous = target;
        }
        let started = Instant::now();
        self.prepare(x)?;
        let mut status = SolverStatus::Ok;
        for &target in targets {
            status = self.advance_to(x, target)?;
            if !status.is_ok() {
                break;
            }
        }
        self.report(status, started);
        Ok(status)
    }

    fn report(&self, status: SolverStatus, started: Instant) {
        info!("integration finished with status {}", status);
        info!(
            "\n{}",
            self.counters.statistics(
                self.lu.n_analyse,
                self.lu.n_factor,
                self.lu.n_solve,
                started.elapsed().as_millis(),
            )
        );
    }

    /// Validates everything a run depends on and resets the run state.
    /// The caller's vector is only read here.
    fn prepare(&mut self, x: &state_type) -> Result<(), DaeError> {
        self.options.validate()?;
        let n = x.len();
        if n == 0 {
            return Err(DaeError::InvalidOptions("empty state vector".to_string()));
        }
        if !x.iter().all(|v| v.is_finite()) {
            return Err(DaeError::InvalidOptions(
                "initial state contains non-finite values".to_string(),
            ));
        }
        if let JacobianProvider::FiniteDifference { tol } = &mut self.jacobian {
            // validation may have clamped atol
            *tol = self.options.atol;
        }
        self.controller = StepController::from_options(&self.options);
        self.scheme = TimeScheme::new(self.options.bdf_order);
        self.t = self.options.t0;
        self.dt = self.options.dt_init;
        self.scheme.restart(self.t, x);
        self.lu = SparseLU::new(n);
        self.counters.reset();
        self.consecutive_newton_failures = 0;
        self.t_result.clear();
        self.x_result.clear();
        self.t_result.push(self.t);
        self.x_result.push(x.clone_owned());

        self.mass.clear();
        self.mass_source.mass(&mut self.mass, self.t);
        self.mass.compress();
        self.mass.check(n)?;

        let mut f0 = state_type::zeros(n);
        self.rhs.rhs(x, &mut f0, self.t);
        self.counters.rhs_evals += 1;
        if !f0.iter().all(|v| v.is_finite()) {
            return Err(DaeError::JacobianFailure(
                "right-hand side is not finite at the initial state".to_string(),
            ));
        }
        if let Some(observer) = &mut self.observer {
            observer.observe(x, self.t);
        }
        Ok(())
    }

    fn advance_to(
        &mut self,
        x: &mut state_type,
        t_end: float_type,
    ) -> Result<SolverStatus, DaeError> {
        while self.t < t_end {
            if self.counters.accepted >= self.options.max_steps {
                warn!(
                    "step budget of {} exhausted at t = {:.6e}",
                    self.options.max_steps, self.t
                );
                return Ok(SolverStatus::MaxStepsExceeded);
            }
            // stretch the landing step by up to 1% instead of leaving a
            // sliver for one more step
            let (t_new, landing) = if self.t + 1.01 * self.dt >= t_end {
                (t_end, true)
            } else {
                (self.t + self.dt, false)
            };
            let dt_step = t_new - self.t;
            if !(t_new > self.t) {
                // dt no longer moves t at this magnitude
                error!("time step underflow at t = {:.6e}", self.t);
                return Ok(SolverStatus::StepTooSmall);
            }

            match self.attempt_step(t_new, dt_step)? {
                StepOutcome::Accepted {
                    x_new,
                    order,
                    newton_iters,
                    error_norm,
                } => {
                    self.accept_step(x, t_new, dt_step, landing, x_new, order, newton_iters, error_norm);
                }
                StepOutcome::Rejected(reason) => {
                    if let Some(status) = self.reject_step(reason, dt_step) {
                        return Ok(status);
                    }
                }
            }
        }
        Ok(SolverStatus::Ok)
    }

    fn attempt_step(
        &mut self,
        t_new: float_type,
        dt_step: float_type,
    ) -> Result<StepOutcome, DaeError> {
        let order = self.scheme.effective_order();
        let alpha = self.scheme.weights(t_new);
        let n = self.scheme.state(0).len();

        let mut hist = state_type::zeros(n);
        for i in 1..alpha.len() {
            hist.axpy(alpha[i], self.scheme.state(i - 1), 1.0);
        }
        let x_predict = self.scheme.predict(t_new);
        let weights = error_weights(&x_predict, self.options.atol, self.options.rtol);

        // the mass values may move with t, the pattern may not
        self.mass.clear();
        self.mass_source.mass(&mut self.mass, t_new);
        self.mass.compress();
        self.mass.check(n)?;

        let newton_result = newton::solve_newton_system(
            self.rhs.as_ref(),
            &self.jacobian,
            &self.mass,
            &alpha,
            &hist,
            t_new,
            dt_step,
            &x_predict,
            &weights,
            self.options.effective_newton_tol(),
            self.options.max_newton_iter,
            self.options.fact_every_iter,
            &mut self.lu,
            &mut self.jac,
            &mut self.j_iter,
            &mut self.counters,
        );
        let outcome = match newton_result {
            Ok(outcome) => outcome,
            Err(NewtonFailure::BadMatrix(e)) => return Err(DaeError::InvalidMatrix(e)),
            Err(NewtonFailure::LinearSolver(e)) => {
                debug!("step to t = {:.6e} rejected: {}", t_new, e);
                return Ok(StepOutcome::Rejected(RejectReason::LinearSolverFailed));
            }
            Err(e) => {
                debug!("step to t = {:.6e} rejected: {}", t_new, e);
                return Ok(StepOutcome::Rejected(RejectReason::NewtonFailed));
            }
        };

        let error_norm = match self.controller.strategy() {
            TimeStepping::ErrorBased => {
                let scaled = (&outcome.x - &x_predict) / (order as float_type + 1.0);
                let norm = wrms_norm(&scaled, &weights);
                if !norm.is_finite() || norm > 1.0 {
                    debug!(
                        "step to t = {:.6e} rejected: error norm {:.3e} at order {}",
                        t_new, norm, order
                    );
                    return Ok(StepOutcome::Rejected(RejectReason::ErrorTest {
                        error_norm: norm,
                    }));
                }
                Some(norm)
            }
            TimeStepping::Stability => None,
        };

        Ok(StepOutcome::Accepted {
            x_new: outcome.x,
            order,
            newton_iters: outcome.iterations,
            error_norm,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn accept_step(
        &mut self,
        x: &mut state_type,
        t_new: float_type,
        dt_step: float_type,
        landing: bool,
        x_new: state_type,
        order: usize,
        newton_iters: usize,
        error_norm: Option<float_type>,
    ) {
        self.t = t_new;
        *x = x_new;
        self.scheme.push_accepted(t_new, x);
        self.counters.accepted += 1;
        self.consecutive_newton_failures = 0;
        self.t_result.push(t_new);
        self.x_result.push(x.clone_owned());
        if let Some(observer) = &mut self.observer {
            observer.observe(x, t_new);
        }
        debug!(
            "accepted step {} to t = {:.6e} (dt = {:.3e}, order {}, {} newton iterations)",
            self.counters.accepted, t_new, dt_step, order, newton_iters
        );
        if self.counters.accepted % 1000 == 0 {
            info!(
                "progress: {} steps, t = {:.6e}, dt = {:.3e}",
                self.counters.accepted, self.t, self.dt
            );
        }
        if landing {
            // a stretched final step says nothing about the base step
            return;
        }

        let (e_lower, e_higher) = match error_norm {
            Some(_) => self.order_candidates(order, x),
            None => (None, None),
        };
        let advice = self.controller.after_accept(
            self.dt,
            order,
            error_norm,
            newton_iters,
            self.scheme.n_equal_steps(),
            e_lower,
            e_higher,
        );
        if advice.order != order {
            self.scheme.set_order(advice.order);
            self.scheme.reset_equal_steps();
        }
        self.dt = advice.dt;
    }

    /// Weighted error estimates at the neighbouring orders, built from
    /// backward differences of the stored history.
    fn order_candidates(
        &self,
        order: usize,
        x: &state_type,
    ) -> (Option<float_type>, Option<float_type>) {
        let weights = error_weights(x, self.options.atol, self.options.rtol);
        let e_lower = if order > 1 {
            self.scheme
                .backward_difference(order)
                .map(|d| wrms_norm(&(d / order as float_type), &weights))
        } else {
            None
        };
        let e_higher = if order < self.options.bdf_order {
            self.scheme
                .backward_difference(order + 2)
                .map(|d| wrms_norm(&(d / (order as float_type + 2.0)), &weights))
        } else {
            None
        };
        (e_lower, e_higher)
    }

    /// Applies the controller to a rejected step. `Some(status)` ends the
    /// run: the step length already sat at the floor and shrinking further
    /// cannot help.
    fn reject_step(&mut self, reason: RejectReason, dt_step: float_type) -> Option<SolverStatus> {
        self.counters.rejected += 1;
        self.scheme.reset_equal_steps();
        let order = self.scheme.effective_order();

        match reason {
            RejectReason::NewtonFailed | RejectReason::LinearSolverFailed => {
                self.consecutive_newton_failures += 1;
                if self.consecutive_newton_failures >= 2 && self.scheme.order() >= 2 {
                    self.scheme.set_order(self.scheme.order() - 1);
                }
            }
            RejectReason::ErrorTest { .. } => {
                self.consecutive_newton_failures = 0;
            }
        }

        let factor = self.controller.reject_factor(reason, order);
        let dt_new = dt_step * factor;
        let at_floor = dt_step <= self.options.dt_min * (1.0 + 1.0e-12);
        if dt_new < self.options.dt_min {
            if at_floor {
                let status = match reason {
                    RejectReason::ErrorTest { .. } => SolverStatus::StepTooSmall,
                    RejectReason::NewtonFailed => SolverStatus::NewtonFailurePersistent,
                    RejectReason::LinearSolverFailed => SolverStatus::LinearSolverFailure,
                };
                error!(
                    "cannot continue at t = {:.6e}: step floor {:.3e} reached after {} rejections ({})",
                    self.t, self.options.dt_min, self.counters.rejected, status
                );
                return Some(status);
            }
            self.dt = self.options.dt_min;
        } else {
            self.dt = dt_new;
        }
        debug!(
            "rejection {}: dt {:.3e} -> {:.3e}",
            self.counters.rejected, dt_step, self.dt
        );
        None
    }
}
