//! Solver options with validation, and the run counters reported in the
//! statistics table after a solve.
use super::time_scheme::BDF_MAX_ORDER;
use crate::global::{EPSILON, TOL_FLOOR, float_type};
use crate::numerical::DAE::common::DaeError;
use log::warn;
use std::collections::HashMap;
use strum_macros::Display;
use tabled::{builder::Builder, settings::Style};

/// Adaptive time-stepping strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TimeStepping {
    /// Grow/shrink the step from the Newton iteration count alone.
    Stability,
    /// Control the step from the local truncation error estimate and pick
    /// the BDF order that promises the largest next step.
    ErrorBased,
}

#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Absolute tolerance, also the perturbation scale of the
    /// finite-difference Jacobian.
    pub atol: float_type,
    /// Relative tolerance.
    pub rtol: float_type,
    /// Initial time step.
    pub dt_init: float_type,
    /// Controller proposals below this floor terminate the run.
    pub dt_min: float_type,
    /// Upper bound for the time step.
    pub dt_max: float_type,
    /// Integration start time.
    pub t0: float_type,
    /// Highest BDF order the solver may use, 1..=6.
    pub bdf_order: usize,
    /// Newton convergence threshold in the weighted rms metric.
    pub newton_tol: float_type,
    /// Corrections per step attempt before Newton gives up.
    pub max_newton_iter: usize,
    /// Refactorise the iteration matrix on every Newton iteration (full
    /// Newton). `false` factorises once per attempt (modified Newton).
    pub fact_every_iter: bool,
    /// Accepted-step cap for a single run.
    pub max_steps: usize,
    /// Unset picks `ErrorBased` for bdf_order > 1 and `Stability` for
    /// first order.
    pub time_stepping: Option<TimeStepping>,
    /// Stability controller: growth factor when Newton converged fast.
    pub dt_increase_factor: float_type,
    /// Stability controller: shrink divisor when Newton struggled.
    pub dt_decrease_factor: float_type,
    /// Grow the step when Newton needed at most this many iterations.
    pub dt_increase_threshold: usize,
    /// Shrink the step when Newton needed more than this many iterations.
    pub dt_decrease_threshold: usize,
    /// 0 silent, 1 run summaries, 2 and above per-step diagnostics.
    pub verbosity: u8,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            atol: 1.0e-6,
            rtol: 1.0e-6,
            dt_init: 0.01,
            dt_min: 1.0e-10,
            dt_max: 100.0,
            t0: 0.0,
            bdf_order: BDF_MAX_ORDER,
            newton_tol: 1.0e-6,
            max_newton_iter: 15,
            fact_every_iter: true,
            max_steps: 1_000_000,
            time_stepping: None,
            dt_increase_factor: 1.4,
            dt_decrease_factor: 2.0,
            dt_increase_threshold: 2,
            dt_decrease_threshold: 6,
            verbosity: 0,
        }
    }
}

impl SolverOptions {
    /// Checks the option set once before a run. Tolerances below the
    /// precision floor are clamped in place with a warning instead of
    /// failing the run.
    pub fn validate(&mut self) -> Result<(), DaeError> {
        if !(self.atol > 0.0) {
            return Err(DaeError::InvalidOptions(format!(
                "atol must be positive, got {:e}",
                self.atol
            )));
        }
        if !(self.rtol > 0.0) {
            return Err(DaeError::InvalidOptions(format!(
                "rtol must be positive, got {:e}",
                self.rtol
            )));
        }
        if self.atol < TOL_FLOOR {
            warn!(
                "atol = {:e} is below the precision floor, clamping to {:e}",
                self.atol, TOL_FLOOR
            );
            self.atol = TOL_FLOOR;
        }
        if self.rtol < TOL_FLOOR {
            warn!(
                "rtol = {:e} is below the precision floor, clamping to {:e}",
                self.rtol, TOL_FLOOR
            );
            self.rtol = TOL_FLOOR;
        }
        if self.bdf_order < 1 || self.bdf_order > BDF_MAX_ORDER {
            return Err(DaeError::InvalidOptions(format!(
                "bdf_order must be in 1..={}, got {}",
                BDF_MAX_ORDER, self.bdf_order
            )));
        }
        if !(self.dt_min > 0.0) {
            return Err(DaeError::InvalidOptions(format!(
                "dt_min must be positive, got {:e}",
                self.dt_min
            )));
        }
        if !(self.dt_min <= self.dt_init && self.dt_init <= self.dt_max) {
            return Err(DaeError::InvalidOptions(format!(
                "need dt_min <= dt_init <= dt_max, got {:e}, {:e}, {:e}",
                self.dt_min, self.dt_init, self.dt_max
            )));
        }
        if !(self.newton_tol > 0.0) {
            return Err(DaeError::InvalidOptions(format!(
                "newton_tol must be positive, got {:e}",
                self.newton_tol
            )));
        }
        if self.max_newton_iter < 1 {
            return Err(DaeError::InvalidOptions(
                "max_newton_iter must be at least 1".to_string(),
            ));
        }
        if self.max_steps < 1 {
            return Err(DaeError::InvalidOptions(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if !(self.dt_increase_factor >= 1.0) || !(self.dt_decrease_factor >= 1.0) {
            return Err(DaeError::InvalidOptions(format!(
                "step factors must be at least 1, got increase {:e}, decrease {:e}",
                self.dt_increase_factor, self.dt_decrease_factor
            )));
        }
        if self.dt_increase_threshold > self.dt_decrease_threshold {
            return Err(DaeError::InvalidOptions(format!(
                "dt_increase_threshold ({}) must not exceed dt_decrease_threshold ({})",
                self.dt_increase_threshold, self.dt_decrease_threshold
            )));
        }
        Ok(())
    }

    pub fn effective_time_stepping(&self) -> TimeStepping {
        match self.time_stepping {
            Some(strategy) => strategy,
            None => {
                if self.bdf_order > 1 {
                    TimeStepping::ErrorBased
                } else {
                    TimeStepping::Stability
                }
            }
        }
    }

    /// Newton threshold actually used by the corrector. The weighted norm
    /// cannot resolve corrections below roughly eps/rtol, so the user value
    /// is floored there.
    pub fn effective_newton_tol(&self) -> float_type {
        self.newton_tol.max(10.0 * EPSILON / self.rtol)
    }
}

/// Step/evaluation counters of one run. The linear-solver counters live in
/// the facade and are merged into the statistics table by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverCounters {
    pub accepted: usize,
    pub rejected: usize,
    pub newton_iters: usize,
    pub rhs_evals: usize,
    pub jac_evals: usize,
}

impl SolverCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Renders all counters as a table for the end-of-run report.
    pub fn statistics(
        &self,
        n_analyse: usize,
        n_factor: usize,
        n_solve: usize,
        elapsed_ms: u128,
    ) -> String {
        let mut stats: HashMap<String, usize> = HashMap::new();
        stats.insert("steps accepted".to_string(), self.accepted);
        stats.insert("steps rejected".to_string(), self.rejected);
        stats.insert("newton iterations".to_string(), self.newton_iters);
        stats.insert("rhs evaluations".to_string(), self.rhs_evals);
        stats.insert("jacobian evaluations".to_string(), self.jac_evals);
        stats.insert("symbolic analyses".to_string(), n_analyse);
        stats.insert("lu factorisations".to_string(), n_factor);
        stats.insert("linear solves".to_string(), n_solve);
        stats.insert("time elapsed, ms".to_string(), elapsed_ms as usize);
        let mut table = Builder::from(stats).build();
        table.with(Style::modern_rounded());
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::TOL_FLOOR;

    #[test]
    fn defaults_validate() {
        let mut opts = SolverOptions::default();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.effective_time_stepping(), TimeStepping::ErrorBased);
    }

    #[test]
    fn first_order_defaults_to_stability_stepping() {
        let opts = SolverOptions {
            bdf_order: 1,
            ..Default::default()
        };
        assert_eq!(opts.effective_time_stepping(), TimeStepping::Stability);
        let forced = SolverOptions {
            bdf_order: 1,
            time_stepping: Some(TimeStepping::ErrorBased),
            ..Default::default()
        };
        assert_eq!(forced.effective_time_stepping(), TimeStepping::ErrorBased);
    }

    #[test]
    fn bad_options_are_rejected() {
        let mut zero_atol = SolverOptions {
            atol: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            zero_atol.validate(),
            Err(DaeError::InvalidOptions(msg)) if msg.contains("atol")
        ));

        let mut order7 = SolverOptions {
            bdf_order: 7,
            ..Default::default()
        };
        assert!(matches!(
            order7.validate(),
            Err(DaeError::InvalidOptions(msg)) if msg.contains("bdf_order")
        ));

        let mut inverted = SolverOptions {
            dt_init: 1.0e-12,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn tiny_tolerances_are_clamped() {
        let mut opts = SolverOptions {
            atol: TOL_FLOOR / 10.0,
            rtol: TOL_FLOOR / 10.0,
            ..Default::default()
        };
        opts.validate().unwrap();
        assert_eq!(opts.atol, TOL_FLOOR);
        assert_eq!(opts.rtol, TOL_FLOOR);
    }

    #[test]
    fn newton_tol_floor_tracks_rtol() {
        let loose = SolverOptions::default();
        assert_eq!(loose.effective_newton_tol(), loose.newton_tol);
        let tight = SolverOptions {
            rtol: 1.0e-12,
            ..Default::default()
        };
        // at rtol = 1e-12 the floor 10*eps/rtol dominates the default 1e-6
        assert!(tight.effective_newton_tol() > tight.newton_tol);
    }

    #[test]
    fn statistics_table_renders_all_counters() {
        let counters = SolverCounters {
            accepted: 12,
            rejected: 3,
            newton_iters: 40,
            rhs_evals: 90,
            jac_evals: 15,
        };
        let table = counters.statistics(1, 15, 40, 7);
        assert!(table.contains("steps accepted"));
        assert!(table.contains("lu factorisations"));
        assert!(table.contains("12"));
    }
}
