//! Step-size and order control.
//!
//! Two strategies share one interface. `Stability` never looks at the local
//! error: it ramps the order up once per accepted step and resizes the step
//! from the Newton iteration count alone. `ErrorBased` keeps the step so the
//! estimated local error stays near one in the weighted norm and switches to
//! the neighbouring order whose error estimate promises the largest step.
use crate::global::float_type;
use crate::numerical::DAE::options::{SolverOptions, TimeStepping};

pub const SAFETY: float_type = 0.9;
pub const MIN_FACTOR: float_type = 0.2;
pub const MAX_FACTOR: float_type = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Local truncation error above one in the weighted norm.
    ErrorTest { error_norm: float_type },
    NewtonFailed,
    LinearSolverFailed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepAdvice {
    pub dt: float_type,
    pub order: usize,
}

/// Ideal step-scaling factor for an order-k method with local error
/// `error_norm`: SAFETY * error_norm^(-1/(k+1)), clamped. Non-finite error
/// estimates ask for the strongest shrink, a zero estimate for the largest
/// growth.
pub fn error_factor(error_norm: float_type, order: usize) -> float_type {
    if !error_norm.is_finite() {
        return MIN_FACTOR;
    }
    if error_norm <= 0.0 {
        return MAX_FACTOR;
    }
    let exponent = -1.0 / (order as float_type + 1.0);
    (SAFETY * error_norm.powf(exponent)).clamp(MIN_FACTOR, MAX_FACTOR)
}

#[derive(Debug, Clone)]
pub struct StepController {
    strategy: TimeStepping,
    dt_min: float_type,
    dt_max: float_type,
    max_order: usize,
    increase_factor: float_type,
    decrease_factor: float_type,
    increase_threshold: usize,
    decrease_threshold: usize,
}

impl StepController {
    pub fn from_options(options: &SolverOptions) -> Self {
        Self {
            strategy: options.effective_time_stepping(),
            dt_min: options.dt_min,
            dt_max: options.dt_max,
            max_order: options.bdf_order,
            increase_factor: options.dt_increase_factor,
            decrease_factor: options.dt_decrease_factor,
            increase_threshold: options.dt_increase_threshold,
            decrease_threshold: options.dt_decrease_threshold,
        }
    }

    pub fn strategy(&self) -> TimeStepping {
        self.strategy
    }

    /// Step-scaling factor after a rejection, always below one. Newton and
    /// linear-solver failures carry no usable error estimate and halve the
    /// step.
    pub fn reject_factor(&self, reason: RejectReason, order: usize) -> float_type {
        match reason {
            RejectReason::ErrorTest { error_norm } => error_factor(error_norm, order),
            RejectReason::NewtonFailed | RejectReason::LinearSolverFailed => 0.5,
        }
    }

    /// Advice for the next step after an acceptance. `error_norm` is the
    /// estimate at the current order, `e_lower`/`e_higher` at the
    /// neighbouring orders when the history supports them; all three are
    /// ignored by the stability strategy.
    #[allow(clippy::too_many_arguments)]
    pub fn after_accept(
        &self,
        dt: float_type,
        order: usize,
        error_norm: Option<float_type>,
        newton_iters: usize,
        n_equal_steps: usize,
        e_lower: Option<float_type>,
        e_higher: Option<float_type>,
    ) -> StepAdvice {
        match self.strategy {
            TimeStepping::Stability => {
                let next_order = (order + 1).min(self.max_order);
                let dt_next = if newton_iters <= self.increase_threshold {
                    (dt * self.increase_factor).min(self.dt_max)
                } else if newton_iters > self.decrease_threshold {
                    (dt / self.decrease_factor).max(self.dt_min)
                } else {
                    dt
                };
                StepAdvice {
                    dt: dt_next,
                    order: next_order,
                }
            }
            TimeStepping::ErrorBased => {
                // order moves only after k+1 steps of one length, so the
                // difference-based estimates below are meaningful
                if n_equal_steps < order + 1 {
                    return StepAdvice { dt, order };
                }
                let mut best_order = order;
                let mut best_factor = error_factor(error_norm.unwrap_or(0.0), order);
                if order > 1 {
                    if let Some(err) = e_lower {
                        let factor = error_factor(err, order - 1);
                        if factor > best_factor {
                            best_factor = factor;
                            best_order = order - 1;
                        }
                    }
                }
                if order < self.max_order {
                    if let Some(err) = e_higher {
                        let factor = error_factor(err, order + 1);
                        if factor > best_factor {
                            best_factor = factor;
                            best_order = order + 1;
                        }
                    }
                }
                StepAdvice {
                    dt: (dt * best_factor).clamp(self.dt_min, self.dt_max),
                    order: best_order,
                }
            }
        }
    }
}
