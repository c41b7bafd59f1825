//! Variable-step BDF history and coefficients.
//!
//! The scheme stores the accepted states newest first together with their
//! timestamps. The backward differentiation weights are the derivative
//! weights of the Lagrange polynomial through (t_new, t_n, ..., t_{n+1-k}),
//! scaled by the current step, so non-uniform histories are handled exactly
//! and the classical BDF table reappears on a uniform grid.
use crate::global::{EPSILON, float_type, state_type};

pub const BDF_MAX_ORDER: usize = 6;

#[derive(Debug, Clone)]
struct BdfWeights {
    t_new: float_type,
    order: usize,
    alpha: Vec<float_type>,
}

#[derive(Debug, Clone)]
pub struct TimeScheme {
    order: usize,
    max_order: usize,
    /// Accepted timestamps, newest first.
    times: Vec<float_type>,
    /// Accepted states, same order as `times`.
    states: Vec<state_type>,
    n_equal_steps: usize,
    weights: Option<BdfWeights>,
}

impl TimeScheme {
    pub fn new(max_order: usize) -> Self {
        Self {
            order: 1,
            max_order: max_order.clamp(1, BDF_MAX_ORDER),
            times: Vec::new(),
            states: Vec::new(),
            n_equal_steps: 0,
            weights: None,
        }
    }

    /// Clears the history and seeds it with the initial state. The order
    /// always restarts at one.
    pub fn restart(&mut self, t0: float_type, x0: &state_type) {
        self.order = 1;
        self.times.clear();
        self.states.clear();
        self.times.push(t0);
        self.states.push(x0.clone_owned());
        self.n_equal_steps = 0;
        self.weights = None;
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn set_order(&mut self, order: usize) {
        let clamped = order.clamp(1, self.max_order);
        if clamped != self.order {
            self.order = clamped;
            self.weights = None;
        }
    }

    /// The order actually usable right now: never more past states than
    /// the history holds.
    pub fn effective_order(&self) -> usize {
        self.order.min(self.states.len())
    }

    pub fn history_len(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, i: usize) -> &state_type {
        &self.states[i]
    }

    pub fn last_time(&self) -> float_type {
        if self.times.is_empty() { 0.0 } else { self.times[0] }
    }

    pub fn n_equal_steps(&self) -> usize {
        self.n_equal_steps
    }

    pub fn reset_equal_steps(&mut self) {
        self.n_equal_steps = 0;
    }

    /// BDF weights alpha_0..alpha_k for a step landing on `t_new`, cached
    /// until the target time, the order or the history changes.
    pub fn weights(&mut self, t_new: float_type) -> Vec<float_type> {
        let order = self.effective_order();
        let stale = match &self.weights {
            Some(w) => w.t_new != t_new || w.order != order,
            None => true,
        };
        if stale {
            let alpha = self.compute_weights(t_new, order);
            self.weights = Some(BdfWeights {
                t_new,
                order,
                alpha,
            });
        }
        self.weights
            .as_ref()
            .map(|w| w.alpha.clone())
            .unwrap_or_default()
    }

    /// Derivative weights of the interpolating polynomial at t_new, times
    /// the step t_new - t_n. Exact for polynomials of degree <= k.
    fn compute_weights(&self, t_new: float_type, order: usize) -> Vec<float_type> {
        let k = order;
        let dt = t_new - self.times[0];
        let mut nodes = Vec::with_capacity(k + 1);
        nodes.push(t_new);
        nodes.extend(self.times.iter().take(k).copied());

        let mut alpha = vec![0.0 as float_type; k + 1];
        for m in 1..=k {
            alpha[0] += 1.0 / (nodes[0] - nodes[m]);
        }
        alpha[0] *= dt;
        for i in 1..=k {
            let mut num: float_type = 1.0;
            for m in 1..=k {
                if m != i {
                    num *= nodes[0] - nodes[m];
                }
            }
            let mut den: float_type = 1.0;
            for m in 0..=k {
                if m != i {
                    den *= nodes[i] - nodes[m];
                }
            }
            alpha[i] = dt * num / den;
        }
        alpha
    }

    /// Predictor: Lagrange extrapolation of the newest min(k+1, stored)
    /// states to `t_new`. With a single stored state this is constant
    /// extrapolation, which is what the k = 1 startup step wants.
    pub fn predict(&self, t_new: float_type) -> state_type {
        let p = (self.effective_order() + 1).min(self.states.len());
        let mut out = state_type::zeros(self.states[0].len());
        for i in 0..p {
            let mut li: float_type = 1.0;
            for m in 0..p {
                if m != i {
                    li *= (t_new - self.times[m]) / (self.times[i] - self.times[m]);
                }
            }
            out.axpy(li, &self.states[i], 1.0);
        }
        out
    }

    /// Rotates the accepted state in and maintains the equal-step run
    /// length used to gate order selection.
    pub fn push_accepted(&mut self, t: float_type, x: &state_type) {
        let equal = if self.times.len() >= 2 {
            let h_new = t - self.times[0];
            let h_prev = self.times[0] - self.times[1];
            (h_new - h_prev).abs() <= h_new.abs().max(h_prev.abs()) * (4.0 * EPSILON)
        } else {
            false
        };
        self.n_equal_steps = if equal { self.n_equal_steps + 1 } else { 1 };

        self.times.insert(0, t);
        self.states.insert(0, x.clone_owned());
        let capacity = self.max_order + 3;
        if self.times.len() > capacity {
            self.times.truncate(capacity);
            self.states.truncate(capacity);
        }
        self.weights = None;
    }

    /// m-th backward difference of the stored states, None when the
    /// history is too short. Valid as a derivative estimate only across a
    /// run of equal steps, which the caller guards with `n_equal_steps`.
    pub fn backward_difference(&self, m: usize) -> Option<state_type> {
        if self.states.len() < m + 1 {
            return None;
        }
        let n = self.states[0].len();
        let mut out = state_type::zeros(n);
        let mut binom: float_type = 1.0;
        for j in 0..=m {
            let sign: float_type = if j % 2 == 0 { 1.0 } else { -1.0 };
            out.axpy(sign * binom, &self.states[j], 1.0);
            binom = binom * ((m - j) as float_type) / ((j + 1) as float_type);
        }
        Some(out)
    }
}
