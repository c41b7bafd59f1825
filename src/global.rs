//! Build-time precision selection. The whole crate computes in `float_type`,
//! which is f64 by default and f32 when the `single` feature is enabled.
use cfg_if::cfg_if;
use nalgebra::DVector;

cfg_if! {
    if #[cfg(feature = "single")] {
        pub type float_type = f32;
        pub const EPSILON: float_type = f32::EPSILON;
    } else {
        pub type float_type = f64;
        pub const EPSILON: float_type = f64::EPSILON;
    }
}

/// State vector of the DAE system.
pub type state_type = DVector<float_type>;

/// Tolerances below this floor are meaningless in the selected precision
/// and get clamped by the options validator. In single precision this
/// lands near 1e-5, in double near 2e-14.
pub const TOL_FLOOR: float_type = 100.0 * EPSILON;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tol_floor_matches_precision() {
        assert!(TOL_FLOOR > 0.0);
        assert!(TOL_FLOOR < 1.0e-4);
        let v: state_type = state_type::zeros(3);
        assert_eq!(v.len(), 3);
    }
}
