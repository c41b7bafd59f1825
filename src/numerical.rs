/// SOLVER OF STIFF IVP AND SEMI-EXPLICIT DAE SYSTEMS
/// variable-step, variable-order BDF with a sparse Newton corrector
pub mod DAE;
