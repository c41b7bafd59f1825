//! examples of usage of RustedDAE
/// DAE and stiff IVP examples
pub mod dae_examples;
