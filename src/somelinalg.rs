pub mod LUsolver;
