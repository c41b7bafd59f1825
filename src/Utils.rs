//! different utility modules used throughout the project
/// logger setup shared by the solver entry points
pub mod logger;
