// Reduction of raw replicate counts into per-condition statistics
pub mod reduction;
// Multi-start nonlinear least-squares fitting
pub mod fitting;
// Dense-grid and harvest-time prediction
pub mod extrapolation;
// Configuration bundle and TOML reader
pub mod settings;
