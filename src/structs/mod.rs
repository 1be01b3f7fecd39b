pub mod experiment;
pub mod parameters;
