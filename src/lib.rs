//! Building blocks for analyzing lymphocyte proliferation assays with the
//! Cyton2 model.
//!
//! The crate reduces raw, ragged, replicate-indexed cell counts into
//! per-condition statistics, fits the ten Cyton2 parameters by multi-start
//! nonlinear least squares, and extrapolates predicted cell counts across
//! time. It is a pure in-memory computation layer: file parsing, job
//! scheduling and persistence belong to the calling application.

pub mod logger;
pub mod model;
pub mod routines;
pub mod structs;

pub mod prelude {
    pub use crate::logger::setup_log;
    pub use crate::model::distribution::DistributionFamily;
    pub use crate::model::{
        Cyton2Model, DensePredictions, ExtrapolationResult, HarvestPredictions, MAX_DIV,
    };
    pub use crate::routines::extrapolation::{extrapolate_condition, get_times};
    pub use crate::routines::fitting::{fit, fit_all, FitResult};
    pub use crate::routines::reduction::{
        compute_total_cells, reduce, sort_cell_generations, PruneEmpty,
    };
    pub use crate::routines::settings::{
        read_settings, FitSettings, LogSettings, ModelSettings, Settings,
    };
    pub use crate::structs::experiment::{
        ExperimentData, HarvestSchedule, RawCellCounts, SingleConditionData,
    };
    pub use crate::structs::parameters::{Bounds, FittableMask, Parameters, PARAMETER_NAMES};
}
