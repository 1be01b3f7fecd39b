use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Canonical ordering of the ten Cyton2 parameters.
///
/// All index-based access ([Parameters::to_array], [FittableMask::free_indices],
/// the optimizer's free-parameter vector) uses this order.
pub const PARAMETER_NAMES: [&str; 10] = [
    "mUns", "sUns", "mDiv0", "sDiv0", "mDD", "sDD", "mDie", "sDie", "b", "p",
];

/// The ten parameters of the Cyton2 model.
///
/// Each timing distribution is described by a median `m*` and a shape `s*`
/// value, interpreted by the [crate::model::distribution::DistributionFamily]
/// the model was constructed with.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Median of the unstimulated death time
    pub mUns: f64,
    /// Shape of the unstimulated death time
    pub sUns: f64,
    /// Median of the time to first division
    pub mDiv0: f64,
    /// Shape of the time to first division
    pub sDiv0: f64,
    /// Median of the time to division destiny
    pub mDD: f64,
    /// Shape of the time to division destiny
    pub sDD: f64,
    /// Median of the time to death
    pub mDie: f64,
    /// Shape of the time to death
    pub sDie: f64,
    /// Subsequent division time
    pub b: f64,
    /// Proportion of cells that activate, in [0, 1]
    pub p: f64,
}

impl Parameters {
    /// Parameter values in the order of [PARAMETER_NAMES].
    pub fn to_array(&self) -> [f64; 10] {
        [
            self.mUns, self.sUns, self.mDiv0, self.sDiv0, self.mDD, self.sDD, self.mDie,
            self.sDie, self.b, self.p,
        ]
    }

    /// Rebuild a [Parameters] from values in the order of [PARAMETER_NAMES].
    pub fn from_array(values: [f64; 10]) -> Self {
        Parameters {
            mUns: values[0],
            sUns: values[1],
            mDiv0: values[2],
            sDiv0: values[3],
            mDD: values[4],
            sDD: values[5],
            mDie: values[6],
            sDie: values[7],
            b: values[8],
            p: values[9],
        }
    }

    /// True if every field is a finite number.
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl std::fmt::Display for Parameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.to_array();
        let fields: Vec<String> = PARAMETER_NAMES
            .iter()
            .zip(values.iter())
            .map(|(name, value)| format!("{}={:.4}", name, value))
            .collect();
        write!(f, "{}", fields.join(", "))
    }
}

/// Lower and upper bounds for every parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lb: Parameters,
    pub ub: Parameters,
}

impl Bounds {
    /// Check that `lb <= ub` holds for every field.
    pub fn validate(&self) -> Result<()> {
        let lb = self.lb.to_array();
        let ub = self.ub.to_array();
        for (i, name) in PARAMETER_NAMES.iter().enumerate() {
            if !(lb[i] <= ub[i]) {
                bail!(
                    "invalid bounds for parameter {}: lower bound {} exceeds upper bound {}",
                    name,
                    lb[i],
                    ub[i]
                );
            }
        }
        Ok(())
    }
}

/// Which parameters the fitting engine is allowed to vary.
///
/// Parameters flagged `false` are held at their initial value for every
/// restart and echoed unchanged in the fit result.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittableMask {
    pub mUns: bool,
    pub sUns: bool,
    pub mDiv0: bool,
    pub sDiv0: bool,
    pub mDD: bool,
    pub sDD: bool,
    pub mDie: bool,
    pub sDie: bool,
    pub b: bool,
    pub p: bool,
}

impl FittableMask {
    /// Mask values in the order of [PARAMETER_NAMES].
    pub fn to_array(&self) -> [bool; 10] {
        [
            self.mUns, self.sUns, self.mDiv0, self.sDiv0, self.mDD, self.sDD, self.mDie,
            self.sDie, self.b, self.p,
        ]
    }

    /// Indices (into [PARAMETER_NAMES] order) of the parameters that vary.
    pub fn free_indices(&self) -> Vec<usize> {
        self.to_array()
            .iter()
            .enumerate()
            .filter(|(_, &fittable)| fittable)
            .map(|(i, _)| i)
            .collect()
    }
}
