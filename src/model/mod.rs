pub mod distribution;

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

use crate::structs::parameters::Parameters;
use distribution::DistributionFamily;

/// Theoretical maximum division number. Generations at or beyond the
/// experimentally observed maximum are folded into a single terminal bucket.
pub const MAX_DIV: usize = 10;

/// The Cyton2 generative model for one experimental condition.
///
/// The model is bound at construction to the condition's harvest schedule,
/// initial cell count, observed maximum generation, time step and timing
/// distribution family. After that it is a pure function of [Parameters]:
/// [Cyton2Model::evaluate] produces the flat prediction vector used for
/// residual computation during fitting, [Cyton2Model::extrapolate] produces
/// dense-time predictions for reporting.
#[derive(Debug, Clone)]
pub struct Cyton2Model {
    times: Array1<f64>,
    dt: f64,
    n0: f64,
    ht: Vec<f64>,
    nreps: Vec<usize>,
    exp_max_div: usize,
    family: DistributionFamily,
}

/// Dense-grid predictions from [Cyton2Model::extrapolate].
#[derive(Debug, Clone, Serialize)]
pub struct DensePredictions {
    /// Total live cells per time (sum over generations)
    pub total_live_cells: Array1<f64>,
    /// Live cells per generation and time, `[generation, time]`
    pub cells_gen: Array2<f64>,
    /// Unstimulated, never-dividing cells per time
    pub n_uns: Array1<f64>,
    /// Cells still dividing, per theoretical generation and time
    pub n_div: Array2<f64>,
    /// Cells that reached division destiny, per theoretical generation and time
    pub n_des: Array2<f64>,
}

/// Predictions subsampled at the harvest times.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestPredictions {
    /// Total live cells per harvest time
    pub total_live_cells: Array1<f64>,
    /// Live cells per generation at each harvest time, `[timepoint][generation]`
    pub cells_gen: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtrapolationResult {
    /// Extrapolated cell numbers over the full time vector
    pub ext: DensePredictions,
    /// Cell numbers collected at the harvest times
    pub hts: HarvestPredictions,
}

impl Cyton2Model {
    /// Bind a model to one condition.
    ///
    /// The evaluation grid spans `[0, max(ht) + dt)` at increments of `dt`.
    /// `nreps` gives the replicate count per harvest time and may be empty
    /// when the model is only used for extrapolation.
    pub fn new(
        ht: &[f64],
        n0: f64,
        max_div: usize,
        dt: f64,
        nreps: Vec<usize>,
        family: DistributionFamily,
    ) -> Result<Self> {
        if ht.is_empty() {
            bail!("harvest schedule is empty");
        }
        if ht.iter().any(|t| !t.is_finite()) {
            bail!("harvest times must be finite, got {:?}", ht);
        }
        if !(dt > 0.0) {
            bail!("time step must be positive, got {}", dt);
        }
        if !nreps.is_empty() && nreps.len() != ht.len() {
            bail!(
                "replicate counts ({}) do not match harvest times ({})",
                nreps.len(),
                ht.len()
            );
        }
        let t0 = 0.0;
        let tf = ht.iter().fold(f64::MIN, |a, &b| a.max(b)) + dt;
        let nt = ((tf - t0) / dt).ceil() as usize;
        let times = Array1::from_iter((0..nt).map(|i| t0 + i as f64 * dt));

        Ok(Cyton2Model {
            times,
            dt,
            n0,
            ht: ht.to_vec(),
            nreps,
            exp_max_div: max_div,
            family,
        })
    }

    /// The evaluation time grid built at construction.
    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn n0(&self) -> f64 {
        self.n0
    }

    /// Length of the vector [Cyton2Model::evaluate] produces.
    pub fn prediction_len(&self) -> usize {
        self.nreps.iter().sum::<usize>() * (self.exp_max_div + 1)
    }

    /// Live cells per generation over `times`, plus the component arrays.
    ///
    /// Returns `(n_uns, n_div, n_des, cells_gen)` where `cells_gen` has one
    /// row per observed generation with the terminal fold applied, and the
    /// component arrays keep one row per theoretical generation.
    fn cells_per_gen(
        &self,
        times: &Array1<f64>,
        params: &Parameters,
    ) -> Result<(Array1<f64>, Array2<f64>, Array2<f64>, Array2<f64>)> {
        let n = times.len();

        let pdf_dd = self.family.pdf(times, params.mDD, params.sDD)?;
        let sf_uns = self.family.sf(times, params.mUns, params.sUns)?;
        let sf_div = self.family.sf(times, params.mDiv0, params.sDiv0)?;
        let sf_die = self.family.sf(times, params.mDie, params.sDie)?;
        let sf_dd = self.family.sf(times, params.mDD, params.sDD)?;

        let mut n_div: Array2<f64> = Array2::zeros((MAX_DIV + 1, n));
        let mut n_des: Array2<f64> = Array2::zeros((MAX_DIV + 1, n));
        let mut cells_gen: Array2<f64> = Array2::zeros((self.exp_max_div + 1, n));

        // Generation 0: the activated fraction p splits into cells still
        // dividing and cells that reached destiny before their first
        // division; the rest decays with the unstimulated death clock.
        let n_uns = sf_uns.mapv(|sf| self.n0 * (1.0 - params.p) * sf);
        let mut cumulative = 0.0;
        for i in 0..n {
            n_div[[0, i]] = self.n0 * params.p * sf_die[i] * sf_div[i] * sf_dd[i];
            cumulative += pdf_dd[i] * sf_div[i];
            n_des[[0, i]] = self.n0 * params.p * sf_die[i] * cumulative * self.dt;
            cells_gen[[0, i]] = n_uns[i] + n_div[[0, i]] + n_des[[0, i]];
        }

        // Generations > 0: the fraction that completed exactly igen divisions
        // by time t is the difference of two first-division CDFs offset by
        // multiples of the subsequent division time b.
        for igen in 1..=MAX_DIV {
            let core = 2f64.powi(igen as i32) * self.n0 * params.p;
            let upp_times = times.mapv(|t| t - (igen as f64 - 1.0) * params.b);
            let low_times = times.mapv(|t| t - igen as f64 * params.b);
            let upp_cdf = self.family.cdf(&upp_times, params.mDiv0, params.sDiv0)?;
            let low_cdf = self.family.cdf(&low_times, params.mDiv0, params.sDiv0)?;

            let mut cumulative = 0.0;
            for i in 0..n {
                let difference = upp_cdf[i] - low_cdf[i];
                n_div[[igen, i]] = core * sf_die[i] * sf_dd[i] * difference;
                cumulative += pdf_dd[i] * difference;
                n_des[[igen, i]] = core * sf_die[i] * cumulative * self.dt;

                let row = igen.min(self.exp_max_div);
                cells_gen[[row, i]] += n_div[[igen, i]] + n_des[[igen, i]];
            }
        }

        Ok((n_uns, n_div, n_des, cells_gen))
    }

    /// Locate a harvest time in `times` by exact equality.
    ///
    /// Failure means the caller built a grid inconsistent with the schedule.
    fn harvest_index(times: &Array1<f64>, ht: f64) -> Result<usize> {
        match times.iter().position(|&t| t == ht) {
            Some(idx) => Ok(idx),
            None => bail!("harvest time {} not present in the model time grid", ht),
        }
    }

    /// Predicted cell counts flattened in (harvest time, replicate,
    /// generation) order, matching the empirical target vector.
    pub fn evaluate(&self, params: &Parameters) -> Result<Array1<f64>> {
        if self.nreps.len() != self.ht.len() {
            bail!("model was built without replicate counts; evaluate needs them");
        }
        let (_, _, _, cells_gen) = self.cells_per_gen(&self.times, params)?;

        let mut model = Vec::with_capacity(self.prediction_len());
        for (itpt, &ht) in self.ht.iter().enumerate() {
            let t_idx = Self::harvest_index(&self.times, ht)?;
            for _irep in 0..self.nreps[itpt] {
                for igen in 0..=self.exp_max_div {
                    model.push(cells_gen[[igen, t_idx]]);
                }
            }
        }
        Ok(Array1::from(model))
    }

    /// Predicted cell counts over an arbitrary time vector, plus the same
    /// quantities subsampled at the harvest times.
    ///
    /// Every harvest time must be present in `model_times` with bit-exact
    /// representation; [crate::routines::extrapolation::get_times] builds a
    /// suitable vector.
    pub fn extrapolate(
        &self,
        model_times: &Array1<f64>,
        params: &Parameters,
    ) -> Result<ExtrapolationResult> {
        let (n_uns, n_div, n_des, cells_gen) = self.cells_per_gen(model_times, params)?;
        let total_live_cells = cells_gen.sum_axis(Axis(0));

        let mut cells_gen_at_ht: Vec<Vec<f64>> = Vec::with_capacity(self.ht.len());
        let mut total_at_ht = Array1::zeros(self.ht.len());
        for (itpt, &ht) in self.ht.iter().enumerate() {
            let t_idx = Self::harvest_index(model_times, ht)?;
            cells_gen_at_ht.push(cells_gen.column(t_idx).to_vec());
            total_at_ht[itpt] = total_live_cells[t_idx];
        }

        Ok(ExtrapolationResult {
            ext: DensePredictions {
                total_live_cells,
                cells_gen,
                n_uns,
                n_div,
                n_des,
            },
            hts: HarvestPredictions {
                total_live_cells: total_at_ht,
                cells_gen: cells_gen_at_ht,
            },
        })
    }
}
