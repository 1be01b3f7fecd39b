use anyhow::Result;
use ndarray::Array1;

use crate::model::distribution::DistributionFamily;
use crate::model::{Cyton2Model, ExtrapolationResult};
use crate::structs::experiment::SingleConditionData;
use crate::structs::parameters::Parameters;

/// Build the extrapolation time vector for a harvest schedule: the union of
/// a dense regular grid over `[0, max(ht) + dt]` at increments of `dt` and
/// the exact harvest times.
///
/// Including the harvest times verbatim guarantees the bit-exact lookups the
/// model performs when subsampling, even when a harvest time is off the
/// `dt` lattice.
pub fn get_times(exp_ht: &[f64], dt: f64) -> Array1<f64> {
    let tf = exp_ht.iter().fold(0.0f64, |a, &b| a.max(b)) + dt;
    let n = (tf / dt).floor() as usize + 1;
    let mut times: Vec<f64> = (0..n).map(|i| i as f64 * dt).collect();
    for &ht in exp_ht {
        if !times.contains(&ht) {
            times.push(ht);
        }
    }
    times.sort_by(f64::total_cmp);
    times.dedup();
    Array1::from(times)
}

/// Predict cell counts for one condition over a dense time grid and at its
/// harvest times.
///
/// Builds the model from the condition's reduced data (N0 from the first
/// timepoint, replicate counts from the recombined arrays) and evaluates the
/// given parameters, fitted or user-supplied. Pure and deterministic.
pub fn extrapolate_condition(
    condition: &SingleConditionData,
    params: &Parameters,
    dt: f64,
    family: DistributionFamily,
) -> Result<ExtrapolationResult> {
    let model = Cyton2Model::new(
        &condition.harvest.times,
        condition.calc_n0()?,
        condition.max_div,
        dt,
        condition.calc_nreps(),
        family,
    )?;
    let times = get_times(&condition.harvest.times, dt);
    model.extrapolate(&times, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_times_contains_harvest_times() {
        let ht = [0.0, 12.0, 24.0, 36.5, 13.7];
        let times = get_times(&ht, 0.5);
        for t in ht {
            assert!(times.iter().any(|&x| x == t), "missing harvest time {}", t);
        }
        // Sorted and deduplicated
        let mut sorted = times.to_vec();
        sorted.sort_by(f64::total_cmp);
        sorted.dedup();
        assert_eq!(sorted.len(), times.len());
        assert_eq!(times[0], 0.0);
    }

    #[test]
    fn test_get_times_step() {
        let times = get_times(&[0.0, 2.0], 0.5);
        assert_eq!(times.to_vec(), vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
    }
}
