use anyhow::{bail, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Raw generation-resolved cell counts for a whole experiment.
///
/// The layout is ragged: `counts[condition][timepoint][generation]` holds the
/// replicate measurements for one generation slot, with `None` marking a
/// missing data point. Replicate counts may differ between timepoints and
/// generations (asymmetric replicate dropout is valid data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCellCounts {
    counts: Vec<Vec<Vec<Vec<Option<f64>>>>>,
}

impl RawCellCounts {
    pub fn new(counts: Vec<Vec<Vec<Vec<Option<f64>>>>>) -> Self {
        RawCellCounts { counts }
    }

    pub fn num_conditions(&self) -> usize {
        self.counts.len()
    }

    /// The replicate values recorded for one (condition, timepoint, generation) slot.
    pub fn slot(&self, icnd: usize, itpt: usize, igen: usize) -> &[Option<f64>] {
        &self.counts[icnd][itpt][igen]
    }

    /// Verify the ragged structure against the declared experiment shape.
    ///
    /// The ingestion collaborator promises one timepoint list per condition
    /// and `max_div + 1` generation slots per timepoint. Any mismatch is a
    /// contract violation and aborts reduction.
    pub fn validate_shape(
        &self,
        conditions: &[String],
        num_tps: &[usize],
        gen_per_condition: &[usize],
    ) -> Result<()> {
        if conditions.len() != num_tps.len() || conditions.len() != gen_per_condition.len() {
            bail!(
                "metadata length mismatch: {} conditions, {} timepoint counts, {} generation counts",
                conditions.len(),
                num_tps.len(),
                gen_per_condition.len()
            );
        }
        if self.counts.len() != conditions.len() {
            bail!(
                "raw counts hold {} conditions but {} were declared",
                self.counts.len(),
                conditions.len()
            );
        }
        for (icnd, condition) in self.counts.iter().enumerate() {
            if condition.len() < num_tps[icnd] {
                bail!(
                    "condition {} has {} timepoints but {} were declared",
                    conditions[icnd],
                    condition.len(),
                    num_tps[icnd]
                );
            }
            for (itpt, timepoint) in condition.iter().take(num_tps[icnd]).enumerate() {
                if timepoint.len() < gen_per_condition[icnd] + 1 {
                    bail!(
                        "condition {} timepoint {} has {} generation slots but {} were declared",
                        conditions[icnd],
                        itpt,
                        timepoint.len(),
                        gen_per_condition[icnd] + 1
                    );
                }
            }
        }
        Ok(())
    }
}

/// Per-condition harvest schedule: the ordered distinct harvest times (hours)
/// and the number of replicates sampled at each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSchedule {
    pub times: Vec<f64>,
    pub nreps: Vec<usize>,
}

/// Reduced experiment data for all conditions.
///
/// Produced once by [crate::routines::reduction::reduce] and treated as an
/// immutable input thereafter. Models are fitted per condition, so callers
/// slice out a [SingleConditionData] first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentData {
    /// Condition names, in dataset order
    pub conditions: Vec<String>,
    /// Harvest schedule per condition
    pub harvest: Vec<HarvestSchedule>,
    /// Observed maximum generation per condition
    pub max_div_per_condition: Vec<usize>,
    /// Number of timepoints per condition
    pub num_tps: Vec<usize>,
    /// Average total cells, `[condition][timepoint]`
    pub total_cells: Vec<Vec<f64>>,
    /// Replicate-expanded total cells, `[condition][replicate slot]`
    pub total_cells_reps: Vec<Vec<f64>>,
    /// SEM of the replicate totals, `[condition][timepoint]`
    pub total_cells_sem: Vec<Vec<f64>>,
    /// Average cells per generation, `[condition][timepoint][generation]`
    pub cell_gens: Vec<Vec<Vec<f64>>>,
    /// Recombined per-replicate counts, `[condition][timepoint][replicate][generation]`
    pub cell_gens_reps: Vec<Vec<Vec<Vec<f64>>>>,
    /// SEM per generation, `[condition][timepoint][generation]`
    pub cell_gens_sem: Vec<Vec<Vec<f64>>>,
}

impl ExperimentData {
    /// All the data for a single condition, looked up by name.
    pub fn slice_condition(&self, condition: &str) -> Result<SingleConditionData> {
        match self.conditions.iter().position(|name| name == condition) {
            Some(idx) => self.slice_condition_idx(idx),
            None => bail!(
                "unknown condition {}. Known conditions are: {:?}",
                condition,
                self.conditions
            ),
        }
    }

    /// All the data for a single condition index.
    pub fn slice_condition_idx(&self, idx: usize) -> Result<SingleConditionData> {
        if idx >= self.conditions.len() {
            bail!(
                "condition index {} out of range for {} conditions",
                idx,
                self.conditions.len()
            );
        }
        Ok(SingleConditionData {
            name: self.conditions[idx].clone(),
            harvest: self.harvest[idx].clone(),
            max_div: self.max_div_per_condition[idx],
            num_tp: self.num_tps[idx],
            total_cells: self.total_cells[idx].clone(),
            total_cells_reps: self.total_cells_reps[idx].clone(),
            total_cells_sem: self.total_cells_sem[idx].clone(),
            cell_gens: self.cell_gens[idx].clone(),
            cell_gens_reps: self.cell_gens_reps[idx].clone(),
            cell_gens_sem: self.cell_gens_sem[idx].clone(),
        })
    }
}

/// Reduced experiment data for one condition, the unit the model binds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleConditionData {
    pub name: String,
    pub harvest: HarvestSchedule,
    pub max_div: usize,
    pub num_tp: usize,
    pub total_cells: Vec<f64>,
    pub total_cells_reps: Vec<f64>,
    pub total_cells_sem: Vec<f64>,
    pub cell_gens: Vec<Vec<f64>>,
    pub cell_gens_reps: Vec<Vec<Vec<f64>>>,
    pub cell_gens_sem: Vec<Vec<f64>>,
}

impl SingleConditionData {
    /// N0, the initial cell count: the mean over replicates at the first
    /// timepoint of the generation-summed counts.
    ///
    /// Fails when the first timepoint holds no recorded replicates, since
    /// the model cannot be anchored without an initial population.
    pub fn calc_n0(&self) -> Result<f64> {
        let replicates = match self.cell_gens_reps.first() {
            Some(replicates) if !replicates.is_empty() => replicates,
            _ => bail!(
                "condition {} has no replicates at its first timepoint; N0 is undefined",
                self.name
            ),
        };
        let total: f64 = replicates
            .iter()
            .map(|rep| rep.iter().sum::<f64>())
            .sum();
        Ok(total / replicates.len() as f64)
    }

    /// Replicate count per timepoint, taken from the recombined counts.
    pub fn calc_nreps(&self) -> Vec<usize> {
        self.cell_gens_reps.iter().map(|reps| reps.len()).collect()
    }

    /// The empirical target vector for fitting, flattened in
    /// (timepoint, replicate, generation) order to match
    /// [crate::model::Cyton2Model::evaluate].
    pub fn flat_target(&self) -> Array1<f64> {
        let values: Vec<f64> = self
            .cell_gens_reps
            .iter()
            .flat_map(|reps| reps.iter())
            .flat_map(|gens| gens.iter().copied())
            .collect();
        Array1::from(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_experiment() -> ExperimentData {
        ExperimentData {
            conditions: vec!["stim".to_string(), "unstim".to_string()],
            harvest: vec![
                HarvestSchedule {
                    times: vec![0.0, 24.0],
                    nreps: vec![2, 2],
                },
                HarvestSchedule {
                    times: vec![0.0],
                    nreps: vec![1],
                },
            ],
            max_div_per_condition: vec![1, 0],
            num_tps: vec![2, 1],
            total_cells: vec![vec![100.0, 150.0], vec![50.0]],
            total_cells_reps: vec![vec![90.0, 110.0, 140.0, 160.0], vec![50.0]],
            total_cells_sem: vec![vec![10.0, 10.0], vec![f64::NAN]],
            cell_gens: vec![
                vec![vec![100.0, 0.0], vec![100.0, 50.0]],
                vec![vec![50.0]],
            ],
            cell_gens_reps: vec![
                vec![
                    vec![vec![90.0, 0.0], vec![110.0, 0.0]],
                    vec![vec![90.0, 50.0], vec![110.0, 50.0]],
                ],
                vec![vec![vec![50.0]]],
            ],
            cell_gens_sem: vec![
                vec![vec![10.0, 0.0], vec![10.0, 0.0]],
                vec![vec![f64::NAN]],
            ],
        }
    }

    #[test]
    fn test_slice_unknown_condition() {
        let data = small_experiment();
        let err = data.slice_condition("missing").unwrap_err();
        assert!(err.to_string().contains("unknown condition"));
    }

    #[test]
    fn test_calc_n0() {
        let data = small_experiment();
        let cond = data.slice_condition("stim").unwrap();
        // Replicate totals at timepoint 0 are 90 and 110
        assert_eq!(cond.calc_n0().unwrap(), 100.0);
    }

    #[test]
    fn test_calc_n0_requires_first_timepoint_replicates() {
        let data = small_experiment();
        let mut cond = data.slice_condition("stim").unwrap();
        cond.cell_gens_reps[0].clear();
        let err = cond.calc_n0().unwrap_err();
        assert!(err.to_string().contains("N0 is undefined"));

        cond.cell_gens_reps.clear();
        assert!(cond.calc_n0().is_err());
    }

    #[test]
    fn test_flat_target_order() {
        let data = small_experiment();
        let cond = data.slice_condition_idx(0).unwrap();
        let target = cond.flat_target();
        assert_eq!(
            target.to_vec(),
            vec![90.0, 0.0, 110.0, 0.0, 90.0, 50.0, 110.0, 50.0]
        );
        assert_eq!(cond.calc_nreps(), vec![2, 2]);
    }

    #[test]
    fn test_shape_validation() {
        let raw = RawCellCounts::new(vec![vec![vec![vec![Some(1.0)]]]]);
        let conditions = vec!["stim".to_string()];
        // Declared two generations, data only has one slot
        let err = raw
            .validate_shape(&conditions, &[1], &[1])
            .unwrap_err();
        assert!(err.to_string().contains("generation slots"));
    }
}
