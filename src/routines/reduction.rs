use anyhow::Result;

use crate::structs::experiment::{ExperimentData, HarvestSchedule, RawCellCounts};

/// Recursively remove empty inner sequences from a nested structure.
///
/// The reducer allocates intermediate buffers sized to the maximum
/// timepoint/generation/replicate counts across all conditions, so
/// conditions with fewer entries leave empty sequences behind. Pruning
/// strips those without disturbing non-empty structure.
pub trait PruneEmpty {
    fn prune_empty(&mut self);
    /// True if this value should be dropped from its parent after pruning.
    fn is_prunable(&self) -> bool;
}

impl PruneEmpty for f64 {
    fn prune_empty(&mut self) {}
    fn is_prunable(&self) -> bool {
        false
    }
}

impl<T: PruneEmpty> PruneEmpty for Vec<T> {
    fn prune_empty(&mut self) {
        for item in self.iter_mut() {
            item.prune_empty();
        }
        self.retain(|item| !item.is_prunable());
    }
    fn is_prunable(&self) -> bool {
        self.is_empty()
    }
}

/// Standard error of the mean with sample standard deviation (ddof = 1).
/// Fewer than two values yield NaN.
fn sem(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt() / (n as f64).sqrt()
}

/// Mean of one generation slot's replicates.
///
/// Missing values are excluded from the numerator and the divisor; a slot
/// with no recorded values at all averages to 0 through a notional single
/// replicate, guarding the division.
fn slot_mean(slot: &[Option<f64>]) -> f64 {
    let mut sum = 0.0;
    let mut replicate = 0.0;
    for datum in slot.iter().flatten() {
        sum += datum;
        replicate += 1.0;
    }
    if replicate == 0.0 {
        replicate = 1.0;
    }
    sum / replicate
}

/// The maximum replicate count recorded anywhere in the experiment, used to
/// size replicate-indexed buffers for asymmetric data.
fn max_replicates(
    data: &RawCellCounts,
    num_tps: &[usize],
    gen_per_condition: &[usize],
) -> usize {
    let mut max_reps = 0;
    for icnd in 0..data.num_conditions() {
        for itpt in 0..num_tps[icnd] {
            for igen in 0..=gen_per_condition[icnd] {
                max_reps = max_reps.max(data.slot(icnd, itpt, igen).len());
            }
        }
    }
    max_reps
}

/// Average total cells per condition and timepoint, the replicate-expanded
/// totals, and the SEM of the replicate totals per timepoint.
///
/// Totals sum the per-generation replicate means over generations. The
/// replicate-expanded array pre-sums generations within each replicate slot
/// so every replicate contributes one total per timepoint.
#[allow(clippy::type_complexity)]
pub fn compute_total_cells(
    data: &RawCellCounts,
    conditions: &[String],
    num_tps: &[usize],
    gen_per_condition: &[usize],
) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    data.validate_shape(conditions, num_tps, gen_per_condition)?;
    let num_conditions = conditions.len();
    let max_reps = max_replicates(data, num_tps, gen_per_condition);
    let max_tps = num_tps.iter().copied().max().unwrap_or(0);

    // Average total cells
    let mut total_cells: Vec<Vec<f64>> = vec![Vec::new(); num_conditions];
    for icnd in 0..num_conditions {
        for itpt in 0..num_tps[icnd] {
            let mut cell = 0.0;
            for igen in 0..=gen_per_condition[icnd] {
                cell += slot_mean(data.slot(icnd, itpt, igen));
            }
            total_cells[icnd].push(cell);
        }
    }
    total_cells.prune_empty();

    // Total cells for each replicate, generations pre-summed. The number of
    // replicate slots emitted per timepoint follows the last generation slot,
    // matching the target vector layout.
    let mut total_cells_reps: Vec<Vec<f64>> = vec![Vec::new(); num_conditions];
    let mut reps_by_tpt: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); max_tps]; num_conditions];
    for icnd in 0..num_conditions {
        for itpt in 0..num_tps[icnd] {
            let mut tmp = vec![0.0; max_reps];
            let mut emitted = 0;
            for igen in 0..=gen_per_condition[icnd] {
                let slot = data.slot(icnd, itpt, igen);
                for (irep, datum) in slot.iter().enumerate() {
                    if let Some(value) = datum {
                        tmp[irep] += value;
                    }
                }
                emitted = slot.len();
            }
            for &total in tmp.iter().take(emitted) {
                total_cells_reps[icnd].push(total);
                reps_by_tpt[icnd][itpt].push(total);
            }
        }
    }
    total_cells_reps.prune_empty();
    reps_by_tpt.prune_empty();

    // Standard error of the mean over the replicate totals
    let mut total_cells_sem: Vec<Vec<f64>> = vec![Vec::new(); num_conditions];
    for (icnd, condition) in reps_by_tpt.iter().enumerate() {
        for replicates in condition.iter() {
            total_cells_sem[icnd].push(sem(replicates));
        }
    }
    total_cells_sem.prune_empty();

    Ok((total_cells, total_cells_reps, total_cells_sem))
}

/// Average cells per generation, the per-replicate recombined counts used as
/// the fitting target, and the SEM per generation.
///
/// The recombined counts are resorted to a `[timepoint][generation][replicate]`
/// shape before SEM computation. Missing values enter the recombined arrays
/// as 0.
#[allow(clippy::type_complexity)]
pub fn sort_cell_generations(
    data: &RawCellCounts,
    conditions: &[String],
    num_tps: &[usize],
    gen_per_condition: &[usize],
) -> Result<(
    Vec<Vec<Vec<f64>>>,
    Vec<Vec<Vec<Vec<f64>>>>,
    Vec<Vec<Vec<f64>>>,
)> {
    data.validate_shape(conditions, num_tps, gen_per_condition)?;
    let num_conditions = conditions.len();
    let max_reps = max_replicates(data, num_tps, gen_per_condition);
    let max_tps = num_tps.iter().copied().max().unwrap_or(0);

    // Average cells per generation
    let mut cell_gens: Vec<Vec<Vec<f64>>> = vec![Vec::new(); num_conditions];
    for icnd in 0..num_conditions {
        for itpt in 0..num_tps[icnd] {
            let mut gen_arr = Vec::with_capacity(gen_per_condition[icnd] + 1);
            for igen in 0..=gen_per_condition[icnd] {
                gen_arr.push(slot_mean(data.slot(icnd, itpt, igen)));
            }
            cell_gens[icnd].push(gen_arr);
        }
    }
    cell_gens.prune_empty();

    // Recombine to per-replicate generation profiles
    let mut cell_gens_reps: Vec<Vec<Vec<Vec<f64>>>> =
        vec![vec![Vec::new(); max_tps]; num_conditions];
    for icnd in 0..num_conditions {
        for itpt in 0..num_tps[icnd] {
            let mut tmp: Vec<Vec<f64>> = vec![Vec::new(); max_reps];
            let mut emitted = 0;
            for igen in 0..=gen_per_condition[icnd] {
                let slot = data.slot(icnd, itpt, igen);
                for (irep, datum) in slot.iter().enumerate() {
                    tmp[irep].push(datum.unwrap_or(0.0));
                }
                emitted = slot.len();
            }
            for profile in tmp.into_iter().take(emitted) {
                cell_gens_reps[icnd][itpt].push(profile);
            }
        }
    }
    cell_gens_reps.prune_empty();

    // Re-sort to [condition][timepoint][generation][replicate] for the SEM
    let mut cell_gens_sem: Vec<Vec<Vec<f64>>> = vec![Vec::new(); num_conditions];
    for (icnd, condition) in cell_gens_reps.iter().enumerate() {
        for timepoint in condition.iter() {
            let num_gens = timepoint.iter().map(|rep| rep.len()).max().unwrap_or(0);
            let mut resorted: Vec<Vec<f64>> = vec![Vec::new(); num_gens];
            for replicate in timepoint.iter() {
                for (igen, &datum) in replicate.iter().enumerate() {
                    resorted[igen].push(datum);
                }
            }
            cell_gens_sem[icnd].push(resorted.iter().map(|reps| sem(reps)).collect());
        }
    }
    cell_gens_sem.prune_empty();

    Ok((cell_gens, cell_gens_reps, cell_gens_sem))
}

/// Reduce raw counts and experiment metadata into the canonical
/// [ExperimentData] bundle handed to fitting and extrapolation.
///
/// `exp_ht` holds the harvest times per condition, one per declared
/// timepoint; replicate counts per harvest time are recovered from the
/// recombined counts.
pub fn reduce(
    data: &RawCellCounts,
    conditions: &[String],
    num_tps: &[usize],
    gen_per_condition: &[usize],
    exp_ht: &[Vec<f64>],
) -> Result<ExperimentData> {
    data.validate_shape(conditions, num_tps, gen_per_condition)?;
    if exp_ht.len() != conditions.len() {
        anyhow::bail!(
            "harvest times declared for {} conditions, dataset has {}",
            exp_ht.len(),
            conditions.len()
        );
    }
    for (icnd, ht) in exp_ht.iter().enumerate() {
        if ht.len() != num_tps[icnd] {
            anyhow::bail!(
                "condition {} declares {} timepoints but {} harvest times",
                conditions[icnd],
                num_tps[icnd],
                ht.len()
            );
        }
    }

    let (total_cells, total_cells_reps, total_cells_sem) =
        compute_total_cells(data, conditions, num_tps, gen_per_condition)?;
    let (cell_gens, cell_gens_reps, cell_gens_sem) =
        sort_cell_generations(data, conditions, num_tps, gen_per_condition)?;

    let harvest: Vec<HarvestSchedule> = exp_ht
        .iter()
        .zip(cell_gens_reps.iter())
        .map(|(times, timepoints)| HarvestSchedule {
            times: times.clone(),
            nreps: timepoints.iter().map(|reps| reps.len()).collect(),
        })
        .collect();

    tracing::debug!(
        "Reduced {} conditions ({} timepoints in total)",
        conditions.len(),
        num_tps.iter().sum::<usize>()
    );

    Ok(ExperimentData {
        conditions: conditions.to_vec(),
        harvest,
        max_div_per_condition: gen_per_condition.to_vec(),
        num_tps: num_tps.to_vec(),
        total_cells,
        total_cells_reps,
        total_cells_sem,
        cell_gens,
        cell_gens_reps,
        cell_gens_sem,
    })
}
