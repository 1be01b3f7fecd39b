use anyhow::{bail, Result};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DMatrix, DVector, Dyn, Owned};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::Cyton2Model;
use crate::routines::settings::FitSettings;
use crate::structs::parameters::{Parameters, PARAMETER_NAMES};

/// Step-size seed for the forward-difference Jacobian. The square root of
/// this value scales the relative perturbation; the default finite-difference
/// step is too small to detect the sensitivity of the median parameters.
const EPSFCN: f64 = 1e-4;

/// One fitted candidate: the parameters and the residual sum of squares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub parameters: Parameters,
    /// Chi-square: sum of squared residuals against the empirical counts
    pub chisqr: f64,
    /// Index of the restart that produced this candidate
    pub restart: usize,
}

/// Map an unbounded internal coordinate to a value inside `[lo, hi]`.
///
/// The MINUIT-style sine transform keeps every trial the solver proposes
/// within bounds without clamping.
fn to_external(x: f64, lo: f64, hi: f64) -> f64 {
    lo + (x.sin() + 1.0) / 2.0 * (hi - lo)
}

fn to_internal(value: f64, lo: f64, hi: f64) -> f64 {
    (2.0 * (value - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin()
}

/// Least-squares problem binding one model to one empirical target vector.
///
/// The parameter vector seen by the solver holds the internal coordinates of
/// the free parameters only; locked parameters stay in the template.
struct CytonProblem<'a> {
    model: &'a Cyton2Model,
    target: &'a Array1<f64>,
    template: [f64; 10],
    free: &'a [usize],
    lb: [f64; 10],
    ub: [f64; 10],
    x: DVector<f64>,
    residuals: Option<DVector<f64>>,
}

impl CytonProblem<'_> {
    fn external(&self, x: &DVector<f64>) -> Parameters {
        let mut values = self.template;
        for (k, &j) in self.free.iter().enumerate() {
            values[j] = to_external(x[k], self.lb[j], self.ub[j]);
        }
        Parameters::from_array(values)
    }

    fn compute_residuals(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let params = self.external(x);
        match self.model.evaluate(&params) {
            Ok(pred) => {
                let residuals = DVector::from_iterator(
                    self.target.len(),
                    self.target.iter().zip(pred.iter()).map(|(y, f)| y - f),
                );
                if residuals.iter().all(|r| r.is_finite()) {
                    Some(residuals)
                } else {
                    None
                }
            }
            Err(err) => {
                tracing::trace!("Model evaluation rejected trial parameters: {}", err);
                None
            }
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CytonProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.x = x.clone();
        self.residuals = self.compute_residuals(x);
    }

    fn params(&self) -> DVector<f64> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals.clone()
    }

    /// Forward-difference Jacobian of the residuals with step
    /// `sqrt(EPSFCN) * |x|` per coordinate.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let r0 = self.residuals.clone()?;
        let mut jacobian = DMatrix::zeros(r0.len(), self.x.len());
        for j in 0..self.x.len() {
            let mut step = EPSFCN.sqrt() * self.x[j].abs();
            if step == 0.0 {
                step = EPSFCN.sqrt();
            }
            let mut perturbed = self.x.clone();
            perturbed[j] += step;
            let rp = self.compute_residuals(&perturbed)?;
            jacobian.set_column(j, &((rp - &r0) / step));
        }
        Some(jacobian)
    }
}

/// Run the bounded Levenberg-Marquardt minimization from one starting point.
fn run_restart(
    model: &Cyton2Model,
    target: &Array1<f64>,
    start: [f64; 10],
    free: &[usize],
    lb: [f64; 10],
    ub: [f64; 10],
    max_nfev: usize,
) -> Result<FitResult> {
    let x0 = DVector::from_iterator(
        free.len(),
        free.iter().map(|&j| to_internal(start[j], lb[j], ub[j])),
    );
    let mut problem = CytonProblem {
        model,
        target,
        template: start,
        free,
        lb,
        ub,
        x: DVector::zeros(free.len()),
        residuals: None,
    };
    problem.set_params(&x0);

    let (problem, report) = LevenbergMarquardt::new()
        .with_patience(max_nfev)
        .minimize(problem);

    // Running out of the evaluation budget still leaves usable parameters;
    // anything else (non-finite residuals, rejected trials) discards the restart.
    if !(report.termination.was_successful()
        || matches!(report.termination, TerminationReason::LostPatience))
    {
        bail!("minimization failed: {:?}", report.termination);
    }

    let chisqr = 2.0 * report.objective_function;
    if !chisqr.is_finite() {
        bail!("minimization produced a non-finite residual");
    }
    let parameters = problem.external(&problem.x);
    if !parameters.is_finite() {
        bail!("minimization produced non-finite parameters");
    }

    Ok(FitResult {
        parameters,
        chisqr,
        restart: 0,
    })
}

/// Multi-start fit of the Cyton2 model to one condition's empirical counts.
///
/// Every restart draws uniform random initial values within bounds for the
/// fittable parameters, seeded per restart index so the stream is
/// reproducible regardless of execution order. Restarts run in parallel;
/// restarts that fail numerically are discarded. The returned candidates are
/// sorted by chi-square, lowest first.
pub fn fit_all(
    model: &Cyton2Model,
    target: &Array1<f64>,
    settings: &FitSettings,
) -> Result<Vec<FitResult>> {
    settings.bounds.validate()?;
    if target.len() != model.prediction_len() {
        bail!(
            "target vector has {} entries but the model predicts {}",
            target.len(),
            model.prediction_len()
        );
    }
    let free = settings.fittable.free_indices();
    let lb = settings.bounds.lb.to_array();
    let ub = settings.bounds.ub.to_array();
    for &j in &free {
        if !(ub[j] > lb[j]) {
            bail!(
                "fittable parameter {} has a degenerate bound [{}, {}]",
                PARAMETER_NAMES[j],
                lb[j],
                ub[j]
            );
        }
    }
    let initial = settings.parameters.to_array();

    tracing::info!(
        "Starting fit: {} restarts, {} free parameters, {} data points",
        settings.iter_search,
        free.len(),
        target.len()
    );

    let mut candidates: Vec<FitResult> = (0..settings.iter_search)
        .into_par_iter()
        .filter_map(|restart| {
            let mut rng = StdRng::seed_from_u64(settings.seed.wrapping_add(restart as u64));
            let mut start = initial;
            for &j in &free {
                start[j] = rng.random_range(lb[j]..ub[j]);
            }
            match run_restart(model, target, start, &free, lb, ub, settings.max_nfev) {
                Ok(result) => {
                    tracing::debug!("Restart {} converged with chisqr {:.6e}", restart, result.chisqr);
                    Some(FitResult { restart, ..result })
                }
                Err(err) => {
                    tracing::warn!("Restart {} discarded: {}", restart, err);
                    None
                }
            }
        })
        .collect();

    if candidates.is_empty() {
        bail!("all {} restarts failed", settings.iter_search);
    }

    // Restart index breaks chi-square ties so repeated runs are bit-identical
    candidates.sort_by(|a, b| {
        a.chisqr
            .total_cmp(&b.chisqr)
            .then(a.restart.cmp(&b.restart))
    });

    let best = &candidates[0];
    tracing::info!(
        "Best of {} successful restarts: chisqr {:.6e} ({})",
        candidates.len(),
        best.chisqr,
        best.parameters
    );

    Ok(candidates)
}

/// The lowest-residual candidate from [fit_all].
pub fn fit(
    model: &Cyton2Model,
    target: &Array1<f64>,
    settings: &FitSettings,
) -> Result<FitResult> {
    let mut candidates = fit_all(model, target, settings)?;
    Ok(candidates.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bound_transform_round_trip() {
        for value in [0.01, 1.0, 250.0, 499.99] {
            let internal = to_internal(value, 0.01, 500.0);
            assert_relative_eq!(to_external(internal, 0.01, 500.0), value, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_external_stays_in_bounds() {
        for x in [-1e6, -3.7, 0.0, 2.2, 1e6] {
            let value = to_external(x, 0.0, 1.0);
            assert!((0.0..=1.0).contains(&value));
        }
    }
}
