use anyhow::{Context, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, LogNormal, Normal};

/// Timing-distribution family used for every Cyton2 event clock.
///
/// Selected once at model construction. Both variants are parameterized by a
/// median and a shape value: for the lognormal the median is the scale and
/// the shape is the standard deviation of the underlying normal, for the
/// normal they are the mean and standard deviation directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionFamily {
    LogNormal,
    Normal,
}

impl DistributionFamily {
    /// Probability density at every time in `times`.
    pub fn pdf(&self, times: &Array1<f64>, median: f64, shape: f64) -> Result<Array1<f64>> {
        match self {
            DistributionFamily::LogNormal => {
                let dist = lognormal(median, shape)?;
                Ok(times.mapv(|t| if t > 0.0 { dist.pdf(t) } else { 0.0 }))
            }
            DistributionFamily::Normal => {
                let dist = normal(median, shape)?;
                Ok(times.mapv(|t| dist.pdf(t)))
            }
        }
    }

    /// Cumulative distribution at every time in `times`.
    pub fn cdf(&self, times: &Array1<f64>, median: f64, shape: f64) -> Result<Array1<f64>> {
        match self {
            DistributionFamily::LogNormal => {
                let dist = lognormal(median, shape)?;
                Ok(times.mapv(|t| if t > 0.0 { dist.cdf(t) } else { 0.0 }))
            }
            DistributionFamily::Normal => {
                let dist = normal(median, shape)?;
                Ok(times.mapv(|t| dist.cdf(t)))
            }
        }
    }

    /// Survival function (1 - cdf) at every time in `times`.
    pub fn sf(&self, times: &Array1<f64>, median: f64, shape: f64) -> Result<Array1<f64>> {
        match self {
            DistributionFamily::LogNormal => {
                let dist = lognormal(median, shape)?;
                Ok(times.mapv(|t| if t > 0.0 { dist.sf(t) } else { 1.0 }))
            }
            DistributionFamily::Normal => {
                let dist = normal(median, shape)?;
                Ok(times.mapv(|t| dist.sf(t)))
            }
        }
    }
}

/// A lognormal with the given median; the location of the underlying normal
/// is `ln(median)`. Fails for non-positive medians or shapes, which the
/// optimizer is allowed to propose during random restarts.
fn lognormal(median: f64, shape: f64) -> Result<LogNormal> {
    LogNormal::new(median.ln(), shape).with_context(|| {
        format!(
            "invalid lognormal timing distribution (median {}, shape {})",
            median, shape
        )
    })
}

fn normal(median: f64, shape: f64) -> Result<Normal> {
    Normal::new(median, shape).with_context(|| {
        format!(
            "invalid normal timing distribution (median {}, shape {})",
            median, shape
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_lognormal_median() {
        let times = array![60.0];
        let cdf = DistributionFamily::LogNormal
            .cdf(&times, 60.0, 0.3)
            .unwrap();
        // By construction the median of the lognormal is the `m` parameter
        assert_relative_eq!(cdf[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_lognormal_zero_time() {
        let times = array![0.0, -5.0];
        let family = DistributionFamily::LogNormal;
        assert_eq!(family.pdf(&times, 60.0, 0.3).unwrap().to_vec(), vec![0.0, 0.0]);
        assert_eq!(family.cdf(&times, 60.0, 0.3).unwrap().to_vec(), vec![0.0, 0.0]);
        assert_eq!(family.sf(&times, 60.0, 0.3).unwrap().to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_sf_is_complement_of_cdf() {
        let times = array![10.0, 30.0, 60.0, 120.0];
        for family in [DistributionFamily::LogNormal, DistributionFamily::Normal] {
            let cdf = family.cdf(&times, 60.0, 0.3).unwrap();
            let sf = family.sf(&times, 60.0, 0.3).unwrap();
            for (c, s) in cdf.iter().zip(sf.iter()) {
                assert_relative_eq!(c + s, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_invalid_parameters_error() {
        let times = array![1.0];
        assert!(DistributionFamily::LogNormal.sf(&times, -5.0, 0.3).is_err());
        assert!(DistributionFamily::LogNormal.sf(&times, 60.0, -0.3).is_err());
        assert!(DistributionFamily::Normal.sf(&times, 60.0, 0.0).is_err());
    }
}
