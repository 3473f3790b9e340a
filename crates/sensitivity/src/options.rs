use deriva_solvers::Config;

use crate::{ConfigurationError, SensitivityAlgorithm};

/// Options for a gradient computation.
///
/// Save times default to the end of the span.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Options {
    algorithm: SensitivityAlgorithm,
    config: Config,
    saveat: Option<Vec<f64>>,
    instability_tol: Option<f64>,
}

impl Options {
    #[must_use]
    pub fn new(algorithm: SensitivityAlgorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    /// Sets the integrator configuration used by every solve.
    #[must_use]
    pub fn with_config(self, config: Config) -> Self {
        Self { config, ..self }
    }

    /// Sets the times at which loss terms are evaluated.
    #[must_use]
    pub fn saving(self, saveat: Vec<f64>) -> Self {
        Self {
            saveat: Some(saveat),
            ..self
        }
    }

    /// Enables divergence detection for state reconstruction.
    ///
    /// # Errors
    ///
    /// Returns an error if `tol` is not finite and positive.
    pub fn with_instability_tol(self, tol: f64) -> Result<Self, ConfigurationError> {
        if !tol.is_finite() || tol <= 0.0 {
            return Err(ConfigurationError::Option(
                "instability_tol must be finite and positive",
            ));
        }
        Ok(Self {
            instability_tol: Some(tol),
            ..self
        })
    }

    #[must_use]
    pub fn algorithm(&self) -> &SensitivityAlgorithm {
        &self.algorithm
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn saveat(&self) -> Option<&[f64]> {
        self.saveat.as_deref()
    }

    #[must_use]
    pub fn instability_tol(&self) -> Option<f64> {
        self.instability_tol
    }

    /// Returns the save times inside `tspan`, in integration order.
    pub(crate) fn save_times(&self, tspan: (f64, f64)) -> Vec<f64> {
        let (t0, t1) = tspan;
        let Some(saveat) = &self.saveat else {
            return vec![t1];
        };
        let (lo, hi) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        let mut times: Vec<f64> = saveat
            .iter()
            .copied()
            .filter(|t| (lo..=hi).contains(t))
            .collect();
        times.sort_by(f64::total_cmp);
        times.dedup();
        if t1 < t0 {
            times.reverse();
        }
        times
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_saves_at_end() {
        let options = Options::default();
        assert_eq!(options.save_times((0.0, 2.0)), vec![2.0]);
        assert_eq!(options.instability_tol(), None);
    }

    #[test]
    fn save_times_are_filtered_and_ordered() {
        let options = Options::default().saving(vec![3.0, 0.5, -1.0, 1.0, 0.5]);
        assert_eq!(options.save_times((0.0, 2.0)), vec![0.5, 1.0]);
        assert_eq!(options.save_times((2.0, 0.0)), vec![1.0, 0.5]);
    }

    #[test]
    fn rejects_bad_instability_tol() {
        assert!(Options::default().with_instability_tol(0.0).is_err());
        assert!(Options::default().with_instability_tol(f64::NAN).is_err());
        let options = Options::default()
            .with_instability_tol(1e-3)
            .expect("should accept positive tolerance");
        assert_eq!(options.instability_tol(), Some(1e-3));
    }
}
