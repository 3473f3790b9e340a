use thiserror::Error;

/// Absolute and relative error tolerances for adaptive stepping.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tolerances {
    abstol: f64,
    reltol: f64,
}

/// Configuration for the integrators.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    tolerances: Tolerances,
    max_steps: usize,
    initial_step: Option<f64>,
    max_step: Option<f64>,
}

/// Errors that can occur when validating an integrator config.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("abstol must be finite and positive")]
    AbsTol,

    #[error("reltol must be finite and non-negative")]
    RelTol,

    #[error("max_steps must be at least one")]
    MaxSteps,

    #[error("initial step must be finite and positive")]
    InitialStep,

    #[error("max step must be positive")]
    MaxStep,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abstol: 1e-8,
            reltol: 1e-8,
        }
    }
}

impl Tolerances {
    /// Creates validated tolerances.
    ///
    /// # Errors
    ///
    /// Returns an error if `abstol` is not positive or `reltol` is negative,
    /// or if either is non-finite.
    pub fn new(abstol: f64, reltol: f64) -> Result<Self, ConfigError> {
        if !abstol.is_finite() || abstol <= 0.0 {
            return Err(ConfigError::AbsTol);
        }
        if !reltol.is_finite() || reltol < 0.0 {
            return Err(ConfigError::RelTol);
        }
        Ok(Self { abstol, reltol })
    }

    #[must_use]
    pub fn abstol(&self) -> f64 {
        self.abstol
    }

    #[must_use]
    pub fn reltol(&self) -> f64 {
        self.reltol
    }

    /// Returns the error scale for a component whose magnitude is `size`.
    #[must_use]
    pub fn scale(&self, size: f64) -> f64 {
        self.abstol + self.reltol * size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            max_steps: 100_000,
            initial_step: None,
            max_step: None,
        }
    }
}

impl Config {
    /// Creates a config with automatic initial step and unbounded step size.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_steps` is zero.
    pub fn new(tolerances: Tolerances, max_steps: usize) -> Result<Self, ConfigError> {
        if max_steps == 0 {
            return Err(ConfigError::MaxSteps);
        }
        Ok(Self {
            tolerances,
            max_steps,
            ..Self::default()
        })
    }

    /// Fixes the magnitude of the first step instead of estimating it.
    ///
    /// # Errors
    ///
    /// Returns an error if `h` is not finite and positive.
    pub fn with_initial_step(self, h: f64) -> Result<Self, ConfigError> {
        if !h.is_finite() || h <= 0.0 {
            return Err(ConfigError::InitialStep);
        }
        Ok(Self {
            initial_step: Some(h),
            ..self
        })
    }

    /// Bounds the magnitude of every step.
    ///
    /// # Errors
    ///
    /// Returns an error if `h` is not positive.
    pub fn with_max_step(self, h: f64) -> Result<Self, ConfigError> {
        if h.is_nan() || h <= 0.0 {
            return Err(ConfigError::MaxStep);
        }
        Ok(Self {
            max_step: Some(h),
            ..self
        })
    }

    /// Returns the same config with different tolerances.
    #[must_use]
    pub fn with_tolerances(self, tolerances: Tolerances) -> Self {
        Self { tolerances, ..self }
    }

    #[must_use]
    pub fn tolerances(&self) -> Tolerances {
        self.tolerances
    }

    /// Returns the maximum number of attempted steps per solve.
    #[must_use]
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    #[must_use]
    pub fn initial_step(&self) -> Option<f64> {
        self.initial_step
    }

    #[must_use]
    pub fn max_step(&self) -> Option<f64> {
        self.max_step
    }
}
