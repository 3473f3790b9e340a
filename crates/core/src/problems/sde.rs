use crate::Scalar;

use super::{EquationClass, Hints, OdeFunction, ProblemError, System};

/// Additive diagonal noise `g(p, t)` of a stochastic equation.
///
/// Component `i` of the state receives `g_i(p, t) dW_i`, where the `W_i` are
/// independent Wiener processes.
pub trait NoiseFunction {
    /// Evaluates the noise amplitudes at time `t`.
    fn eval<T: Scalar>(&self, p: &[T], t: &T, g: &mut [T]);
}

/// A stochastic differential equation `du = f(u, p, t) dt + g(p, t) dW`.
///
/// The Brownian path is fully determined by `seed` and the fixed step `dt`,
/// so repeated solves of the same problem see the same noise realisation.
#[derive(Debug, Clone, Copy)]
pub struct Sde<F, G> {
    pub drift: F,
    pub noise: G,
    pub dt: f64,
    pub seed: u64,
}

impl<F: OdeFunction, G: NoiseFunction> Sde<F, G> {
    /// Creates an SDE integrated with fixed step `dt` and seed zero.
    pub fn new(drift: F, noise: G, dt: f64) -> Self {
        Self {
            drift,
            noise,
            dt,
            seed: 0,
        }
    }

    /// Returns the same equation with a different Brownian path.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
}

impl<F: OdeFunction, G: NoiseFunction> System for Sde<F, G> {
    fn class(&self) -> EquationClass {
        EquationClass::Sde
    }

    fn dim(&self) -> usize {
        self.drift.dim()
    }

    fn num_params(&self) -> usize {
        self.drift.num_params()
    }

    fn hints(&self) -> Hints {
        self.drift.hints()
    }

    fn validate(&self) -> Result<(), ProblemError> {
        if self.dt.is_finite() && self.dt > 0.0 {
            Ok(())
        } else {
            Err(ProblemError::StepSize(self.dt))
        }
    }
}
