//! Problem definitions: a system, its initial state, time span, and parameters.
//!
//! A [`Problem`] pairs one of the system kinds with the data needed to
//! integrate it:
//!
//! - [`Ode`] — ordinary differential equations `u' = f(u, p, t)`
//! - [`Sde`] — stochastic equations with additive diagonal noise
//! - [`Dde`] — delay equations with constant lags
//! - [`Dae`] — semi-explicit index-1 differential-algebraic equations

mod dae;
mod dde;
mod ode;
mod sde;

pub use dae::{Dae, DaeFunction};
pub use dde::{Dde, DelayFunction};
pub use ode::{Ode, OdeFunction};
pub use sde::{NoiseFunction, Sde};

use thiserror::Error;

/// The class of equation a system belongs to.
///
/// Sensitivity algorithms are only applicable to some classes; the selector
/// rejects inapplicable combinations before any integration starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EquationClass {
    Ode,
    Sde,
    Dae,
    Dde,
}

impl std::fmt::Display for EquationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ode => "ODE",
            Self::Sde => "SDE",
            Self::Dae => "DAE",
            Self::Dde => "DDE",
        };
        f.write_str(name)
    }
}

/// Structural facts about a user function that backends may depend on.
///
/// The defaults describe an out-of-place, branch-free function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hints {
    /// The function mutates its output buffer element by element.
    pub in_place: bool,

    /// The function's control flow depends on the values it is evaluated at.
    pub branching: bool,
}

/// Common metadata every system exposes.
pub trait System {
    /// Returns the equation class.
    fn class(&self) -> EquationClass;

    /// Returns the length of the full state vector `u`.
    fn dim(&self) -> usize;

    /// Returns the length of the parameter vector `p`.
    fn num_params(&self) -> usize;

    /// Returns hints about the user function.
    fn hints(&self) -> Hints;

    /// Checks system-level settings such as step sizes or delays.
    ///
    /// # Errors
    ///
    /// Returns a [`ProblemError`] describing the first invalid setting.
    fn validate(&self) -> Result<(), ProblemError> {
        Ok(())
    }
}

/// Errors raised when a problem's data does not match its system.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProblemError {
    #[error("initial state has length {actual}, system expects {expected}")]
    StateLength { expected: usize, actual: usize },

    #[error("parameter vector has length {actual}, system expects {expected}")]
    ParamLength { expected: usize, actual: usize },

    #[error("time span ({0}, {1}) must be finite and non-empty")]
    TimeSpan(f64, f64),

    #[error("initial state contains a non-finite value")]
    NonFiniteState,

    #[error("step size {0} must be finite and positive")]
    StepSize(f64),

    #[error("delay {0} must be finite and positive")]
    Lag(f64),
}

/// An initial value problem.
///
/// `callbacks` defaults to `()`, meaning no events.
#[derive(Debug, Clone)]
pub struct Problem<S, C = ()> {
    pub system: S,
    pub u0: Vec<f64>,
    pub tspan: (f64, f64),
    pub p: Vec<f64>,
    pub callbacks: C,
}

impl<S: System> Problem<S> {
    /// Creates a problem without callbacks.
    ///
    /// # Errors
    ///
    /// Returns a [`ProblemError`] if `u0` or `p` have the wrong length, if the
    /// time span is empty or non-finite, or if `u0` contains a non-finite value.
    pub fn new(
        system: S,
        u0: Vec<f64>,
        tspan: (f64, f64),
        p: Vec<f64>,
    ) -> Result<Self, ProblemError> {
        Self::with_callbacks(system, u0, tspan, p, ())
    }
}

impl<S: System, C> Problem<S, C> {
    /// Creates a problem with callbacks.
    ///
    /// # Errors
    ///
    /// Returns a [`ProblemError`] under the same conditions as [`Problem::new`].
    pub fn with_callbacks(
        system: S,
        u0: Vec<f64>,
        tspan: (f64, f64),
        p: Vec<f64>,
        callbacks: C,
    ) -> Result<Self, ProblemError> {
        if u0.len() != system.dim() {
            return Err(ProblemError::StateLength {
                expected: system.dim(),
                actual: u0.len(),
            });
        }
        if p.len() != system.num_params() {
            return Err(ProblemError::ParamLength {
                expected: system.num_params(),
                actual: p.len(),
            });
        }
        let (t0, t1) = tspan;
        if !t0.is_finite() || !t1.is_finite() || t0 == t1 {
            return Err(ProblemError::TimeSpan(t0, t1));
        }
        if u0.iter().any(|u| !u.is_finite()) {
            return Err(ProblemError::NonFiniteState);
        }
        system.validate()?;

        Ok(Self {
            system,
            u0,
            tspan,
            p,
            callbacks,
        })
    }

    /// Returns the equation class of the system.
    pub fn class(&self) -> EquationClass {
        self.system.class()
    }

    /// Replaces the callbacks, keeping everything else.
    pub fn map_callbacks<D>(self, callbacks: D) -> Problem<S, D> {
        Problem {
            system: self.system,
            u0: self.u0,
            tspan: self.tspan,
            p: self.p,
            callbacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Scalar;

    #[derive(Debug)]
    struct Decay;

    impl OdeFunction for Decay {
        fn dim(&self) -> usize {
            1
        }

        fn num_params(&self) -> usize {
            1
        }

        fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
            du[0] = -(p[0].clone() * u[0].clone());
        }
    }

    #[test]
    fn accepts_matching_dimensions() {
        let problem = Problem::new(Ode::new(Decay), vec![1.0], (0.0, 1.0), vec![0.5])
            .expect("valid problem");
        assert_eq!(problem.class(), EquationClass::Ode);
    }

    #[test]
    fn rejects_wrong_state_length() {
        let err = Problem::new(Ode::new(Decay), vec![1.0, 2.0], (0.0, 1.0), vec![0.5])
            .expect_err("state too long");
        assert_eq!(
            err,
            ProblemError::StateLength {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_wrong_param_length() {
        let err = Problem::new(Ode::new(Decay), vec![1.0], (0.0, 1.0), vec![])
            .expect_err("missing parameter");
        assert!(matches!(err, ProblemError::ParamLength { .. }));
    }

    #[test]
    fn rejects_degenerate_time_span() {
        let err = Problem::new(Ode::new(Decay), vec![1.0], (1.0, 1.0), vec![0.5])
            .expect_err("empty span");
        assert_eq!(err, ProblemError::TimeSpan(1.0, 1.0));

        let err = Problem::new(Ode::new(Decay), vec![1.0], (0.0, f64::NAN), vec![0.5])
            .expect_err("non-finite span");
        assert!(matches!(err, ProblemError::TimeSpan(..)));
    }
}
