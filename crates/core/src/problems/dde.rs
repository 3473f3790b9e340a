use crate::Scalar;

use super::{EquationClass, Hints, ProblemError, System};

/// The right-hand side of a delay equation with constant lags.
///
/// `eval` receives the current state and, for each lag `τ_j` returned by
/// [`lags`](Self::lags), the state `u(t - τ_j)`. Before the initial time the
/// state is given by [`history`](Self::history).
pub trait DelayFunction {
    fn dim(&self) -> usize;

    fn num_params(&self) -> usize;

    /// Returns the constant, positive delays.
    fn lags(&self) -> Vec<f64>;

    /// Evaluates `du = f(u, u(t - τ_1), ..., u(t - τ_k), p, t)`.
    fn eval<T: Scalar>(&self, u: &[T], lagged: &[Vec<T>], p: &[T], t: &T, du: &mut [T]);

    /// Writes the state for a time `t` before the start of the integration.
    fn history<T: Scalar>(&self, p: &[T], t: f64, u: &mut [T]);

    fn hints(&self) -> Hints {
        Hints::default()
    }
}

/// A delay differential equation.
#[derive(Debug, Clone, Copy)]
pub struct Dde<F> {
    pub f: F,
}

impl<F: DelayFunction> Dde<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Returns the smallest lag, which bounds the integrator's step size.
    #[must_use]
    pub fn min_lag(&self) -> Option<f64> {
        self.f.lags().into_iter().reduce(f64::min)
    }
}

impl<F: DelayFunction> System for Dde<F> {
    fn class(&self) -> EquationClass {
        EquationClass::Dde
    }

    fn dim(&self) -> usize {
        self.f.dim()
    }

    fn num_params(&self) -> usize {
        self.f.num_params()
    }

    fn hints(&self) -> Hints {
        self.f.hints()
    }

    fn validate(&self) -> Result<(), ProblemError> {
        match self.f.lags().into_iter().find(|lag| !(lag.is_finite() && *lag > 0.0)) {
            Some(lag) => Err(ProblemError::Lag(lag)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Problem;

    #[derive(Debug)]
    struct Feedback {
        lags: Vec<f64>,
    }

    impl DelayFunction for Feedback {
        fn dim(&self) -> usize {
            1
        }

        fn num_params(&self) -> usize {
            0
        }

        fn lags(&self) -> Vec<f64> {
            self.lags.clone()
        }

        fn eval<T: Scalar>(&self, _u: &[T], lagged: &[Vec<T>], _p: &[T], _t: &T, du: &mut [T]) {
            du[0] = -lagged[0][0].clone();
        }

        fn history<T: Scalar>(&self, _p: &[T], _t: f64, u: &mut [T]) {
            u[0] = T::one();
        }
    }

    #[test]
    fn min_lag_picks_smallest() {
        let dde = Dde::new(Feedback {
            lags: vec![0.7, 0.2, 1.0],
        });
        assert_eq!(dde.min_lag(), Some(0.2));
    }

    #[test]
    fn rejects_non_positive_lag() {
        let dde = Dde::new(Feedback {
            lags: vec![0.5, -1.0],
        });
        let err = Problem::new(dde, vec![1.0], (0.0, 2.0), vec![]).expect_err("negative lag");
        assert_eq!(err, ProblemError::Lag(-1.0));
    }
}
