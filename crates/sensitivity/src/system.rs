//! What the sensitivity engines need from each kind of system.

use deriva_core::{
    Dae, DaeFunction, Dde, DelayFunction, Hints, NoiseFunction, Ode, OdeFunction, Scalar, Sde,
    System, Tape, Var,
};
use deriva_solvers::{DaeDrift, Drift, Integrate, SolverError, StateMap};

/// A system the sensitivity engines can differentiate.
///
/// Every system can be re-run on dual numbers or a tape through
/// [`Integrate`]. Continuous engines additionally need a [`Drift`], which
/// delay equations do not provide.
pub trait Differentiable: Integrate {
    type Drift<'a>: Drift
    where
        Self: 'a;

    /// Returns the drift seen by continuous engines, starting from the full
    /// initial state `u0`.
    fn drift(&self, u0: &[f64]) -> Option<Self::Drift<'_>>;

    /// Returns the additive noise model of a stochastic system.
    fn noise(&self) -> Option<&dyn NoiseModel> {
        None
    }

    /// Returns `true` if the state may be re-solved after a reset.
    fn reinit(&self) -> bool {
        false
    }

    /// Returns the hints VJP backends must respect.
    fn effective_hints(&self) -> Hints {
        self.hints()
    }
}

/// Additive diagonal noise `g(p, t)` evaluated in `f64`.
pub trait NoiseModel {
    fn amplitudes(&self, p: &[f64], t: f64) -> Vec<f64>;

    /// Returns `(∂g/∂p)ᵀ v`.
    fn pullback(&self, p: &[f64], t: f64, v: &[f64]) -> Vec<f64>;
}

impl<F: OdeFunction, G: NoiseFunction> NoiseModel for Sde<F, G> {
    fn amplitudes(&self, p: &[f64], t: f64) -> Vec<f64> {
        let mut g = vec![0.0; self.dim()];
        self.noise.eval(p, &t, &mut g);
        g
    }

    fn pullback(&self, p: &[f64], t: f64, v: &[f64]) -> Vec<f64> {
        let tape = Tape::new();
        let pv = tape.vars(p);
        let mut g = vec![Var::constant(0.0); self.dim()];
        self.noise.eval(&pv, &Var::constant(t), &mut g);
        tape.pullback(&g, v).wrt_all(&pv)
    }
}

/// The drift of a system that has none.
#[derive(Debug, Clone, Copy)]
pub enum NoDrift {}

impl StateMap for NoDrift {}

impl Drift for NoDrift {
    fn state_dim(&self) -> usize {
        match *self {}
    }

    fn num_params(&self) -> usize {
        match *self {}
    }

    fn hints(&self) -> Hints {
        match *self {}
    }

    fn eval<T: Scalar>(
        &self,
        _y: &[T],
        _p: &[T],
        _t: &T,
        _dy: &mut [T],
    ) -> Result<(), SolverError> {
        match *self {}
    }
}

impl<F: OdeFunction> Differentiable for Ode<F> {
    type Drift<'a>
        = &'a Self
    where
        Self: 'a;

    fn drift(&self, _u0: &[f64]) -> Option<Self::Drift<'_>> {
        Some(self)
    }
}

impl<F: OdeFunction, G: NoiseFunction> Differentiable for Sde<F, G> {
    type Drift<'a>
        = &'a Self
    where
        Self: 'a;

    fn drift(&self, _u0: &[f64]) -> Option<Self::Drift<'_>> {
        Some(self)
    }

    fn noise(&self) -> Option<&dyn NoiseModel> {
        Some(self)
    }
}

impl<F: DelayFunction> Differentiable for Dde<F> {
    type Drift<'a>
        = NoDrift
    where
        Self: 'a;

    fn drift(&self, _u0: &[f64]) -> Option<Self::Drift<'_>> {
        None
    }
}

impl<F: DaeFunction> Differentiable for Dae<F> {
    type Drift<'a>
        = DaeDrift<'a, F>
    where
        Self: 'a;

    fn drift(&self, u0: &[f64]) -> Option<Self::Drift<'_>> {
        let nd = self.f.differential_dim();
        Some(DaeDrift::new(self, u0.get(nd..).unwrap_or(&[])))
    }

    fn reinit(&self) -> bool {
        self.reinit
    }

    /// The inner Newton solve makes every evaluation value dependent.
    fn effective_hints(&self) -> Hints {
        Hints {
            branching: true,
            ..self.hints()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    struct Decay;

    impl OdeFunction for Decay {
        fn dim(&self) -> usize {
            2
        }

        fn num_params(&self) -> usize {
            1
        }

        fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
            du[0] = -(p[0].clone() * u[0].clone());
            du[1] = -u[1].clone();
        }
    }

    struct Scaled;

    impl NoiseFunction for Scaled {
        fn eval<T: Scalar>(&self, p: &[T], t: &T, g: &mut [T]) {
            g[0] = p[0].clone() * t.clone();
            g[1] = p[0].clone() * p[0].clone();
        }
    }

    #[test]
    fn noise_model_pullback() {
        let sde = Sde::new(Decay, Scaled, 0.1);
        let noise = sde.noise().expect("stochastic systems have noise");

        assert_eq!(noise.amplitudes(&[3.0], 2.0), vec![6.0, 9.0]);
        // ∂g/∂p = [t, 2p]
        let grad = noise.pullback(&[3.0], 2.0, &[1.0, 0.5]);
        assert_relative_eq!(grad[0], 2.0 + 3.0);
    }

    #[test]
    fn ode_drift_is_the_system() {
        let ode = Ode::new(Decay);
        let drift = ode.drift(&[1.0, 1.0]).expect("odes have a drift");
        let mut dy = [0.0; 2];
        drift
            .eval(&[2.0, 1.0], &[0.5], &0.0, &mut dy)
            .expect("should evaluate");
        assert_eq!(dy, [-1.0, -1.0]);
        assert!(ode.noise().is_none());
        assert!(!ode.effective_hints().branching);
    }
}
