use crate::Scalar;

use super::{EquationClass, Hints, System};

/// The right-hand side of an ordinary differential equation `u' = f(u, p, t)`.
///
/// `eval` is generic over [`Scalar`] so that every sensitivity algorithm can
/// run it on plain values, dual numbers, or taped variables. It must write
/// every entry of `du`.
pub trait OdeFunction {
    /// Returns the length of the state vector.
    fn dim(&self) -> usize;

    /// Returns the length of the parameter vector.
    fn num_params(&self) -> usize;

    /// Evaluates the derivative of `u` at time `t`.
    fn eval<T: Scalar>(&self, u: &[T], p: &[T], t: &T, du: &mut [T]);

    /// Returns structural hints about `eval`.
    ///
    /// The default describes an out-of-place, branch-free function.
    fn hints(&self) -> Hints {
        Hints::default()
    }
}

/// An ordinary differential equation.
#[derive(Debug, Clone, Copy)]
pub struct Ode<F> {
    pub f: F,
}

impl<F: OdeFunction> Ode<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: OdeFunction> System for Ode<F> {
    fn class(&self) -> EquationClass {
        EquationClass::Ode
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
}
