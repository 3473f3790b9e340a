use crate::Scalar;

use super::{EquationClass, Hints, System};

/// A semi-explicit index-1 differential-algebraic system.
///
/// ```text
/// y' = f(y, z, p, t)
/// 0  = g(y, z, p, t)
/// ```
///
/// The full state is `u = [y; z]`. The Jacobian `∂g/∂z` must be nonsingular
/// along the solution, so `z` is locally a function of `y`, `p`, and `t`.
pub trait DaeFunction {
    /// Returns the length of `y`.
    fn differential_dim(&self) -> usize;

    /// Returns the length of `z`.
    fn algebraic_dim(&self) -> usize;

    fn num_params(&self) -> usize;

    /// Evaluates `dy = f(y, z, p, t)`.
    fn differential<T: Scalar>(&self, y: &[T], z: &[T], p: &[T], t: &T, dy: &mut [T]);

    /// Evaluates the constraint residual `res = g(y, z, p, t)`.
    fn algebraic<T: Scalar>(&self, y: &[T], z: &[T], p: &[T], t: &T, res: &mut [T]);

    fn hints(&self) -> Hints {
        Hints::default()
    }
}

/// A differential-algebraic equation.
///
/// `reinit` declares that the algebraic variables may be recomputed from the
/// differential ones whenever the state is reset, which backward re-solves of
/// the state depend on.
#[derive(Debug, Clone, Copy)]
pub struct Dae<F> {
    pub f: F,
    pub reinit: bool,
}

impl<F: DaeFunction> Dae<F> {
    /// Creates a DAE without reinitialization support.
    pub fn new(f: F) -> Self {
        Self { f, reinit: false }
    }

    #[must_use]
    pub fn with_reinit(self, reinit: bool) -> Self {
        Self { reinit, ..self }
    }
}

impl<F: DaeFunction> System for Dae<F> {
    fn class(&self) -> EquationClass {
        EquationClass::Dae
    }

    fn dim(&self) -> usize {
        self.f.differential_dim() + self.f.algebraic_dim()
    }

    fn num_params(&self) -> usize {
        self.f.num_params()
    }

    fn hints(&self) -> Hints {
        self.f.hints()
    }
}
