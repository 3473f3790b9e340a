use deriva_core::{Callbacks, EventKind, Hints, Scalar};

use crate::{DenseStep, SolverError};

// ============================================================================
// Vector fields
// ============================================================================

/// The right-hand side seen by the adaptive integrator.
///
/// Most fields ignore `past`. Delay equations read lagged states from it,
/// which is why they also bound the step size through
/// [`max_step`](Self::max_step).
pub trait VectorField<T: Scalar> {
    fn dim(&self) -> usize;

    /// Evaluates `dy = f(t, y)`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the field cannot be evaluated at `(t, y)`.
    fn eval(&mut self, t: &T, y: &[T], past: &Past<'_, T>, dy: &mut [T])
    -> Result<(), SolverError>;

    /// Returns an upper bound on the step magnitude, if any.
    fn max_step(&self) -> Option<f64> {
        None
    }

    /// Returns `true` if `eval` reads from `past`.
    fn needs_history(&self) -> bool {
        false
    }

    /// Returns times inside `(t0, t1)` where the solution loses smoothness
    /// and the integrator must land exactly.
    fn breakpoints(&self, t0: f64, t1: f64) -> Vec<f64> {
        let _ = (t0, t1);
        Vec::new()
    }
}

/// A vector field built from a closure over `(t, y, dy)`.
pub struct FnField<F> {
    dim: usize,
    f: F,
}

impl<F> FnField<F> {
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<T, F> VectorField<T> for FnField<F>
where
    T: Scalar,
    F: FnMut(&T, &[T], &mut [T]) -> Result<(), SolverError>,
{
    fn dim(&self) -> usize {
        self.dim
    }

    fn eval(
        &mut self,
        t: &T,
        y: &[T],
        _past: &Past<'_, T>,
        dy: &mut [T],
    ) -> Result<(), SolverError> {
        (self.f)(t, y, dy)
    }
}

/// Read access to the part of the solution already computed.
#[derive(Debug, Clone, Copy)]
pub struct Past<'a, T> {
    t0: f64,
    y0: &'a [T],
    steps: &'a [DenseStep<T>],
}

impl<'a, T: Scalar> Past<'a, T> {
    pub(crate) fn new(t0: f64, y0: &'a [T], steps: &'a [DenseStep<T>]) -> Self {
        Self { t0, y0, steps }
    }

    /// Returns the start time of the solve.
    #[must_use]
    pub fn t0(&self) -> f64 {
        self.t0
    }

    /// Interpolates the state at `t`, or returns `None` if `t` is before the
    /// start of the solve.
    ///
    /// Times past the last completed step are clamped to it.
    #[must_use]
    pub fn at(&self, t: &T) -> Option<Vec<T>> {
        let tv = t.value();
        if tv < self.t0 {
            return None;
        }
        if self.steps.is_empty() || tv == self.t0 {
            return Some(self.y0.to_vec());
        }
        let index = self.steps.partition_point(|s| s.end() < tv);
        let step = &self.steps[index.min(self.steps.len() - 1)];
        Some(step.eval(t))
    }
}

// ============================================================================
// Drifts
// ============================================================================

/// Maps between the integrator's state `y` and the user-facing state `u`.
///
/// The identity for every system except DAEs, where `y` holds only the
/// differential variables and `u = [y; z(y, p, t)]`.
pub trait StateMap {
    /// Builds the full state from the integrator state.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the algebraic variables cannot be solved.
    fn observe<T: Scalar>(&self, y: &[T], p: &[T], t: &T) -> Result<Vec<T>, SolverError> {
        let _ = (p, t);
        Ok(y.to_vec())
    }

    /// Extracts the integrator state from a full state.
    fn project<T: Clone>(&self, u: &[T]) -> Vec<T> {
        u.to_vec()
    }
}

/// A deterministic right-hand side `y' = f(y, p, t)` without delays.
///
/// This is what continuous sensitivity engines differentiate.
pub trait Drift: StateMap {
    /// Returns the length of the integrator state.
    fn state_dim(&self) -> usize;

    fn num_params(&self) -> usize;

    fn hints(&self) -> Hints;

    /// Evaluates the drift.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the drift cannot be evaluated.
    fn eval<T: Scalar>(&self, y: &[T], p: &[T], t: &T, dy: &mut [T]) -> Result<(), SolverError>;
}

impl<M: StateMap> StateMap for &M {
    fn observe<T: Scalar>(&self, y: &[T], p: &[T], t: &T) -> Result<Vec<T>, SolverError> {
        (**self).observe(y, p, t)
    }

    fn project<T: Clone>(&self, u: &[T]) -> Vec<T> {
        (**self).project(u)
    }
}

impl<D: Drift> Drift for &D {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }

    fn num_params(&self) -> usize {
        (**self).num_params()
    }

    fn hints(&self) -> Hints {
        (**self).hints()
    }

    fn eval<T: Scalar>(&self, y: &[T], p: &[T], t: &T, dy: &mut [T]) -> Result<(), SolverError> {
        (**self).eval(y, p, t, dy)
    }
}

/// A [`Drift`] with its parameters bound, usable as a [`VectorField`].
pub struct DriftField<'a, D, T> {
    drift: &'a D,
    p: &'a [T],
}

impl<'a, D: Drift, T: Scalar> DriftField<'a, D, T> {
    pub fn new(drift: &'a D, p: &'a [T]) -> Self {
        Self { drift, p }
    }
}

impl<D: Drift, T: Scalar> VectorField<T> for DriftField<'_, D, T> {
    fn dim(&self) -> usize {
        self.drift.state_dim()
    }

    fn eval(
        &mut self,
        t: &T,
        y: &[T],
        _past: &Past<'_, T>,
        dy: &mut [T],
    ) -> Result<(), SolverError> {
        self.drift.eval(y, self.p, t, dy)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events as seen by an integrator, acting on the integrator state.
pub trait EventSet<T: Scalar> {
    fn kinds(&self) -> &[EventKind];

    /// Evaluates the condition of continuous event `index`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the state cannot be observed.
    fn condition(&self, index: usize, t: &T, y: &[T]) -> Result<T, SolverError>;

    /// Applies event `index` in place.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the state cannot be observed.
    fn affect(&self, index: usize, t: &T, y: &mut Vec<T>) -> Result<(), SolverError>;
}

/// The empty event set.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl<T: Scalar> EventSet<T> for NoEvents {
    fn kinds(&self) -> &[EventKind] {
        &[]
    }

    fn condition(&self, _index: usize, _t: &T, _y: &[T]) -> Result<T, SolverError> {
        Ok(T::zero())
    }

    fn affect(&self, _index: usize, _t: &T, _y: &mut Vec<T>) -> Result<(), SolverError> {
        Ok(())
    }
}

/// User callbacks lifted onto the integrator state through a [`StateMap`].
pub struct CallbackEvents<'a, M, C, T> {
    map: &'a M,
    callbacks: &'a C,
    p: &'a [T],
    kinds: Vec<EventKind>,
}

impl<'a, M: StateMap, C: Callbacks, T: Scalar> CallbackEvents<'a, M, C, T> {
    pub fn new(map: &'a M, callbacks: &'a C, p: &'a [T]) -> Self {
        Self {
            map,
            callbacks,
            p,
            kinds: callbacks.events(),
        }
    }
}

impl<M: StateMap, C: Callbacks, T: Scalar> EventSet<T> for CallbackEvents<'_, M, C, T> {
    fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    fn condition(&self, index: usize, t: &T, y: &[T]) -> Result<T, SolverError> {
        let u = self.map.observe(y, self.p, t)?;
        Ok(self.callbacks.condition(index, &u, self.p, t))
    }

    fn affect(&self, index: usize, t: &T, y: &mut Vec<T>) -> Result<(), SolverError> {
        let mut u = self.map.observe(y, self.p, t)?;
        self.callbacks.affect(index, &mut u, self.p, t);
        *y = self.map.project(&u);
        Ok(())
    }
}
