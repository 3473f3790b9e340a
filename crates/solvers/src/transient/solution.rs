use deriva_core::Scalar;

use crate::{DenseOutput, SolverError, StateMap};

/// Indicates how the integrator terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Reached the end of the time span.
    Complete,

    /// Stopped early due to an observer action.
    StoppedByObserver,
}

/// Work counters for one solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Accepted steps.
    pub steps: usize,

    /// Rejected step attempts.
    pub rejected: usize,

    /// Right-hand side evaluations.
    pub evaluations: usize,
}

impl std::ops::AddAssign for Stats {
    fn add_assign(&mut self, rhs: Self) {
        self.steps += rhs.steps;
        self.rejected += rhs.rejected;
        self.evaluations += rhs.evaluations;
    }
}

/// A fired event, in integrator state.
#[derive(Debug, Clone)]
pub struct EventRecord<T> {
    pub t: T,
    pub index: usize,

    /// State just before the event.
    pub before: Vec<T>,

    /// State just after the event.
    pub after: Vec<T>,
}

/// The Brownian path and grid states of a fixed-step stochastic solve.
///
/// `states[k]` is the state at `t[k]` after any event there, and `dw[k]` is
/// the increment used by the step from `t[k]` to `t[k + 1]`.
#[derive(Debug, Clone, Default)]
pub struct NoisePath {
    pub t: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub dw: Vec<Vec<f64>>,
}

/// The result of an integration.
///
/// `u` holds the full state at each save time; `state` holds the integrator
/// state, which differs from `u` only for DAEs. At a time where an event
/// fires, the saved state is the one after the event.
#[derive(Debug, Clone)]
pub struct Solution<T> {
    pub status: Status,

    /// Save times, in integration order.
    pub t: Vec<f64>,

    /// Full states at the save times.
    pub u: Vec<Vec<T>>,

    /// Integrator states at the save times.
    pub state: Vec<Vec<T>>,

    /// Time the integration ended at.
    pub final_time: f64,

    /// Integrator state at `final_time`.
    pub final_state: Vec<T>,

    pub events: Vec<EventRecord<T>>,

    /// Continuous extension of the integrator state, if requested.
    pub dense: Option<DenseOutput>,

    /// Grid and noise of a stochastic solve.
    pub path: Option<NoisePath>,

    pub stats: Stats,
}

impl<T: Scalar> Solution<T> {
    pub(crate) fn new(t0: f64, y0: Vec<T>) -> Self {
        Self {
            status: Status::Complete,
            t: Vec::new(),
            u: Vec::new(),
            state: Vec::new(),
            final_time: t0,
            final_state: y0,
            events: Vec::new(),
            dense: None,
            path: None,
            stats: Stats::default(),
        }
    }

    pub(crate) fn save(&mut self, t: f64, y: Vec<T>) {
        self.t.push(t);
        self.state.push(y);
    }

    /// Fills `u` from the saved integrator states.
    pub(crate) fn observe_with<M: StateMap>(
        &mut self,
        map: &M,
        p: &[T],
    ) -> Result<(), SolverError> {
        self.u = self
            .t
            .iter()
            .zip(&self.state)
            .map(|(&t, y)| map.observe(y, p, &T::from_f64(t)))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Returns the full state at the last save time, if any.
    #[must_use]
    pub fn last(&self) -> Option<&[T]> {
        self.u.last().map(Vec::as_slice)
    }

    /// Drops derivative information, keeping only primal values.
    #[must_use]
    pub fn to_values(&self) -> Solution<f64> {
        let values = |v: &Vec<T>| v.iter().map(Scalar::value).collect::<Vec<_>>();
        Solution {
            status: self.status,
            t: self.t.clone(),
            u: self.u.iter().map(values).collect(),
            state: self.state.iter().map(values).collect(),
            final_time: self.final_time,
            final_state: values(&self.final_state),
            events: self
                .events
                .iter()
                .map(|e| EventRecord {
                    t: e.t.value(),
                    index: e.index,
                    before: values(&e.before),
                    after: values(&e.after),
                })
                .collect(),
            dense: self.dense.clone(),
            path: self.path.clone(),
            stats: self.stats,
        }
    }
}
