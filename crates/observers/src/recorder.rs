use deriva_core::Observer;

use crate::traits::HasTime;

/// An observer that keeps a copy of every event it sees.
///
/// A recorder never returns an action. Pass `&mut recorder` to a solver that
/// takes its observer by value to inspect the events after the solve.
#[derive(Debug, Clone)]
pub struct Recorder<E> {
    events: Vec<E>,
}

impl<E> Recorder<E> {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Returns the recorded events in arrival order.
    #[must_use]
    pub fn events(&self) -> &[E] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Discards everything recorded so far.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    #[must_use]
    pub fn into_events(self) -> Vec<E> {
        self.events
    }
}

impl<E: HasTime> Recorder<E> {
    /// Returns the times of the recorded events, skipping untimed ones.
    #[must_use]
    pub fn times(&self) -> Vec<f64> {
        self.events.iter().filter_map(HasTime::time).collect()
    }
}

impl<E> Default for Recorder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone, A> Observer<E, A> for Recorder<E> {
    fn observe(&mut self, event: &E) -> Option<A> {
        self.events.push(event.clone());
        None
    }
}

impl<E: Clone, A> Observer<E, A> for &mut Recorder<E> {
    fn observe(&mut self, event: &E) -> Option<A> {
        self.events.push(event.clone());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use deriva_core::{Component, Ode, OdeFunction, Problem, Scalar};
    use deriva_sensitivity::{Options, gradient};
    use deriva_solvers::{
        Config, FnField, NoEvents, Plan, SolverError, Status,
        transient::{Event, dopri5},
    };

    /// `u' = -p u`
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
    fn records_every_accepted_step() {
        let mut field = FnField::new(1, |_t: &f64, y: &[f64], dy: &mut [f64]| {
            dy[0] = -y[0];
            Ok::<(), SolverError>(())
        });
        let mut recorder = Recorder::new();

        let solution = dopri5::solve(
            &mut field,
            &NoEvents,
            vec![1.0],
            (0.0, 2.0),
            &Plan::default(),
            &Config::default(),
            &mut recorder,
        )
        .expect("should integrate");

        assert_eq!(solution.status, Status::Complete);
        assert_eq!(recorder.len(), solution.stats.steps);
        assert!(recorder.events().iter().all(|e| matches!(e, Event::Step { .. })));

        let times = recorder.times();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_relative_eq!(times[times.len() - 1], 2.0);
    }

    #[test]
    fn records_the_phases_of_a_gradient() {
        let problem = Problem::new(Ode::new(Decay), vec![1.0], (0.0, 1.0), vec![0.5])
            .expect("should be a valid problem");
        let mut recorder = Recorder::new();

        gradient(&problem, &Component(0), &Options::default(), &mut recorder)
            .expect("should differentiate");

        // Validation carries no time; the rest run forward to 1 then back to 0.
        assert_eq!(recorder.times(), vec![1.0, 0.0, 0.0]);
        assert_eq!(recorder.len(), 4);

        recorder.clear();
        assert!(recorder.is_empty());
    }
}
