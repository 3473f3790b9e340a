//! Fixed-step Euler–Maruyama integration for additive-noise SDEs.
//!
//! Steps the state with
//!
//! ```text
//! y_{k+1} = y_k + f(t_k, y_k) h_k + g(t_k) ⊙ ΔW_k,    ΔW_k ~ N(0, h_k I)
//! ```
//!
//! on a grid of nominal spacing `dt` that also contains every save time and
//! every preset event time. Increments come from a seeded [`StdRng`], so a
//! given seed and grid always produce the same path. The path is recorded in
//! [`Solution::path`] for discrete adjoints.

use deriva_core::{EventKind, Observer, Scalar};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, StandardNormal};

use crate::{EventSet, SolverError};

use super::plan::preset_stops;
use super::{Action, Event, EventRecord, NoisePath, Plan, Solution, Status};

/// A stochastic right-hand side with additive diagonal noise.
pub trait StochasticField<T: Scalar> {
    fn dim(&self) -> usize;

    /// Nominal step size of the grid.
    fn dt(&self) -> f64;

    /// Seed of the Brownian path.
    fn seed(&self) -> u64;

    /// Evaluates the drift `f(t, y)`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the drift cannot be evaluated.
    fn drift(&mut self, t: &T, y: &[T], dy: &mut [T]) -> Result<(), SolverError>;

    /// Evaluates the noise amplitudes `g(t)`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the amplitudes cannot be evaluated.
    fn diffusion(&mut self, t: &T, g: &mut [T]) -> Result<(), SolverError>;
}

/// Integrates `field` from `tspan.0` to `tspan.1` on a fixed grid.
///
/// # Errors
///
/// Returns a [`SolverError`] if the span runs backward, a continuous event
/// is registered, the step budget runs out, or the state becomes non-finite.
pub fn solve<T, F, E, O>(
    field: &mut F,
    events: &E,
    y0: Vec<T>,
    tspan: (f64, f64),
    plan: &Plan,
    config: &crate::Config,
    mut observer: O,
) -> Result<Solution<T>, SolverError>
where
    T: Scalar,
    F: StochasticField<T>,
    E: EventSet<T>,
    O: Observer<Event, Action>,
{
    let (t0, t1) = tspan;
    if t1 <= t0 {
        return Err(SolverError::Unsupported(
            "stochastic equations can only be integrated forward in time",
        ));
    }
    if events.kinds().iter().any(EventKind::is_continuous) {
        return Err(SolverError::Unsupported(
            "continuous events on fixed-step stochastic integration",
        ));
    }

    let saves = plan.save_times(t0, t1);
    let stops = preset_stops(events.kinds(), t0, t1);
    let grid = build_grid(t0, t1, field.dt(), &saves, &stops);
    if grid.len() - 1 > config.max_steps() {
        return Err(SolverError::MaxSteps {
            max_steps: config.max_steps(),
            t: t0,
            t_end: t1,
        });
    }

    let n = field.dim();
    let mut rng = StdRng::seed_from_u64(field.seed());
    let mut solution = Solution::new(t0, y0.clone());
    let mut path = NoisePath {
        t: vec![t0],
        states: vec![values(&y0)],
        dw: Vec::with_capacity(grid.len() - 1),
    };

    let mut y = y0;
    let mut next_save = 0;
    let mut next_stop = 0;
    if saves.first() == Some(&t0) {
        solution.save(t0, y.clone());
        next_save = 1;
    }

    let mut f = vec![T::zero(); n];
    let mut g = vec![T::zero(); n];
    for window in grid.windows(2) {
        let (ta, tb) = (window[0], window[1]);
        let h = tb - ta;
        let t = T::from_f64(ta);

        field.drift(&t, &y, &mut f)?;
        field.diffusion(&t, &mut g)?;
        solution.stats.evaluations += 1;

        let dw: Vec<f64> = (0..n)
            .map(|_| {
                let z: f64 = StandardNormal.sample(&mut rng);
                z * h.sqrt()
            })
            .collect();
        y = y
            .iter()
            .zip(&f)
            .zip(g.iter().zip(&dw))
            .map(|((y, f), (g, dw))| y.clone() + f.clone() * h + g.clone() * *dw)
            .collect();
        solution.stats.steps += 1;

        if y.iter().any(|v| !v.value().is_finite()) {
            return Err(SolverError::NonFinite { t: tb });
        }

        let mut stop = observer.observe(&Event::Step {
            t: tb,
            h,
            error: 0.0,
        }) == Some(Action::StopEarly);

        let t = T::from_f64(tb);
        if stops.get(next_stop).is_some_and(|(s, _)| *s == tb) {
            for &index in &stops[next_stop].1 {
                let before = y.clone();
                events.affect(index, &t, &mut y)?;
                solution.events.push(EventRecord {
                    t: t.clone(),
                    index,
                    before,
                    after: y.clone(),
                });
                stop |= observer.observe(&Event::Callback { t: tb, index })
                    == Some(Action::StopEarly);
            }
            next_stop += 1;
        }

        if saves.get(next_save) == Some(&tb) {
            solution.save(tb, y.clone());
            next_save += 1;
        }

        path.t.push(tb);
        path.states.push(values(&y));
        path.dw.push(dw);

        if stop {
            solution.status = Status::StoppedByObserver;
            break;
        }
    }

    solution.final_time = *path.t.last().unwrap_or(&t0);
    solution.final_state = y;
    solution.path = Some(path);
    Ok(solution)
}

/// Integrates `field` without observation.
///
/// # Errors
///
/// Returns a [`SolverError`] under the same conditions as [`solve`].
pub fn solve_unobserved<T, F, E>(
    field: &mut F,
    events: &E,
    y0: Vec<T>,
    tspan: (f64, f64),
    plan: &Plan,
    config: &crate::Config,
) -> Result<Solution<T>, SolverError>
where
    T: Scalar,
    F: StochasticField<T>,
    E: EventSet<T>,
{
    solve(field, events, y0, tspan, plan, config, ())
}

fn values<T: Scalar>(y: &[T]) -> Vec<f64> {
    y.iter().map(Scalar::value).collect()
}

/// Builds the step grid: multiples of `dt` from `t0`, plus the exact save
/// and stop times, with multiples dropped when they nearly coincide with an
/// exact time.
fn build_grid(t0: f64, t1: f64, dt: f64, saves: &[f64], stops: &[(f64, Vec<usize>)]) -> Vec<f64> {
    let snap = 1e-9 * dt;
    let mut exact: Vec<f64> = saves
        .iter()
        .copied()
        .chain(stops.iter().map(|(t, _)| *t))
        .chain([t0, t1])
        .collect();
    exact.sort_by(f64::total_cmp);
    exact.dedup();

    let mut grid = exact.clone();
    let mut k = 1.0;
    loop {
        let t = t0 + k * dt;
        if t >= t1 - snap {
            break;
        }
        let near = exact.iter().any(|e| (e - t).abs() <= snap);
        if !near {
            grid.push(t);
        }
        k += 1.0;
    }
    grid.sort_by(f64::total_cmp);
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::{Config, NoEvents};

    /// Geometric drift with constant noise.
    struct Linear {
        a: f64,
        sigma: f64,
        dt: f64,
        seed: u64,
    }

    impl StochasticField<f64> for Linear {
        fn dim(&self) -> usize {
            1
        }

        fn dt(&self) -> f64 {
            self.dt
        }

        fn seed(&self) -> u64 {
            self.seed
        }

        fn drift(&mut self, _t: &f64, y: &[f64], dy: &mut [f64]) -> Result<(), SolverError> {
            dy[0] = self.a * y[0];
            Ok(())
        }

        fn diffusion(&mut self, _t: &f64, g: &mut [f64]) -> Result<(), SolverError> {
            g[0] = self.sigma;
            Ok(())
        }
    }

    #[test]
    fn grid_contains_exact_times() {
        let stops = vec![(0.55, vec![0])];
        let grid = build_grid(0.0, 1.0, 0.25, &[0.5, 1.0], &stops);
        assert_eq!(grid, vec![0.0, 0.25, 0.5, 0.55, 0.75, 1.0]);
    }

    #[test]
    fn zero_noise_matches_explicit_euler() {
        let mut field = Linear {
            a: -1.0,
            sigma: 0.0,
            dt: 0.1,
            seed: 3,
        };
        let solution = solve_unobserved(
            &mut field,
            &NoEvents,
            vec![1.0],
            (0.0, 1.0),
            &Plan::saving(vec![1.0]),
            &Config::default(),
        )
        .expect("should integrate");

        assert_relative_eq!(solution.state[0][0], 0.9_f64.powi(10), epsilon = 1e-12);
        let path = solution.path.expect("path is recorded");
        assert_eq!(path.t.len(), 11);
        assert_eq!(path.dw.len(), 10);
    }

    #[test]
    fn same_seed_same_path() {
        let run = |seed| {
            let mut field = Linear {
                a: 0.5,
                sigma: 0.3,
                dt: 0.01,
                seed,
            };
            solve_unobserved(
                &mut field,
                &NoEvents,
                vec![1.0],
                (0.0, 1.0),
                &Plan::default(),
                &Config::default(),
            )
            .expect("should integrate")
            .final_state[0]
        };

        assert_eq!(run(11).to_bits(), run(11).to_bits());
        assert_ne!(run(11).to_bits(), run(12).to_bits());
    }

    #[test]
    fn rejects_backward_span() {
        let mut field = Linear {
            a: 0.0,
            sigma: 1.0,
            dt: 0.1,
            seed: 0,
        };
        let err = solve_unobserved(
            &mut field,
            &NoEvents,
            vec![0.0],
            (1.0, 0.0),
            &Plan::default(),
            &Config::default(),
        )
        .expect_err("backward span");
        assert!(matches!(err, SolverError::Unsupported(_)));
    }
}
