use deriva_core::{
    Callbacks, Dae, DaeFunction, Dde, DelayFunction, Hints, NoiseFunction, Observer, Ode,
    OdeFunction, Problem, Scalar, Sde, System,
};

use crate::transient::euler_maruyama::{self, StochasticField};
use crate::transient::{Action, Event, Plan, Solution, dopri5};
use crate::{
    CallbackEvents, Config, DaeDrift, Drift, DriftField, Past, SolverError, StateMap, VectorField,
};

/// A system that can be integrated with any scalar type.
///
/// `u0` and `p` are given in the scalar type of the solve, so the same call
/// produces plain values, dual numbers, or a taped trajectory.
pub trait Integrate: System {
    /// Integrates the system over `tspan`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the underlying integrator fails.
    #[allow(clippy::too_many_arguments)]
    fn integrate<T, C, O>(
        &self,
        u0: &[T],
        p: &[T],
        tspan: (f64, f64),
        callbacks: &C,
        plan: &Plan,
        config: &Config,
        observer: O,
    ) -> Result<Solution<T>, SolverError>
    where
        T: Scalar,
        C: Callbacks,
        O: Observer<Event, Action>;

    /// Integrates the system without observation.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the underlying integrator fails.
    fn integrate_unobserved<T: Scalar, C: Callbacks>(
        &self,
        u0: &[T],
        p: &[T],
        tspan: (f64, f64),
        callbacks: &C,
        plan: &Plan,
        config: &Config,
    ) -> Result<Solution<T>, SolverError> {
        self.integrate(u0, p, tspan, callbacks, plan, config, ())
    }
}

/// Solves a problem in `f64` at its own initial state and parameters.
///
/// # Errors
///
/// Returns a [`SolverError`] if the underlying integrator fails.
pub fn solve<S: Integrate, C: Callbacks>(
    problem: &Problem<S, C>,
    plan: &Plan,
    config: &Config,
) -> Result<Solution<f64>, SolverError> {
    problem.system.integrate_unobserved(
        &problem.u0,
        &problem.p,
        problem.tspan,
        &problem.callbacks,
        plan,
        config,
    )
}

// ============================================================================
// Ordinary differential equations
// ============================================================================

impl<F: OdeFunction> StateMap for Ode<F> {}

impl<F: OdeFunction> Drift for Ode<F> {
    fn state_dim(&self) -> usize {
        self.f.dim()
    }

    fn num_params(&self) -> usize {
        self.f.num_params()
    }

    fn hints(&self) -> Hints {
        self.f.hints()
    }

    fn eval<T: Scalar>(&self, y: &[T], p: &[T], t: &T, dy: &mut [T]) -> Result<(), SolverError> {
        self.f.eval(y, p, t, dy);
        Ok(())
    }
}

impl<F: OdeFunction> Integrate for Ode<F> {
    fn integrate<T, C, O>(
        &self,
        u0: &[T],
        p: &[T],
        tspan: (f64, f64),
        callbacks: &C,
        plan: &Plan,
        config: &Config,
        observer: O,
    ) -> Result<Solution<T>, SolverError>
    where
        T: Scalar,
        C: Callbacks,
        O: Observer<Event, Action>,
    {
        let mut field = DriftField::new(self, p);
        let events = CallbackEvents::new(self, callbacks, p);
        let mut solution =
            dopri5::solve(&mut field, &events, u0.to_vec(), tspan, plan, config, observer)?;
        solution.observe_with(self, p)?;
        Ok(solution)
    }
}

// ============================================================================
// Stochastic differential equations
// ============================================================================

impl<F: OdeFunction, G: NoiseFunction> StateMap for Sde<F, G> {}

/// The deterministic part of an SDE.
impl<F: OdeFunction, G: NoiseFunction> Drift for Sde<F, G> {
    fn state_dim(&self) -> usize {
        self.drift.dim()
    }

    fn num_params(&self) -> usize {
        self.drift.num_params()
    }

    fn hints(&self) -> Hints {
        self.drift.hints()
    }

    fn eval<T: Scalar>(&self, y: &[T], p: &[T], t: &T, dy: &mut [T]) -> Result<(), SolverError> {
        self.drift.eval(y, p, t, dy);
        Ok(())
    }
}

/// An [`Sde`] with its parameters bound.
pub struct SdeField<'a, F, G, T> {
    sde: &'a Sde<F, G>,
    p: &'a [T],
}

impl<'a, F, G, T> SdeField<'a, F, G, T> {
    pub fn new(sde: &'a Sde<F, G>, p: &'a [T]) -> Self {
        Self { sde, p }
    }
}

impl<F: OdeFunction, G: NoiseFunction, T: Scalar> StochasticField<T> for SdeField<'_, F, G, T> {
    fn dim(&self) -> usize {
        self.sde.drift.dim()
    }

    fn dt(&self) -> f64 {
        self.sde.dt
    }

    fn seed(&self) -> u64 {
        self.sde.seed
    }

    fn drift(&mut self, t: &T, y: &[T], dy: &mut [T]) -> Result<(), SolverError> {
        self.sde.drift.eval(y, self.p, t, dy);
        Ok(())
    }

    fn diffusion(&mut self, t: &T, g: &mut [T]) -> Result<(), SolverError> {
        self.sde.noise.eval(self.p, t, g);
        Ok(())
    }
}

impl<F: OdeFunction, G: NoiseFunction> Integrate for Sde<F, G> {
    fn integrate<T, C, O>(
        &self,
        u0: &[T],
        p: &[T],
        tspan: (f64, f64),
        callbacks: &C,
        plan: &Plan,
        config: &Config,
        observer: O,
    ) -> Result<Solution<T>, SolverError>
    where
        T: Scalar,
        C: Callbacks,
        O: Observer<Event, Action>,
    {
        let mut field = SdeField::new(self, p);
        let events = CallbackEvents::new(self, callbacks, p);
        let mut solution =
            euler_maruyama::solve(&mut field, &events, u0.to_vec(), tspan, plan, config, observer)?;
        solution.observe_with(self, p)?;
        Ok(solution)
    }
}

// ============================================================================
// Delay differential equations
// ============================================================================

impl<F: DelayFunction> StateMap for Dde<F> {}

/// Propagated breakpoints past this order are smoother than the 5th-order
/// method and need no landing.
const BREAKPOINT_ORDER: usize = 5;

/// A [`Dde`] with its parameters bound, reading lagged states from history
/// before the initial time and from the computed solution after it.
pub struct DelayField<'a, F, T> {
    dde: &'a Dde<F>,
    p: &'a [T],
    lags: Vec<f64>,
}

impl<'a, F: DelayFunction, T: Scalar> DelayField<'a, F, T> {
    pub fn new(dde: &'a Dde<F>, p: &'a [T]) -> Self {
        Self {
            dde,
            p,
            lags: dde.f.lags(),
        }
    }
}

impl<F: DelayFunction, T: Scalar> VectorField<T> for DelayField<'_, F, T> {
    fn dim(&self) -> usize {
        self.dde.f.dim()
    }

    fn eval(
        &mut self,
        t: &T,
        y: &[T],
        past: &Past<'_, T>,
        dy: &mut [T],
    ) -> Result<(), SolverError> {
        let lagged: Vec<Vec<T>> = self
            .lags
            .iter()
            .map(|&lag| {
                let at = t.clone() - lag;
                past.at(&at).unwrap_or_else(|| {
                    let mut u = vec![T::zero(); y.len()];
                    self.dde.f.history(self.p, at.value(), &mut u);
                    u
                })
            })
            .collect();
        self.dde.f.eval(y, &lagged, self.p, t, dy);
        Ok(())
    }

    fn max_step(&self) -> Option<f64> {
        self.dde.min_lag()
    }

    fn needs_history(&self) -> bool {
        true
    }

    /// Sums of up to [`BREAKPOINT_ORDER`] lags after `t0`, where the jump in
    /// `u'` at the start propagates into higher derivatives.
    fn breakpoints(&self, t0: f64, t1: f64) -> Vec<f64> {
        let same = |a: &mut f64, b: &mut f64| (*a - *b).abs() <= 1e-12 * b.abs().max(1.0);
        let mut frontier = vec![t0];
        let mut times = Vec::new();
        for _ in 0..BREAKPOINT_ORDER {
            frontier = frontier
                .iter()
                .flat_map(|&s| self.lags.iter().map(move |&lag| s + lag))
                .filter(|&s| s < t1)
                .collect();
            frontier.sort_by(f64::total_cmp);
            frontier.dedup_by(same);
            times.extend_from_slice(&frontier);
        }
        times.sort_by(f64::total_cmp);
        times.dedup_by(same);
        times
    }
}

impl<F: DelayFunction> Integrate for Dde<F> {
    fn integrate<T, C, O>(
        &self,
        u0: &[T],
        p: &[T],
        tspan: (f64, f64),
        callbacks: &C,
        plan: &Plan,
        config: &Config,
        observer: O,
    ) -> Result<Solution<T>, SolverError>
    where
        T: Scalar,
        C: Callbacks,
        O: Observer<Event, Action>,
    {
        let mut field = DelayField::new(self, p);
        let events = CallbackEvents::new(self, callbacks, p);
        let mut solution =
            dopri5::solve(&mut field, &events, u0.to_vec(), tspan, plan, config, observer)?;
        solution.observe_with(self, p)?;
        Ok(solution)
    }
}

// ============================================================================
// Differential-algebraic equations
// ============================================================================

impl<F: DaeFunction> Integrate for Dae<F> {
    /// Integrates the differential variables of `u0`; its algebraic entries
    /// only seed the first constraint solve.
    fn integrate<T, C, O>(
        &self,
        u0: &[T],
        p: &[T],
        tspan: (f64, f64),
        callbacks: &C,
        plan: &Plan,
        config: &Config,
        observer: O,
    ) -> Result<Solution<T>, SolverError>
    where
        T: Scalar,
        C: Callbacks,
        O: Observer<Event, Action>,
    {
        let guess: Vec<f64> = u0[self.f.differential_dim()..]
            .iter()
            .map(Scalar::value)
            .collect();
        let drift = DaeDrift::new(self, &guess);
        let mut field = DriftField::new(&drift, p);
        let events = CallbackEvents::new(&drift, callbacks, p);
        let y0 = drift.project(u0);
        let mut solution = dopri5::solve(&mut field, &events, y0, tspan, plan, config, observer)?;
        solution.observe_with(&drift, p)?;
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use deriva_core::{Direction, Dual, EventKind};

    use crate::Status;

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

    struct Constant;

    impl NoiseFunction for Constant {
        fn eval<T: Scalar>(&self, _p: &[T], _t: &T, g: &mut [T]) {
            g[0] = T::from_f64(0.2);
        }
    }

    /// `u' = -u(t - 1)` with unit history.
    struct Lagged;

    impl DelayFunction for Lagged {
        fn dim(&self) -> usize {
            1
        }

        fn num_params(&self) -> usize {
            0
        }

        fn lags(&self) -> Vec<f64> {
            vec![1.0]
        }

        fn eval<T: Scalar>(&self, _u: &[T], lagged: &[Vec<T>], _p: &[T], _t: &T, du: &mut [T]) {
            du[0] = -lagged[0][0].clone();
        }

        fn history<T: Scalar>(&self, _p: &[T], _t: f64, u: &mut [T]) {
            u[0] = T::one();
        }
    }

    /// `y' = -z` with `z = p y`.
    struct Linear;

    impl DaeFunction for Linear {
        fn differential_dim(&self) -> usize {
            1
        }

        fn algebraic_dim(&self) -> usize {
            1
        }

        fn num_params(&self) -> usize {
            1
        }

        fn differential<T: Scalar>(&self, _y: &[T], z: &[T], _p: &[T], _t: &T, dy: &mut [T]) {
            dy[0] = -z[0].clone();
        }

        fn algebraic<T: Scalar>(&self, y: &[T], z: &[T], p: &[T], _t: &T, res: &mut [T]) {
            res[0] = z[0].clone() - p[0].clone() * y[0].clone();
        }
    }

    /// Halves the state when it drops below a level.
    struct Floor;

    impl Callbacks for Floor {
        fn events(&self) -> Vec<EventKind> {
            vec![EventKind::Continuous {
                direction: Direction::Down,
            }]
        }

        fn condition<T: Scalar>(&self, _index: usize, u: &[T], _p: &[T], _t: &T) -> T {
            u[0].clone() - 0.5
        }

        fn affect<T: Scalar>(&self, _index: usize, u: &mut [T], _p: &[T], _t: &T) {
            u[0] = u[0].clone() * 0.5;
        }
    }

    #[test]
    fn ode_problem_solves_in_f64() {
        let problem = Problem::new(Ode::new(Decay), vec![1.0], (0.0, 1.0), vec![2.0])
            .expect("valid problem");
        let solution = solve(&problem, &Plan::saving(vec![1.0]), &Config::default())
            .expect("should integrate");

        assert_eq!(solution.status, Status::Complete);
        assert_relative_eq!(solution.u[0][0], (-2.0_f64).exp(), epsilon = 1e-7);
        assert_eq!(solution.last(), Some(&solution.u[0][..]));
    }

    #[test]
    fn ode_derivatives_through_duals() {
        let ode = Ode::new(Decay);
        let u0 = [Dual::variable(1.0, 0, 2)];
        let p = [Dual::variable(2.0, 1, 2)];
        let solution = ode
            .integrate_unobserved(
                &u0,
                &p,
                (0.0, 1.0),
                &(),
                &Plan::saving(vec![1.0]),
                &Config::default(),
            )
            .expect("should integrate");

        let u1 = &solution.u[0][0];
        let e = (-2.0_f64).exp();
        assert_relative_eq!(u1.partial(0), e, epsilon = 1e-6);
        assert_relative_eq!(u1.partial(1), -e, epsilon = 1e-6);
    }

    #[test]
    fn ode_callbacks_see_full_state() {
        let ode = Ode::new(Decay);
        let solution = ode
            .integrate_unobserved(
                &[1.0],
                &[1.0],
                (0.0, 1.0),
                &Floor,
                &Plan::saving(vec![1.0]),
                &Config::default(),
            )
            .expect("should integrate");

        // Fires at ln 2, then decays for 1 - ln 2.
        assert_eq!(solution.events.len(), 1);
        assert_relative_eq!(solution.events[0].t, 2.0_f64.ln(), epsilon = 1e-8);
        assert_relative_eq!(solution.u[0][0], 0.5 * (-1.0_f64).exp(), epsilon = 1e-7);
    }

    #[test]
    fn sde_uses_fixed_grid() {
        let sde = Sde::new(Decay, Constant, 0.01).with_seed(7);
        let solution = sde
            .integrate_unobserved(
                &[1.0],
                &[1.0],
                (0.0, 1.0),
                &(),
                &Plan::saving(vec![0.5, 1.0]),
                &Config::default(),
            )
            .expect("should integrate");

        assert_eq!(solution.t, vec![0.5, 1.0]);
        assert_eq!(solution.stats.steps, 100);
        let path = solution.path.expect("stochastic solves record the path");
        assert_relative_eq!(path.states[100][0], solution.u[1][0]);
    }

    #[test]
    fn dde_follows_method_of_steps() {
        let dde = Dde::new(Lagged);
        let solution = dde
            .integrate_unobserved(
                &[1.0],
                &[],
                (0.0, 2.0),
                &(),
                &Plan::saving(vec![1.0, 2.0]),
                &Config::default(),
            )
            .expect("should integrate");

        // u = 1 - t on [0, 1], then u = (2 - t)²/2 - 1/2 on [1, 2].
        assert_relative_eq!(solution.u[0][0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(solution.u[1][0], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn dde_lands_on_propagated_breakpoints() {
        let dde = Dde::new(Lagged);
        let mut step_ends = Vec::new();
        let solution = dde
            .integrate(
                &[1.0],
                &[],
                (0.0, 2.5),
                &(),
                &Plan::saving(vec![2.0]),
                &Config::default(),
                |event: &Event| {
                    if let Event::Step { t, .. } = event {
                        step_ends.push(*t);
                    }
                    None
                },
            )
            .expect("should integrate");

        assert!(step_ends.contains(&1.0));
        assert!(step_ends.contains(&2.0));
        // Piecewise polynomial, so exact up to rounding once the kinks are hit.
        assert_relative_eq!(solution.u[0][0], -0.5, epsilon = 1e-10);
    }

    #[test]
    fn dde_rejects_backward_span() {
        let dde = Dde::new(Lagged);
        let err = dde
            .integrate_unobserved(
                &[1.0],
                &[],
                (1.0, 0.0),
                &(),
                &Plan::default(),
                &Config::default(),
            )
            .expect_err("delay equations run forward");
        assert!(matches!(err, SolverError::Unsupported(_)));
    }

    #[test]
    fn dae_reports_algebraic_variables() {
        let dae = Dae::new(Linear);
        let solution = dae
            .integrate_unobserved(
                &[1.0, 0.0],
                &[3.0],
                (0.0, 0.5),
                &(),
                &Plan::saving(vec![0.0, 0.5]),
                &Config::default(),
            )
            .expect("should integrate");

        let y = (-1.5_f64).exp();
        assert_eq!(solution.state[1].len(), 1);
        assert_relative_eq!(solution.u[0][1], 3.0, epsilon = 1e-10);
        assert_relative_eq!(solution.u[1][0], y, epsilon = 1e-7);
        assert_relative_eq!(solution.u[1][1], 3.0 * y, epsilon = 1e-7);
    }
}
