//! Continuous adjoint sensitivities.
//!
//! After one forward solve, the adjoint `λ` and the parameter accumulator
//! `μ` are integrated backward with
//!
//! ```text
//! dλ/dt = -J_yᵀ λ,    dμ/dt = -J_pᵀ λ
//! ```
//!
//! between consecutive *stops*: save times, event times, and the ends of the
//! span. At each stop `λ` jumps by the gradient of the loss terms saved
//! there, then passes back through the events that fired there in reverse
//! order. The engines differ in how they know the state during the backward
//! pass:
//!
//! - [`backsolve`] integrates it backward alongside `λ`
//! - [`interpolating`] reads it from the forward dense output
//! - [`quadrature`] also reads it from dense output, but integrates only
//!   `λ` and recovers `μ` by adaptive quadrature
//!
//! Stochastic problems use the discrete adjoint of their Euler–Maruyama
//! recursion instead, in [`stochastic`].

mod backsolve;
mod interpolating;
mod quadrature;
mod stochastic;

pub(crate) use backsolve::backsolve;
pub(crate) use interpolating::interpolating;
pub(crate) use quadrature::quadrature;

use deriva_core::{Callbacks, Loss, Observer, Scalar, Tape, Var};
use deriva_solvers::{CallbackEvents, Drift, EventRecord, EventSet, Plan, Solution, SolverError};

use crate::action::emit;
use crate::backend::eval;
use crate::gradient::{Context, Stats};
use crate::{Action, Differentiable, Error, Event, Gradient};

// ============================================================================
// Forward pass and stops
// ============================================================================

/// Runs the forward solve every adjoint starts from.
fn forward_pass<S, C, L, O>(
    ctx: &Context<'_, S, C, L>,
    dense: bool,
    observer: &mut O,
) -> Result<Solution<f64>, Error>
where
    S: Differentiable,
    C: Callbacks,
    O: Observer<Event, Action>,
{
    let problem = ctx.problem;
    let plan = Plan {
        saveat: ctx.saveat.clone(),
        dense,
        event_time_derivatives: false,
    };
    let solution = problem.system.integrate_unobserved(
        &problem.u0,
        &problem.p,
        problem.tspan,
        &problem.callbacks,
        &plan,
        ctx.config,
    )?;
    emit(
        observer,
        Event::ForwardComplete {
            t: solution.final_time,
            steps: solution.stats.steps,
        },
    )?;
    Ok(solution)
}

/// A time where the backward pass stops to apply jumps.
#[derive(Debug, Clone, PartialEq)]
struct Stop {
    t: f64,

    /// Indices into the solution's saves.
    saves: Vec<usize>,

    /// Indices into the solution's events, in firing order.
    events: Vec<usize>,
}

impl Stop {
    fn new(t: f64) -> Self {
        Self {
            t,
            saves: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Recorded integrator state after everything that happens at this stop.
    fn after(&self, solution: &Solution<f64>, y0: &[f64]) -> Vec<f64> {
        if let Some(&k) = self.events.last() {
            solution.events[k].after.clone()
        } else if let Some(&i) = self.saves.first() {
            solution.state[i].clone()
        } else if self.t == solution.final_time {
            solution.final_state.clone()
        } else {
            y0.to_vec()
        }
    }

    /// Recorded integrator state before any event at this stop.
    fn before(&self, solution: &Solution<f64>, y0: &[f64]) -> Vec<f64> {
        match self.events.first() {
            Some(&k) => solution.events[k].before.clone(),
            None => self.after(solution, y0),
        }
    }
}

/// Collects the stops of a forward solution, latest first in integration
/// order and ending at `t0`.
fn stops(solution: &Solution<f64>, t0: f64) -> Vec<Stop> {
    fn entry(stops: &mut Vec<Stop>, t: f64) -> &mut Stop {
        let index = match stops.iter().position(|s| s.t == t) {
            Some(index) => index,
            None => {
                stops.push(Stop::new(t));
                stops.len() - 1
            }
        };
        &mut stops[index]
    }

    let t1 = solution.final_time;
    let mut stops = vec![Stop::new(t1)];
    entry(&mut stops, t0);
    for (i, &t) in solution.t.iter().enumerate() {
        entry(&mut stops, t).saves.push(i);
    }
    for (k, record) in solution.events.iter().enumerate() {
        entry(&mut stops, record.t).events.push(k);
    }

    let dir = if t1 >= t0 { 1.0 } else { -1.0 };
    stops.sort_by(|a, b| ((b.t - t0) * dir).total_cmp(&((a.t - t0) * dir)));
    stops
}

// ============================================================================
// Adjoint state and jumps
// ============================================================================

/// `λ`, `μ`, and the loss accumulated so far.
#[derive(Debug, Clone)]
struct AdjointState {
    lambda: Vec<f64>,
    mu: Vec<f64>,
    loss: f64,
}

impl AdjointState {
    fn new(n: usize, np: usize) -> Self {
        Self {
            lambda: vec![0.0; n],
            mu: vec![0.0; np],
            loss: 0.0,
        }
    }

    /// Concatenates `[λ; μ]`.
    fn stacked(&self) -> Vec<f64> {
        self.lambda.iter().chain(&self.mu).copied().collect()
    }

    /// Splits `[λ; μ]` back into the state.
    fn unstack(&mut self, z: &[f64]) {
        let n = self.lambda.len();
        self.lambda.copy_from_slice(&z[..n]);
        self.mu.copy_from_slice(&z[n..]);
    }

    /// Applies the loss and event jumps at `stop`.
    ///
    /// `y` enters as the state after the stop's events and leaves as the
    /// state before them.
    #[allow(clippy::too_many_arguments)]
    fn apply_stop<D, C, L>(
        &mut self,
        drift: &D,
        callbacks: &C,
        loss: &L,
        solution: &Solution<f64>,
        stop: &Stop,
        p: &[f64],
        y: &mut Vec<f64>,
    ) -> Result<(), SolverError>
    where
        D: Drift,
        C: Callbacks,
        L: Loss,
    {
        for &i in &stop.saves {
            let (value, gy, gp) = loss_jump(drift, loss, i, solution.t[i], y, p)?;
            self.loss += value;
            add(&mut self.lambda, &gy);
            add(&mut self.mu, &gp);
        }
        for &k in stop.events.iter().rev() {
            let record = &solution.events[k];
            let (lambda, dmu) = event_jump(drift, callbacks, record, p, &self.lambda)?;
            self.lambda = lambda;
            add(&mut self.mu, &dmu);
            y.clone_from(&record.before);
        }
        Ok(())
    }

    /// Builds the gradient, padding `λ` with zeros up to the full state.
    fn finish(self, solution: Solution<f64>, dim: usize, stats: Stats) -> Gradient {
        let mut du0 = self.lambda;
        du0.resize(dim, 0.0);
        Gradient {
            solution,
            loss: self.loss,
            du0,
            dp: self.mu,
            sensitivities: None,
            stats,
        }
    }
}

/// Returns a loss term and its gradient with respect to `y` and `p`.
fn loss_jump<D: Drift, L: Loss>(
    drift: &D,
    loss: &L,
    index: usize,
    t: f64,
    y: &[f64],
    p: &[f64],
) -> Result<(f64, Vec<f64>, Vec<f64>), SolverError> {
    let tape = Tape::new();
    let yv = tape.vars(y);
    let pv = tape.vars(p);
    let u = drift.observe(&yv, &pv, &Var::constant(t))?;
    let term = loss.term(index, t, &u);
    let adjoints = tape.gradient(&term);
    Ok((term.value(), adjoints.wrt_all(&yv), adjoints.wrt_all(&pv)))
}

/// Carries `λ` back through one fired event.
///
/// Returns `λ` before the event and the contribution to `μ`. For a
/// continuous event the event time moves with the state, which adds
///
/// ```text
/// -(c_y, c_p) · (A_yᵀλ·f⁻ + λ·a_t - λ·f⁺) / (c_y·f⁻ + c_t)
/// ```
fn event_jump<D: Drift, C: Callbacks>(
    drift: &D,
    callbacks: &C,
    record: &EventRecord<f64>,
    p: &[f64],
    lambda: &[f64],
) -> Result<(Vec<f64>, Vec<f64>), SolverError> {
    let t = record.t;
    let tape = Tape::new();
    let yv = tape.vars(&record.before);
    let pv = tape.vars(p);
    let tv = tape.var(t);
    let events = CallbackEvents::new(drift, callbacks, &pv);
    let mut after = yv.clone();
    events.affect(record.index, &tv, &mut after)?;

    let adjoints = tape.pullback(&after, lambda);
    let mut lambda_before = adjoints.wrt_all(&yv);
    let mut dmu = adjoints.wrt_all(&pv);
    let a_t = adjoints.wrt(&tv);

    let continuous = events
        .kinds()
        .get(record.index)
        .is_some_and(|kind| kind.is_continuous());
    if !continuous {
        return Ok((lambda_before, dmu));
    }

    let tape = Tape::new();
    let yv = tape.vars(&record.before);
    let pv = tape.vars(p);
    let tv = tape.var(t);
    let condition = CallbackEvents::new(drift, callbacks, &pv).condition(record.index, &tv, &yv)?;
    let grads = tape.gradient(&condition);
    let (c_y, c_p, c_t) = (grads.wrt_all(&yv), grads.wrt_all(&pv), grads.wrt(&tv));

    let f_before = eval(drift, &record.before, p, t)?;
    let f_after = eval(drift, &record.after, p, t)?;
    let w = dot(&lambda_before, &f_before) + a_t - dot(lambda, &f_after);
    let ratio = w / (dot(&c_y, &f_before) + c_t);
    if !ratio.is_finite() {
        return Err(SolverError::NonFinite { t });
    }
    for (l, c) in lambda_before.iter_mut().zip(&c_y) {
        *l -= ratio * c;
    }
    for (m, c) in dmu.iter_mut().zip(&c_p) {
        *m -= ratio * c;
    }
    Ok((lambda_before, dmu))
}

// ============================================================================
// Divergence checks
// ============================================================================

/// Relative distance between a reconstructed state and its record.
fn divergence(reconstructed: &[f64], recorded: &[f64]) -> f64 {
    let scale = max_norm(recorded).max(1.0);
    let diff = reconstructed
        .iter()
        .zip(recorded)
        .fold(0.0, |acc: f64, (a, b)| acc.max((a - b).abs()));
    diff / scale
}

/// Reports a checkpoint comparison and enforces the instability tolerance.
fn check_divergence<O: Observer<Event, Action>>(
    observer: &mut O,
    stats: &mut Stats,
    tolerance: Option<f64>,
    t: f64,
    divergence: f64,
) -> Result<(), Error> {
    stats.checkpoints += 1;
    emit(observer, Event::Checkpoint { t, divergence })?;
    match tolerance {
        Some(tolerance) if divergence.is_nan() || divergence > tolerance => {
            Err(Error::NumericalInstability {
                t,
                divergence,
                tolerance,
            })
        }
        _ => Ok(()),
    }
}

fn add(acc: &mut [f64], v: &[f64]) {
    for (a, b) in acc.iter_mut().zip(v) {
        *a += b;
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn max_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use deriva_core::{Direction, EventKind, Ode, OdeFunction};

    /// `u = [x, v]`, `x' = v`, `v' = -p`.
    struct Fall;

    impl OdeFunction for Fall {
        fn dim(&self) -> usize {
            2
        }

        fn num_params(&self) -> usize {
            1
        }

        fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
            du[0] = u[1].clone();
            du[1] = -p[0].clone();
        }
    }

    /// Reverses and halves the velocity when `x` hits zero.
    struct Bounce;

    impl Callbacks for Bounce {
        fn events(&self) -> Vec<EventKind> {
            vec![EventKind::Continuous {
                direction: Direction::Down,
            }]
        }

        fn condition<T: Scalar>(&self, _index: usize, u: &[T], _p: &[T], _t: &T) -> T {
            u[0].clone()
        }

        fn affect<T: Scalar>(&self, _index: usize, u: &mut [T], _p: &[T], _t: &T) {
            u[1] = -(u[1].clone() * 0.5);
        }
    }

    fn solution(events: Vec<EventRecord<f64>>) -> Solution<f64> {
        Solution {
            status: deriva_solvers::Status::Complete,
            t: vec![0.5, 1.0],
            u: vec![vec![1.0], vec![2.0]],
            state: vec![vec![1.0], vec![2.0]],
            final_time: 1.0,
            final_state: vec![2.0],
            events,
            dense: None,
            path: None,
            stats: deriva_solvers::Stats::default(),
        }
    }

    #[test]
    fn stops_merge_saves_events_and_ends() {
        let record = EventRecord {
            t: 0.5,
            index: 0,
            before: vec![0.5],
            after: vec![1.0],
        };
        let recorded = solution(vec![record]);
        let stops = stops(&recorded, 0.0);
        let times: Vec<f64> = stops.iter().map(|s| s.t).collect();
        assert_eq!(times, vec![1.0, 0.5, 0.0]);
        assert_eq!(stops[0].saves, vec![1]);
        assert_eq!(stops[1].saves, vec![0]);
        assert_eq!(stops[1].events, vec![0]);

        let y0 = [0.1];
        assert_eq!(stops[1].before(&recorded, &y0), vec![0.5]);
        assert_eq!(stops[1].after(&recorded, &y0), vec![1.0]);
        assert_eq!(stops[2].after(&recorded, &y0), vec![0.1]);
    }

    #[test]
    fn continuous_event_jump_matches_finite_differences() {
        // Dropped from x = 1 at rest: impact at τ = √(2/p) with v⁻ = -pτ.
        let ode = Ode::new(Fall);
        let p = [2.0];
        let tau = (2.0_f64 / p[0]).sqrt();
        let v = -p[0] * tau;
        let record = EventRecord {
            t: tau,
            index: 0,
            before: vec![0.0, v],
            after: vec![0.0, -0.5 * v],
        };

        // Loss x(T) at T = 1.5; λ⁺ is its gradient at τ⁺.
        let big_t = 1.5;
        let s = big_t - tau;
        let lambda_after = [1.0, s];

        let (lambda, dmu) =
            event_jump(&ode, &Bounce, &record, &p, &lambda_after).expect("should jump");

        // x(T) as a function of the drop height, through the impact time.
        let x_of = |x0: f64, p: f64| {
            let tau = (2.0 * x0 / p).sqrt();
            let s = big_t - tau;
            0.5 * p * tau * s - 0.5 * p * s * s
        };
        let h = 1e-6;
        let dx0 = (x_of(1.0 + h, p[0]) - x_of(1.0 - h, p[0])) / (2.0 * h);

        // λ_x is constant during the free fall, so it is ∂L/∂x0.
        assert_relative_eq!(lambda[0], dx0, epsilon = 1e-6);
        assert_eq!(dmu.len(), 1);
    }

    #[test]
    fn divergence_is_relative_above_one() {
        assert_relative_eq!(divergence(&[1.0, 10.5], &[1.0, 10.0]), 0.05);
        assert_relative_eq!(divergence(&[0.1], &[0.0]), 0.1);
    }
}
