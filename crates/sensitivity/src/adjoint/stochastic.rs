//! Discrete adjoint of the Euler–Maruyama recursion.
//!
//! For a step `y⁺ = y + h f(y, p, t) + g(p, t) ⊙ ΔW` the adjoint runs
//!
//! ```text
//! λ ← λ + h J_yᵀ λ,    μ ← μ + h J_pᵀ λ + g_pᵀ (ΔW ⊙ λ)
//! ```
//!
//! over the recorded grid and Brownian increments, so the gradient is exact
//! for the sampled path.

use deriva_core::{Callbacks, Loss, Observer};
use deriva_solvers::{Drift, SolverError, StateMap};

use crate::action::emit;
use crate::backend::{VjpBackend, eval};
use crate::gradient::{Context, Stats, require_drift};
use crate::{Action, Differentiable, Error, Event, Gradient};

use super::{AdjointState, check_divergence, divergence, forward_pass, max_norm, stops};

/// How the backward sweep knows the state at each grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconstruction {
    /// Inverts each step implicitly, optionally resetting at stops.
    Backsolve { checkpointing: bool },

    /// Reads the recorded grid states.
    Interpolate,
}

const INVERSION_ITERATIONS: usize = 100;
const INVERSION_TOL: f64 = 1e-14;

pub(crate) fn solve<S, C, L, B, O>(
    ctx: &Context<'_, S, C, L>,
    mut backend: B,
    reconstruction: Reconstruction,
    observer: &mut O,
) -> Result<Gradient, Error>
where
    S: Differentiable,
    C: Callbacks,
    L: Loss,
    B: VjpBackend,
    O: Observer<Event, Action>,
{
    let problem = ctx.problem;
    let noise = problem
        .system
        .noise()
        .ok_or(SolverError::Unsupported("stochastic adjoint without a noise model"))?;
    let drift = require_drift(&problem.system, &problem.u0)?;
    let p = problem.p.as_slice();

    let solution = forward_pass(ctx, false, observer)?;
    let path = solution
        .path
        .as_ref()
        .ok_or(SolverError::Unsupported("stochastic solve recorded no noise path"))?;
    let stops = stops(&solution, problem.tspan.0);

    let y0 = drift.project(&problem.u0);
    let (n, np) = (y0.len(), p.len());
    let mut stats = Stats {
        forward: solution.stats,
        ..Stats::default()
    };
    let mut state = AdjointState::new(n, np);

    let mut y = stops[0].after(&solution, &y0);
    state.apply_stop(&drift, &problem.callbacks, ctx.loss, &solution, &stops[0], p, &mut y)?;

    let mut next = 1;
    for k in (0..path.dw.len()).rev() {
        let (tk, h) = (path.t[k], path.t[k + 1] - path.t[k]);
        let dw = &path.dw[k];

        let yk = match reconstruction {
            Reconstruction::Interpolate => path.states[k].clone(),
            Reconstruction::Backsolve { .. } => {
                let g = noise.amplitudes(p, tk);
                let target: Vec<f64> = y
                    .iter()
                    .zip(g.iter().zip(dw))
                    .map(|(y, (g, w))| y - g * w)
                    .collect();
                invert_step(&drift, p, tk, h, &target)?
            }
        };

        let (vy, vp) = backend.vjp(&drift, &yk, p, tk, &state.lambda)?;
        let weighted: Vec<f64> = dw.iter().zip(&state.lambda).map(|(w, l)| w * l).collect();
        let noise_grad = noise.pullback(p, tk, &weighted);
        for (l, v) in state.lambda.iter_mut().zip(&vy) {
            *l += h * v;
        }
        for ((m, v), q) in state.mu.iter_mut().zip(&vp).zip(&noise_grad) {
            *m += h * v + q;
        }
        stats.backward.steps += 1;
        stats.backward.evaluations += 1;
        y = yk;

        let at_stop = next < stops.len() && stops[next].t >= tk;
        if let Reconstruction::Backsolve { checkpointing } = reconstruction {
            if (checkpointing && at_stop) || k == 0 {
                let recorded = &path.states[k];
                let drifted = divergence(&y, recorded);
                check_divergence(observer, &mut stats, ctx.instability_tol, tk, drifted)?;
                if checkpointing {
                    y.clone_from(recorded);
                }
            }
        }

        while next < stops.len() && stops[next].t >= tk {
            let stop = &stops[next];
            emit(
                observer,
                Event::SegmentComplete {
                    t_start: stops[next - 1].t,
                    t_end: stop.t,
                },
            )?;
            state.apply_stop(&drift, &problem.callbacks, ctx.loss, &solution, stop, p, &mut y)?;
            next += 1;
        }
    }

    emit(
        observer,
        Event::BackwardComplete {
            t: problem.tspan.0,
        },
    )?;
    Ok(state.finish(solution, problem.u0.len(), stats))
}

/// Solves `y + h f(y, p, t) = target` for `y` by fixed-point iteration.
fn invert_step<D: Drift>(
    drift: &D,
    p: &[f64],
    t: f64,
    h: f64,
    target: &[f64],
) -> Result<Vec<f64>, Error> {
    let mut y = target.to_vec();
    let mut change = f64::INFINITY;
    for _ in 0..INVERSION_ITERATIONS {
        let f = eval(drift, &y, p, t)?;
        let next: Vec<f64> = target.iter().zip(&f).map(|(b, f)| b - h * f).collect();
        change = next
            .iter()
            .zip(&y)
            .fold(0.0, |acc: f64, (a, b)| acc.max((a - b).abs()));
        if !change.is_finite() || next.iter().any(|v| !v.is_finite()) {
            break;
        }
        let tolerance = INVERSION_TOL * max_norm(&next).max(1.0);
        y = next;
        if change <= tolerance {
            return Ok(y);
        }
    }
    Err(Error::NumericalInstability {
        t,
        divergence: change,
        tolerance: INVERSION_TOL,
    })
}
