use deriva_core::{Callbacks, Loss, Observer};
use deriva_solvers::transient::dopri5;
use deriva_solvers::{FnField, NoEvents, Plan, SolverError, StateMap, Tolerances, quadrature};

use crate::action::emit;
use crate::backend::VjpBackend;
use crate::gradient::{Context, Stats, require_drift};
use crate::{Action, ConfigurationError, Differentiable, Error, Event, Gradient};

use super::{AdjointState, add, forward_pass, stops};

/// Gradient by integrating `λ` backward and recovering `μ` by quadrature.
///
/// Each segment is solved for `λ` alone with dense output, after which
///
/// ```text
/// μ(a) = μ(b) + ∫ₐᵇ J_pᵀ λ dt
/// ```
///
/// is evaluated adaptively against both interpolants.
pub(crate) fn quadrature<S, C, L, B, O>(
    ctx: &Context<'_, S, C, L>,
    mut backend: B,
    abstol: f64,
    reltol: f64,
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
    let tolerances = Tolerances::new(abstol, reltol)
        .map_err(|_| ConfigurationError::Option("quadrature tolerances must be positive"))?;

    let drift = require_drift(&problem.system, &problem.u0)?;
    let p = problem.p.as_slice();
    let solution = forward_pass(ctx, true, observer)?;
    let dense = solution
        .dense
        .as_ref()
        .ok_or(SolverError::Unsupported("forward solve kept no dense output"))?;
    let stops = stops(&solution, problem.tspan.0);

    let y0 = drift.project(&problem.u0);
    let (n, np) = (y0.len(), p.len());
    let mut stats = Stats {
        forward: solution.stats,
        ..Stats::default()
    };
    let mut state = AdjointState::new(n, np);

    for (i, stop) in stops.iter().enumerate() {
        if i > 0 {
            let t_hi = stops[i - 1].t;
            let window = dense.window(stop.t, t_hi);
            if window.is_empty() {
                let missing = SolverError::Unsupported("no dense output over a backward segment");
                return Err(missing.into());
            }

            let mut field = FnField::new(n, |t: &f64, lambda: &[f64], dl: &mut [f64]| {
                let y = window.at(*t);
                let (vy, _) = backend.vjp(&drift, &y, p, *t, lambda)?;
                for (d, v) in dl.iter_mut().zip(&vy) {
                    *d = -v;
                }
                Ok(())
            });
            let run = dopri5::solve_unobserved(
                &mut field,
                &NoEvents,
                state.lambda.clone(),
                (t_hi, stop.t),
                &Plan::default().with_dense(),
                ctx.config,
            )?;
            stats.backward += run.stats;
            let adjoint = run.dense.unwrap_or_default();
            let lambda_window = adjoint.window(stop.t, t_hi);
            if lambda_window.is_empty() {
                let missing = SolverError::Unsupported("no dense adjoint over a backward segment");
                return Err(missing.into());
            }

            let integral = quadrature::integrate(
                |t| {
                    let y = window.at(t);
                    let lambda = lambda_window.at(t);
                    backend.vjp(&drift, &y, p, t, &lambda).map(|(_, vp)| vp)
                },
                stop.t,
                t_hi,
                &tolerances,
            )?;
            stats.backward.evaluations += integral.evaluations;
            state.lambda = run.final_state;
            add(&mut state.mu, &integral.value);
            emit(
                observer,
                Event::SegmentComplete {
                    t_start: t_hi,
                    t_end: stop.t,
                },
            )?;
        }

        let mut y = stop.after(&solution, &y0);
        state.apply_stop(
            &drift,
            &problem.callbacks,
            ctx.loss,
            &solution,
            stop,
            p,
            &mut y,
        )?;
    }

    emit(
        observer,
        Event::BackwardComplete {
            t: problem.tspan.0,
        },
    )?;
    Ok(state.finish(solution, problem.u0.len(), stats))
}
