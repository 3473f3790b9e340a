use deriva_core::{Callbacks, EquationClass, Loss, Observer};
use deriva_solvers::transient::dopri5;
use deriva_solvers::{DenseOutput, DriftField, FnField, NoEvents, Plan, SolverError, StateMap};

use crate::action::emit;
use crate::backend::VjpBackend;
use crate::gradient::{Context, Stats, require_drift};
use crate::{Action, Differentiable, Error, Event, Gradient};

use super::stochastic::{self, Reconstruction};
use super::{AdjointState, check_divergence, divergence, forward_pass, stops};

/// Gradient by integrating `[λ, μ]` backward against an interpolated state.
///
/// Without `checkpointing` the forward solve keeps dense output for the
/// whole span. With it, only the stop states are kept and each segment is
/// re-solved forward with dense output just before its backward pass.
pub(crate) fn interpolating<S, C, L, B, O>(
    ctx: &Context<'_, S, C, L>,
    mut backend: B,
    checkpointing: bool,
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
    if problem.class() == EquationClass::Sde {
        return stochastic::solve(ctx, backend, Reconstruction::Interpolate, observer);
    }

    let drift = require_drift(&problem.system, &problem.u0)?;
    let p = problem.p.as_slice();
    let solution = forward_pass(ctx, !checkpointing, observer)?;
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
            let segment: DenseOutput;
            let dense = if checkpointing {
                let start = stop.after(&solution, &y0);
                let mut field = DriftField::new(&drift, p);
                let plan = Plan::default().with_dense();
                let run = dopri5::solve_unobserved(
                    &mut field,
                    &NoEvents,
                    start,
                    (stop.t, t_hi),
                    &plan,
                    ctx.config,
                )?;
                stats.forward += run.stats;

                let recorded = stops[i - 1].before(&solution, &y0);
                let drifted = divergence(&run.final_state, &recorded);
                check_divergence(observer, &mut stats, ctx.instability_tol, t_hi, drifted)?;

                segment = run.dense.unwrap_or_default();
                &segment
            } else {
                solution
                    .dense
                    .as_ref()
                    .ok_or(SolverError::Unsupported("forward solve kept no dense output"))?
            };
            let window = dense.window(stop.t, t_hi);
            if window.is_empty() {
                let missing = SolverError::Unsupported("no dense output over a backward segment");
                return Err(missing.into());
            }

            let mut field = FnField::new(n + np, |t: &f64, z: &[f64], dz: &mut [f64]| {
                let y = window.at(*t);
                let (vy, vp) = backend.vjp(&drift, &y, p, *t, &z[..n])?;
                for (d, v) in dz.iter_mut().zip(vy.iter().chain(&vp)) {
                    *d = -v;
                }
                Ok(())
            });
            let run = dopri5::solve_unobserved(
                &mut field,
                &NoEvents,
                state.stacked(),
                (t_hi, stop.t),
                &Plan::default(),
                ctx.config,
            )?;
            stats.backward += run.stats;
            state.unstack(&run.final_state);
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
