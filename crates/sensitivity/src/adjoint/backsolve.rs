use deriva_core::{Callbacks, EquationClass, Loss, Observer};
use deriva_solvers::transient::dopri5;
use deriva_solvers::{Drift, FnField, NoEvents, Plan, StateMap};

use crate::action::emit;
use crate::backend::VjpBackend;
use crate::gradient::{Context, Stats, require_drift};
use crate::{Action, Differentiable, Error, Event, Gradient};

use super::stochastic::{self, Reconstruction};
use super::{AdjointState, check_divergence, divergence, forward_pass, stops};

/// Gradient by integrating `[y, λ, μ]` backward from the final state.
///
/// The state is always reset to its recorded value before an event. With
/// `checkpointing` it is also reset at every stop after measuring how far
/// it drifted; without it, the drift is measured once at `t0`.
pub(crate) fn backsolve<S, C, L, B, O>(
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
        let mode = Reconstruction::Backsolve { checkpointing };
        return stochastic::solve(ctx, backend, mode, observer);
    }

    let drift = require_drift(&problem.system, &problem.u0)?;
    let p = problem.p.as_slice();
    let solution = forward_pass(ctx, false, observer)?;
    let stops = stops(&solution, problem.tspan.0);

    let y0 = drift.project(&problem.u0);
    let (n, np) = (y0.len(), p.len());
    let mut stats = Stats {
        forward: solution.stats,
        ..Stats::default()
    };
    let mut state = AdjointState::new(n, np);
    let mut y = solution.final_state.clone();
    let last = stops.len() - 1;

    for (i, stop) in stops.iter().enumerate() {
        if i > 0 {
            let t_hi = stops[i - 1].t;
            let z0: Vec<f64> = y.iter().copied().chain(state.stacked()).collect();
            let mut field = FnField::new(2 * n + np, |t: &f64, z: &[f64], dz: &mut [f64]| {
                let (yz, lambda) = (&z[..n], &z[n..2 * n]);
                let (dy, rest) = dz.split_at_mut(n);
                drift.eval(yz, p, t, dy)?;
                let (vy, vp) = backend.vjp(&drift, yz, p, *t, lambda)?;
                for (d, v) in rest.iter_mut().zip(vy.iter().chain(&vp)) {
                    *d = -v;
                }
                Ok(())
            });
            let run = dopri5::solve_unobserved(
                &mut field,
                &NoEvents,
                z0,
                (t_hi, stop.t),
                &Plan::default(),
                ctx.config,
            )?;
            stats.backward += run.stats;
            y = run.final_state[..n].to_vec();
            state.unstack(&run.final_state[n..]);
            emit(
                observer,
                Event::SegmentComplete {
                    t_start: t_hi,
                    t_end: stop.t,
                },
            )?;

            if checkpointing || i == last {
                let recorded = stop.after(&solution, &y0);
                let drifted = divergence(&y, &recorded);
                check_divergence(observer, &mut stats, ctx.instability_tol, stop.t, drifted)?;
                if checkpointing {
                    y = recorded;
                }
            }
        }
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
