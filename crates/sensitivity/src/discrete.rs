use deriva_core::{Callbacks, Loss, Observer, Scalar, Tape, Var};
use deriva_solvers::Plan;

use crate::action::emit;
use crate::gradient::{Context, Stats};
use crate::{Action, Differentiable, Error, Event, Gradient};

/// Gradient by recording the whole solve on a tape.
///
/// Every arithmetic operation of the integrator, including step size
/// control, event location, and event effects, is recorded, and one reverse
/// sweep of the tape yields `dL/du0` and `dL/dp`. This is the exact
/// derivative of the discretized solve, for any equation class.
pub(crate) fn solve<S, C, L, O>(
    ctx: &Context<'_, S, C, L>,
    observer: &mut O,
) -> Result<Gradient, Error>
where
    S: Differentiable,
    C: Callbacks,
    L: Loss,
    O: Observer<Event, Action>,
{
    let problem = ctx.problem;
    let tape = Tape::new();
    let u0 = tape.vars(&problem.u0);
    let p = tape.vars(&problem.p);
    let plan = Plan {
        saveat: ctx.saveat.clone(),
        dense: false,
        event_time_derivatives: true,
    };

    let run = problem
        .system
        .integrate_unobserved(&u0, &p, problem.tspan, &problem.callbacks, &plan, ctx.config)?;
    emit(
        observer,
        Event::ForwardComplete {
            t: run.final_time,
            steps: run.stats.steps,
        },
    )?;

    let total = run
        .t
        .iter()
        .zip(&run.u)
        .enumerate()
        .fold(Var::constant(0.0), |acc, (index, (&t, u))| {
            acc + ctx.loss.term(index, t, u)
        });
    let adjoints = tape.gradient(&total);
    emit(
        observer,
        Event::BackwardComplete {
            t: problem.tspan.0,
        },
    )?;

    Ok(Gradient {
        solution: run.to_values(),
        loss: total.value(),
        du0: adjoints.wrt_all(&u0),
        dp: adjoints.wrt_all(&p),
        sensitivities: None,
        stats: Stats {
            forward: run.stats,
            ..Stats::default()
        },
    })
}
