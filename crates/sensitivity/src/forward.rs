//! Continuous forward sensitivities.
//!
//! The state is augmented with `S = ∂y/∂[y0; p]`, an `n × (n + np)` matrix
//! stored column by column after `y`, and integrated with
//!
//! ```text
//! dS/dt = J_y S + [0 | J_p]
//! ```
//!
//! where each column of the right-hand side is one JVP.

use deriva_core::{Callbacks, Loss, Observer};
use deriva_solvers::transient::dopri5;
use deriva_solvers::{Config, Drift, FnField, NoEvents, Plan, Solution, SolverError};
use nalgebra::DMatrix;

use crate::action::emit;
use crate::backend::{VjpBackend, eval};
use crate::gradient::{Context, Stats, chain_rule, loss_gradients, require_drift};
use crate::{Action, Differentiable, Error, Event, Gradient};

/// A solve of the state together with its sensitivity matrix.
pub(crate) struct Augmented {
    /// The state alone, saved at the requested times.
    pub(crate) solution: Solution<f64>,

    /// `S` at each save time.
    pub(crate) saved: Vec<DMatrix<f64>>,

    /// `S` at the end of the span.
    pub(crate) last: DMatrix<f64>,
}

/// Integrates `y` and `S` over `tspan`, starting from `S(t0) = s0`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn augmented<D: Drift, B: VjpBackend>(
    drift: &D,
    backend: &mut B,
    y0: &[f64],
    s0: &DMatrix<f64>,
    p: &[f64],
    tspan: (f64, f64),
    saveat: &[f64],
    config: &Config,
) -> Result<Augmented, SolverError> {
    let n = y0.len();
    let m = s0.ncols();
    let np = p.len();

    let z0: Vec<f64> = y0.iter().chain(s0.as_slice()).copied().collect();
    let mut field = FnField::new(n * (m + 1), |t: &f64, z: &[f64], dz: &mut [f64]| {
        let (y, s) = z.split_at(n);
        let (dy, ds) = dz.split_at_mut(n);
        dy.copy_from_slice(&eval(drift, y, p, *t)?);

        let mut q = vec![0.0; np];
        for j in 0..m {
            let w = &s[j * n..(j + 1) * n];
            q.fill(0.0);
            let forcing = j + np >= m;
            if forcing {
                q[j + np - m] = 1.0;
            }
            let column = backend.jvp(drift, y, p, *t, w, &q)?;
            ds[j * n..(j + 1) * n].copy_from_slice(&column);
        }
        Ok(())
    });

    let plan = Plan::saving(saveat.to_vec());
    let run = dopri5::solve_unobserved(&mut field, &NoEvents, z0, tspan, &plan, config)?;

    let split = |z: &[f64]| DMatrix::from_column_slice(n, m, &z[n..]);
    let solution = Solution {
        status: run.status,
        t: run.t.clone(),
        u: run.state.iter().map(|z| z[..n].to_vec()).collect(),
        state: run.state.iter().map(|z| z[..n].to_vec()).collect(),
        final_time: run.final_time,
        final_state: run.final_state[..n].to_vec(),
        events: Vec::new(),
        dense: None,
        path: None,
        stats: run.stats,
    };
    Ok(Augmented {
        saved: run.state.iter().map(|z| split(z)).collect(),
        last: split(&run.final_state),
        solution,
    })
}

/// Gradient by continuous forward sensitivities.
pub(crate) fn solve<S, C, L, B, O>(
    ctx: &Context<'_, S, C, L>,
    mut backend: B,
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
    let drift = require_drift(&problem.system, &problem.u0)?;
    let n = problem.u0.len();
    let np = problem.p.len();

    let s0 = DMatrix::identity(n, n + np);
    let run = augmented(
        &drift,
        &mut backend,
        &problem.u0,
        &s0,
        &problem.p,
        problem.tspan,
        &ctx.saveat,
        ctx.config,
    )?;
    emit(
        observer,
        Event::ForwardComplete {
            t: run.solution.final_time,
            steps: run.solution.stats.steps,
        },
    )?;

    let (loss, grads) = loss_gradients(ctx.loss, &run.solution);
    let (du0, dp) = chain_rule(&grads, &run.saved, n);
    Ok(Gradient {
        stats: Stats {
            forward: run.solution.stats,
            ..Stats::default()
        },
        solution: run.solution,
        loss,
        du0,
        dp,
        sensitivities: Some(run.saved),
    })
}
