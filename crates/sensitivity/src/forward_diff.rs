use deriva_core::{Callbacks, Dual, Loss, Observer};
use deriva_solvers::Plan;
use nalgebra::DMatrix;

use crate::action::emit;
use crate::gradient::{Context, Stats, chain_rule, loss_gradients};
use crate::{Action, Differentiable, Error, Event, Gradient};

/// Directions carried per pass when the chunk size is left to us.
const AUTO_CHUNK: usize = 12;

/// Gradient by running the solver on dual numbers seeded on `[u0; p]`.
///
/// Directions are split into chunks of `chunk_size`; each chunk is one full
/// solve. With `convert_tspan`, located event times carry derivatives too.
pub(crate) fn solve<S, C, L, O>(
    ctx: &Context<'_, S, C, L>,
    chunk_size: usize,
    convert_tspan: bool,
    observer: &mut O,
) -> Result<Gradient, Error>
where
    S: Differentiable,
    C: Callbacks,
    L: Loss,
    O: Observer<Event, Action>,
{
    let problem = ctx.problem;
    let n = problem.u0.len();
    let width = n + problem.p.len();
    let chunk = match chunk_size {
        0 => width.clamp(1, AUTO_CHUNK),
        size => size,
    };
    let plan = Plan {
        saveat: ctx.saveat.clone(),
        dense: false,
        event_time_derivatives: convert_tspan,
    };

    let pass = |start: usize| {
        let len = chunk.min(width - start);
        let u0 = seeded(&problem.u0, 0, start, len);
        let p = seeded(&problem.p, n, start, len);
        problem
            .system
            .integrate_unobserved(&u0, &p, problem.tspan, &problem.callbacks, &plan, ctx.config)
            .map(|run| (run, len))
    };

    let (run, len) = pass(0)?;
    let mut stats = Stats {
        forward: run.stats,
        ..Stats::default()
    };
    let mut sensitivities: Vec<DMatrix<f64>> = run
        .u
        .iter()
        .map(|u| DMatrix::zeros(u.len(), width))
        .collect();
    fill(&mut sensitivities, &run.u, 0, len);
    let solution = run.to_values();

    let mut start = len;
    while start < width {
        let (run, len) = pass(start)?;
        stats.forward += run.stats;
        fill(&mut sensitivities, &run.u, start, len);
        start += len;
    }

    emit(
        observer,
        Event::ForwardComplete {
            t: solution.final_time,
            steps: solution.stats.steps,
        },
    )?;

    let (loss, grads) = loss_gradients(ctx.loss, &solution);
    let (du0, dp) = chain_rule(&grads, &sensitivities, n);
    Ok(Gradient {
        solution,
        loss,
        du0,
        dp,
        sensitivities: Some(sensitivities),
        stats,
    })
}

/// Seeds `values`, which occupy directions `offset..`, on the directions
/// `start..start + len` of the current pass.
fn seeded(values: &[f64], offset: usize, start: usize, len: usize) -> Vec<Dual> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let direction = offset + i;
            let mut partials = vec![0.0; len];
            if (start..start + len).contains(&direction) {
                partials[direction - start] = 1.0;
            }
            Dual::new(v, partials)
        })
        .collect()
}

/// Copies the partials of one pass into columns `start..start + len`.
fn fill(sensitivities: &mut [DMatrix<f64>], u: &[Vec<Dual>], start: usize, len: usize) {
    for (s, u) in sensitivities.iter_mut().zip(u) {
        for (row, value) in u.iter().enumerate() {
            for c in 0..len {
                s[(row, start + c)] = value.partial(c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_only_the_current_chunk() {
        let seeds = seeded(&[1.0, 2.0, 3.0], 2, 3, 2);
        assert_eq!(seeds[0].partials(), &[0.0, 0.0]);
        assert_eq!(seeds[1].partials(), &[1.0, 0.0]);
        assert_eq!(seeds[2].partials(), &[0.0, 1.0]);
    }
}
