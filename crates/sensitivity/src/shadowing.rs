//! Least-squares shadowing for long-time-averaged losses.
//!
//! Over the save grid `t_0 < … < t_K`, the shadowing direction `v_i` and
//! the time dilations `η_i` minimize
//!
//! ```text
//! ½ Σ |v_i|² + ½ α² Σ η_i²    subject to    v_{i+1} = Φ_i v_i + b_i + η_i f(u_{i+1})
//! ```
//!
//! where `Φ_i` and `b_i` are the state and parameter sensitivities of the
//! flow from `t_i` to `t_{i+1}`. The loss derivative is then
//!
//! ```text
//! dL/dp = Σ g_i · v_i + Σ η_i (ℓ_{i+1} - ℓ̄)
//! ```
//!
//! with `g_i` and `ℓ_i` the gradient and value of loss term `i` and `ℓ̄` their
//! mean. Both modes factor the KKT matrix of the problem once: the forward
//! mode solves it against one right-hand side per parameter, the adjoint mode
//! against the loss weights only.

use deriva_core::{Callbacks, Loss, Observer};
use deriva_solvers::{Plan, SolverError};
use nalgebra::{DMatrix, DVector};

use crate::action::emit;
use crate::backend::{DualBackend, eval};
use crate::forward::augmented;
use crate::gradient::{Context, Stats, loss_gradients, require_drift};
use crate::{Action, Differentiable, Error, Event, Gradient};

/// Which side of the KKT system is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Forward,
    Adjoint,
}

pub(crate) fn solve<S, C, L, O>(
    ctx: &Context<'_, S, C, L>,
    alpha: f64,
    mode: Mode,
    observer: &mut O,
) -> Result<Gradient, Error>
where
    S: Differentiable,
    C: Callbacks,
    L: Loss,
    O: Observer<Event, Action>,
{
    let problem = ctx.problem;
    let drift = require_drift(&problem.system, &problem.u0)?;
    let p = problem.p.as_slice();
    let (n, np) = (problem.u0.len(), p.len());

    let plan = Plan::saving(ctx.saveat.clone());
    let solution = problem.system.integrate_unobserved(
        &problem.u0,
        p,
        problem.tspan,
        &problem.callbacks,
        &plan,
        ctx.config,
    )?;
    let mut stats = Stats {
        forward: solution.stats,
        ..Stats::default()
    };

    let intervals = solution.t.len().saturating_sub(1);
    let s0 = DMatrix::identity(n, n + np);
    let mut flows = Vec::with_capacity(intervals);
    for i in 0..intervals {
        let span = (solution.t[i], solution.t[i + 1]);
        let run = augmented(
            &drift,
            &mut DualBackend,
            &solution.state[i],
            &s0,
            p,
            span,
            &[],
            ctx.config,
        )?;
        stats.forward += run.solution.stats;
        flows.push(run.last);
    }
    emit(
        observer,
        Event::ForwardComplete {
            t: solution.final_time,
            steps: stats.forward.steps,
        },
    )?;

    let rates = solution
        .t
        .iter()
        .zip(&solution.state)
        .map(|(&t, y)| eval(&drift, y, p, t))
        .collect::<Result<Vec<_>, _>>()?;
    let terms: Vec<f64> = solution
        .t
        .iter()
        .zip(&solution.u)
        .enumerate()
        .map(|(index, (&t, u))| ctx.loss.term(index, t, u))
        .collect();
    let (loss, grads) = loss_gradients(ctx.loss, &solution);

    let kkt = Kkt::new(n, np, alpha, &flows, &rates);
    let weights = kkt.weights(&grads, &terms);
    let (size, offset) = (kkt.size(), kkt.constraints());
    let forcing = kkt.forcing();
    let lu = kkt.matrix.lu();
    let singular = || SolverError::SingularJacobian { t: problem.tspan.0 };

    let dp = match mode {
        Mode::Forward => {
            let x = lu.solve(&forcing).ok_or_else(singular)?;
            (0..np)
                .map(|j| x.column(j).rows(0, weights.len()).dot(&weights))
                .collect()
        }
        Mode::Adjoint => {
            let mut rhs = DVector::zeros(size);
            rhs.rows_mut(0, weights.len()).copy_from(&weights);
            let z = lu.solve(&rhs).ok_or_else(singular)?;
            let multipliers = z.rows(offset, intervals * n);
            (0..np)
                .map(|j| multipliers.dot(&forcing.column(j).rows(offset, intervals * n)))
                .collect()
        }
    };
    stats.backward.evaluations += intervals;
    emit(
        observer,
        Event::BackwardComplete {
            t: problem.tspan.0,
        },
    )?;

    Ok(Gradient {
        solution,
        loss,
        du0: vec![0.0; n],
        dp,
        sensitivities: None,
        stats,
    })
}

/// The KKT system of the shadowing problem.
///
/// Unknowns are ordered `[v_0 … v_K, η_0 … η_{K-1}, w_0 … w_{K-1}]`, with
/// `w_i` the multipliers of the step constraints.
struct Kkt<'a> {
    n: usize,
    np: usize,
    flows: &'a [DMatrix<f64>],
    matrix: DMatrix<f64>,
}

impl<'a> Kkt<'a> {
    fn new(n: usize, np: usize, alpha: f64, flows: &'a [DMatrix<f64>], rates: &[Vec<f64>]) -> Self {
        let intervals = flows.len();
        let nv = (intervals + 1) * n;
        let nc = nv + intervals;
        let size = nc + intervals * n;

        let mut matrix = DMatrix::zeros(size, size);
        for k in 0..nv {
            matrix[(k, k)] = 1.0;
        }
        for i in 0..intervals {
            matrix[(nv + i, nv + i)] = alpha * alpha;
        }

        let mut constrain = |row: usize, col: usize, value: f64| {
            matrix[(row, col)] = value;
            matrix[(col, row)] = value;
        };
        for (i, flow) in flows.iter().enumerate() {
            for a in 0..n {
                let row = nc + i * n + a;
                for b in 0..n {
                    constrain(row, i * n + b, -flow[(a, b)]);
                }
                constrain(row, (i + 1) * n + a, 1.0);
                constrain(row, nv + i, -rates[i + 1][a]);
            }
        }

        Self {
            n,
            np,
            flows,
            matrix,
        }
    }

    fn size(&self) -> usize {
        self.matrix.nrows()
    }

    /// Offset of the first multiplier.
    fn constraints(&self) -> usize {
        (self.flows.len() + 1) * self.n + self.flows.len()
    }

    /// Stacks `b_i` for parameter `j`.
    fn forcing_column(&self, j: usize) -> DVector<f64> {
        let n = self.n;
        DVector::from_iterator(
            self.flows.len() * n,
            self.flows
                .iter()
                .flat_map(|flow| (0..n).map(move |a| flow[(a, n + j)])),
        )
    }

    /// One right-hand side per parameter, zero outside the constraints.
    fn forcing(&self) -> DMatrix<f64> {
        let offset = self.constraints();
        let mut rhs = DMatrix::zeros(self.size(), self.np);
        for j in 0..self.np {
            let column = self.forcing_column(j);
            rhs.column_mut(j).rows_mut(offset, column.len()).copy_from(&column);
        }
        rhs
    }

    /// Loss weights on `[v; η]`.
    fn weights(&self, grads: &[Vec<f64>], terms: &[f64]) -> DVector<f64> {
        let intervals = self.flows.len();
        let mean = terms.iter().sum::<f64>() / terms.len().max(1) as f64;
        let v = grads.iter().flatten().copied();
        let eta = terms.iter().skip(1).map(|term| term - mean);
        DVector::from_iterator((intervals + 1) * self.n + intervals, v.chain(eta))
    }
}
