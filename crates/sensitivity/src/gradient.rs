use deriva_core::{Callbacks, Loss, Observer, Problem, Scalar, Tape};
use deriva_solvers::{Config, Solution, SolverError};
use nalgebra::DMatrix;

use crate::action::emit;
use crate::backend::Backend;
use crate::{
    Action, Differentiable, Error, Event, Options, SensitivityAlgorithm, adjoint, discrete,
    forward, forward_diff, shadowing, validate,
};

/// The gradient of a loss through a solve.
#[derive(Debug, Clone)]
pub struct Gradient {
    /// The forward solution at the save times.
    pub solution: Solution<f64>,

    /// The loss evaluated on `solution`.
    pub loss: f64,

    /// `dL/du0`, over the full initial state.
    pub du0: Vec<f64>,

    /// `dL/dp`.
    pub dp: Vec<f64>,

    /// `∂u(t_i)/∂[u0; p]` at every save time, for forward algorithms.
    pub sensitivities: Option<Vec<DMatrix<f64>>>,

    pub stats: Stats,
}

/// Work counters for a gradient computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub forward: deriva_solvers::Stats,
    pub backward: deriva_solvers::Stats,

    /// Number of reconstructed states compared against their record.
    pub checkpoints: usize,
}

/// Everything an engine needs besides its algorithm options.
pub(crate) struct Context<'a, S, C, L> {
    pub(crate) problem: &'a Problem<S, C>,
    pub(crate) loss: &'a L,
    pub(crate) config: &'a Config,
    pub(crate) saveat: Vec<f64>,
    pub(crate) instability_tol: Option<f64>,
}

/// Computes the gradient of `loss` with respect to `u0` and `p`.
///
/// The problem and options are validated first; nothing is integrated if
/// they cannot be combined.
///
/// # Errors
///
/// Returns an [`Error`] if validation fails, the solver fails, a
/// reconstructed state diverges beyond the instability tolerance, or the
/// observer aborts.
pub fn gradient<S, C, L, O>(
    problem: &Problem<S, C>,
    loss: &L,
    options: &Options,
    mut observer: O,
) -> Result<Gradient, Error>
where
    S: Differentiable,
    C: Callbacks,
    L: Loss,
    O: Observer<Event, Action>,
{
    use SensitivityAlgorithm as A;

    let vjp = validate(problem, options)?;
    emit(
        &mut observer,
        Event::Validated {
            algorithm: options.algorithm().name(),
            vjp: vjp.as_ref().map(|v| v.name()),
        },
    )?;

    let ctx = Context {
        problem,
        loss,
        config: options.config(),
        saveat: options.save_times(problem.tspan),
        instability_tol: options.instability_tol(),
    };
    let backend = || Backend::new(&vjp.clone().unwrap_or_default());
    let observer = &mut observer;

    match options.algorithm() {
        A::ForwardSensitivity { .. } => forward::solve(&ctx, backend(), observer),
        A::ForwardDiffSensitivity {
            chunk_size,
            convert_tspan,
        } => forward_diff::solve(&ctx, *chunk_size, *convert_tspan, observer),
        A::BacksolveAdjoint { checkpointing, .. } => {
            adjoint::backsolve(&ctx, backend(), *checkpointing, observer)
        }
        A::InterpolatingAdjoint { checkpointing, .. } => {
            adjoint::interpolating(&ctx, backend(), *checkpointing, observer)
        }
        A::QuadratureAdjoint { abstol, reltol, .. } => {
            adjoint::quadrature(&ctx, backend(), *abstol, *reltol, observer)
        }
        A::ReverseDiffAdjoint | A::TrackerAdjoint | A::ZygoteAdjoint | A::PassThrough => {
            discrete::solve(&ctx, observer)
        }
        A::ForwardLss { alpha } => {
            shadowing::solve(&ctx, *alpha, shadowing::Mode::Forward, observer)
        }
        A::AdjointLss { alpha } => {
            shadowing::solve(&ctx, *alpha, shadowing::Mode::Adjoint, observer)
        }
    }
}

/// Computes the gradient without observation.
///
/// # Errors
///
/// Returns an [`Error`] under the same conditions as [`gradient`], except
/// that it is never aborted.
pub fn gradient_unobserved<S, C, L>(
    problem: &Problem<S, C>,
    loss: &L,
    options: &Options,
) -> Result<Gradient, Error>
where
    S: Differentiable,
    C: Callbacks,
    L: Loss,
{
    gradient(problem, loss, options, ())
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Returns the drift of a system that validation has already accepted.
pub(crate) fn require_drift<'a, S: Differentiable>(
    system: &'a S,
    u0: &[f64],
) -> Result<S::Drift<'a>, SolverError> {
    system
        .drift(u0)
        .ok_or(SolverError::Unsupported("continuous sensitivities of delay equations"))
}

/// Evaluates every loss term and its gradient with respect to the saved state.
pub(crate) fn loss_gradients<L: Loss>(loss: &L, solution: &Solution<f64>) -> (f64, Vec<Vec<f64>>) {
    let mut total = 0.0;
    let grads = solution
        .t
        .iter()
        .zip(&solution.u)
        .enumerate()
        .map(|(index, (&t, u))| {
            let tape = Tape::new();
            let uv = tape.vars(u);
            let term = loss.term(index, t, &uv);
            total += term.value();
            tape.gradient(&term).wrt_all(&uv)
        })
        .collect();
    (total, grads)
}

/// Applies the chain rule `Σ_i S_iᵀ g_i` and splits the result into
/// `(du0, dp)`.
pub(crate) fn chain_rule(
    grads: &[Vec<f64>],
    sensitivities: &[DMatrix<f64>],
    dim: usize,
) -> (Vec<f64>, Vec<f64>) {
    let width = sensitivities.first().map_or(dim, |s| s.ncols());
    let mut total = vec![0.0; width];
    for (g, s) in grads.iter().zip(sensitivities) {
        for (j, t) in total.iter_mut().enumerate() {
            *t += s.column(j).iter().zip(g).map(|(a, b)| a * b).sum::<f64>();
        }
    }
    let dp = total.split_off(dim.min(width));
    (total, dp)
}
