use deriva_core::EquationClass;
use deriva_solvers::SolverError;
use thiserror::Error;

/// A problem and algorithm that cannot be combined.
///
/// Raised by [`validate`](crate::validate) before any integration starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("{algorithm} is not applicable to {class} problems")]
    Inapplicable {
        algorithm: &'static str,
        class: EquationClass,
    },

    #[error("{algorithm} does not support callbacks on {class} problems")]
    Callbacks {
        algorithm: &'static str,
        class: EquationClass,
    },

    #[error("BacksolveAdjoint on a DAE requires reinitialization support")]
    DaeWithoutReinit,

    #[error("ForwardDiffSensitivity with callbacks requires convert_tspan")]
    ConvertTspan,

    #[error("more than one preset event at t = {0}")]
    SimultaneousEvents(f64),

    #[error("continuous callbacks are not supported on stochastic problems")]
    ContinuousSdeEvents,

    #[error("{class} problems integrate forward in time only")]
    BackwardSpan { class: EquationClass },

    #[error("{vjp} is a reverse-mode choice and cannot drive {algorithm}")]
    ReverseVjp {
        vjp: &'static str,
        algorithm: &'static str,
    },

    #[error("{vjp} cannot differentiate in-place functions")]
    Mutation { vjp: &'static str },

    #[error("{vjp} cannot differentiate functions with value-dependent branches")]
    Branching { vjp: &'static str },

    #[error("shadowing needs at least two save intervals, got {0}")]
    SaveIntervals(usize),

    #[error("invalid option: {0}")]
    Option(&'static str),
}

/// Errors that can occur while computing a gradient.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(
        "state diverged from its checkpoint at t = {t}: {divergence:e} exceeds {tolerance:e}"
    )]
    NumericalInstability {
        t: f64,
        divergence: f64,
        tolerance: f64,
    },

    #[error("solver failed: {0}")]
    UpstreamSolver(#[from] SolverError),

    #[error("aborted by observer")]
    Aborted,
}
