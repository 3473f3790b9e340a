use thiserror::Error;

/// Errors that can occur during integration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("exceeded {max_steps} steps before reaching t = {t_end} (stopped at t = {t})")]
    MaxSteps { max_steps: usize, t: f64, t_end: f64 },

    #[error("step size {h:e} too small at t = {t}")]
    StepSizeTooSmall { t: f64, h: f64 },

    #[error("non-finite state at t = {t}")]
    NonFinite { t: f64 },

    #[error("algebraic variables did not converge at t = {t} (residual {residual:e})")]
    Newton { t: f64, residual: f64 },

    #[error("constraint jacobian is singular at t = {t}")]
    SingularJacobian { t: f64 },

    #[error("adaptive quadrature did not converge (error estimate {estimate:e})")]
    Quadrature { estimate: f64 },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}
