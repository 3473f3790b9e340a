//! Sensitivity analysis of differential equation solutions.
//!
//! [`gradient`] differentiates a scalar [`Loss`](deriva_core::Loss) summed
//! over the saved states of a solve, with respect to the initial state and
//! the parameters of a [`Problem`](deriva_core::Problem). The method is
//! chosen by a [`SensitivityAlgorithm`]:
//!
//! - forward: continuous forward sensitivities, or dual numbers pushed
//!   through the solver
//! - adjoint: a backward pass after one forward solve, with the state
//!   reconstructed by backsolving, interpolation, or quadrature
//! - discrete: the whole solve recorded on a tape and swept once
//! - shadowing: least-squares shadowing for long-time averages of ODEs
//!
//! Every combination of problem and algorithm is checked by [`validate`]
//! before anything is integrated.
//!
//! # Example
//!
//! ```
//! use deriva_core::{Component, Ode, OdeFunction, Problem, Scalar};
//! use deriva_sensitivity::{Options, SensitivityAlgorithm, gradient_unobserved};
//!
//! /// `u' = -p u`
//! struct Decay;
//!
//! impl OdeFunction for Decay {
//!     fn dim(&self) -> usize {
//!         1
//!     }
//!
//!     fn num_params(&self) -> usize {
//!         1
//!     }
//!
//!     fn eval<T: Scalar>(&self, u: &[T], p: &[T], _t: &T, du: &mut [T]) {
//!         du[0] = -(p[0].clone() * u[0].clone());
//!     }
//! }
//!
//! let problem = Problem::new(Ode::new(Decay), vec![1.0], (0.0, 1.0), vec![2.0])?;
//! let options = Options::new(SensitivityAlgorithm::default());
//! let grad = gradient_unobserved(&problem, &Component(0), &options)?;
//!
//! // u(1) = e^{-p}, so dL/dp = -e^{-2}.
//! assert!((grad.dp[0] + (-2.0_f64).exp()).abs() < 1e-6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod action;
mod adjoint;
mod algorithm;
mod discrete;
mod error;
mod event;
mod forward;
mod forward_diff;
mod gradient;
mod options;
mod select;
mod shadowing;
mod system;

pub mod backend;

pub use action::Action;
pub use algorithm::{Capabilities, Pullback, SensitivityAlgorithm, UserVjp, VjpChoice};
pub use backend::VjpBackend;
pub use error::{ConfigurationError, Error};
pub use event::Event;
pub use gradient::{Gradient, Stats, gradient, gradient_unobserved};
pub use options::Options;
pub use select::validate;
pub use system::{Differentiable, NoDrift, NoiseModel};
