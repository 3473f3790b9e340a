//! Core traits and types for the Deriva framework.
//!
//! This crate defines the shared abstractions that solvers, sensitivity
//! engines, and observers build on:
//!
//! - [`Scalar`] — the numeric type every user function is generic over,
//!   implemented for `f64`, [`Dual`] (forward mode), and [`Var`] (reverse mode)
//! - [`Tape`] — an operation record supporting reverse sweeps and compiled
//!   replay through [`CompiledTape`]
//! - [`Problem`] with the systems [`Ode`], [`Sde`], [`Dde`], and [`Dae`]
//! - [`Callbacks`] — continuous and preset-time events
//! - [`Loss`] — a scalar loss summed over saved states
//! - [`Observer`] — receives solver events and optionally returns control actions

mod callback;
mod dual;
mod loss;
mod observer;
mod problems;
mod scalar;
mod tape;

pub use callback::{Callbacks, Direction, EventKind};
pub use dual::Dual;
pub use loss::{Component, Loss, SquaredError, SumOfStates};
pub use observer::Observer;
pub use problems::{
    Dae, DaeFunction, Dde, DelayFunction, EquationClass, Hints, NoiseFunction, Ode, OdeFunction,
    Problem, ProblemError, Sde, System,
};
pub use scalar::Scalar;
pub use tape::{Adjoints, CompiledTape, Tape, Var};
