//! Integrators for time-dependent problems.
//!
//! Both integrators step an integrator state `y` through a [`VectorField`] or
//! [`StochasticField`], apply events along the way, and return a
//! [`Solution`] holding the states at the requested save times.
//!
//! # Solvers
//!
//! - [`dopri5`] — adaptive Dormand–Prince 5(4) with dense output and
//!   continuous events
//! - [`euler_maruyama`] — fixed-step Euler–Maruyama for additive-noise SDEs
//!
//! [`VectorField`]: crate::VectorField
//! [`StochasticField`]: euler_maruyama::StochasticField

mod action;
mod event;
mod plan;
mod solution;

pub use action::Action;
pub use event::Event;
pub use plan::Plan;
pub use solution::{EventRecord, NoisePath, Solution, Stats, Status};

pub mod dopri5;
pub mod euler_maruyama;
