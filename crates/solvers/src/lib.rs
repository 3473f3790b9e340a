//! Integrators and quadrature for the Deriva framework.
//!
//! The integrators work on an integrator state `y` behind small traits:
//!
//! - [`VectorField`] — the right-hand side stepped by [`transient::dopri5`]
//! - [`EventSet`] — continuous and preset events acting on `y`
//! - [`Drift`] and [`StateMap`] — a parameterized right-hand side and the map
//!   between `y` and the user-facing state `u`
//!
//! [`Integrate`] ties these to the systems in `deriva_core`, so a
//! [`Problem`](deriva_core::Problem) of any class can be solved with a
//! generic scalar type.

mod config;
mod dae;
mod dense;
mod error;
mod field;
mod integrate;

pub mod quadrature;
pub mod transient;

pub use config::{Config, ConfigError, Tolerances};
pub use dae::DaeDrift;
pub use dense::{DenseOutput, DenseStep, Window};
pub use error::SolverError;
pub use field::{
    CallbackEvents, Drift, DriftField, EventSet, FnField, NoEvents, Past, StateMap, VectorField,
};
pub use integrate::{DelayField, Integrate, SdeField, solve};
pub use transient::{Action, Event, EventRecord, NoisePath, Plan, Solution, Stats, Status};
