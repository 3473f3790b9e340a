//! Capability traits for cross-solver observers.
//!
//! These traits abstract over the event and action types of the integrators
//! and of the gradient driver, so one observer can watch either.
//!
//! # Event traits
//!
//! - [`HasTime`] — events that may refer to a point in time
//!
//! # Action traits
//!
//! - [`CanStopEarly`] — actions that can signal early termination
//!
//! # Example
//!
//! ```rust
//! use deriva_core::Observer;
//! use deriva_observers::traits::{CanStopEarly, HasTime};
//!
//! /// Stops once an event moves past `t_max`.
//! struct Deadline {
//!     t_max: f64,
//! }
//!
//! impl<E: HasTime, A: CanStopEarly> Observer<E, A> for Deadline {
//!     fn observe(&mut self, event: &E) -> Option<A> {
//!         match event.time() {
//!             Some(t) if t > self.t_max => Some(A::stop_early()),
//!             _ => None,
//!         }
//!     }
//! }
//! ```

use deriva_sensitivity as sensitivity;
use deriva_solvers::transient;

/// An event that may refer to a point in time.
pub trait HasTime {
    /// Returns the time of this event.
    ///
    /// Returns `None` for events that are not tied to a time, such as a
    /// validation notice.
    fn time(&self) -> Option<f64>;
}

/// An action type that can signal early termination.
pub trait CanStopEarly {
    /// Returns the action that stops the computation early.
    fn stop_early() -> Self;
}

// --- HasTime ---

impl HasTime for transient::Event {
    fn time(&self) -> Option<f64> {
        Some(self.t())
    }
}

impl HasTime for sensitivity::Event {
    fn time(&self) -> Option<f64> {
        self.t()
    }
}

// --- CanStopEarly ---

impl CanStopEarly for transient::Action {
    fn stop_early() -> Self {
        Self::StopEarly
    }
}

/// A gradient cannot be returned from a partial run, so stopping aborts.
impl CanStopEarly for sensitivity::Action {
    fn stop_early() -> Self {
        Self::Abort
    }
}
