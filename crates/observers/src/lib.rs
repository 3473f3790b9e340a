//! Reusable observers for the Deriva framework.
//!
//! This crate provides [`Observer`] implementations and capability traits that
//! work across the integrators in `deriva_solvers` and the gradient driver in
//! `deriva_sensitivity`.
//!
//! # Modules
//!
//! - [`traits`] — Capability traits for cross-solver observers
//!   ([`HasTime`], [`CanStopEarly`])
//! - [`Recorder`] — An observer that keeps a copy of every event it sees
//!
//! [`Observer`]: deriva_core::Observer
//! [`HasTime`]: traits::HasTime
//! [`CanStopEarly`]: traits::CanStopEarly

mod recorder;

pub mod traits;

pub use recorder::Recorder;
