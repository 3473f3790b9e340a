/// Events emitted by the integrators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// A step was accepted.
    Step {
        /// Time at the end of the step.
        t: f64,

        /// Signed step size.
        h: f64,

        /// Scaled local error estimate; zero for fixed-step methods.
        error: f64,
    },

    /// A callback fired and changed the state.
    Callback {
        /// Time of the event.
        t: f64,

        /// Position of the event in the callback list.
        index: usize,
    },
}

impl Event {
    /// Returns the time the event refers to.
    #[must_use]
    pub fn t(&self) -> f64 {
        match self {
            Self::Step { t, .. } | Self::Callback { t, .. } => *t,
        }
    }
}
