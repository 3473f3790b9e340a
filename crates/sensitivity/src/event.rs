/// Progress events emitted while computing a gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// The problem and algorithm passed validation.
    Validated {
        algorithm: &'static str,

        /// Name of the resolved VJP choice, for algorithms that use one.
        vjp: Option<&'static str>,
    },

    /// The forward solve finished.
    ForwardComplete {
        /// Time the forward solve ended at.
        t: f64,
        steps: usize,
    },

    /// A reconstructed state was compared against its recorded value.
    Checkpoint {
        t: f64,

        /// `‖u_reconstructed - u_recorded‖∞ / max(1, ‖u_recorded‖∞)`.
        divergence: f64,
    },

    /// The backward pass crossed one segment between stop times.
    SegmentComplete { t_start: f64, t_end: f64 },

    /// The backward pass reached the start of the span.
    BackwardComplete { t: f64 },
}

impl Event {
    /// Returns the time the event refers to, if it has one.
    #[must_use]
    pub fn t(&self) -> Option<f64> {
        match self {
            Self::Validated { .. } => None,
            Self::ForwardComplete { t, .. }
            | Self::Checkpoint { t, .. }
            | Self::BackwardComplete { t } => Some(*t),
            Self::SegmentComplete { t_end, .. } => Some(*t_end),
        }
    }
}
