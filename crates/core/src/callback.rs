use crate::Scalar;

/// Crossing direction that triggers a continuous event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// The condition goes from negative to non-negative.
    Up,

    /// The condition goes from positive to non-positive.
    Down,

    #[default]
    Either,
}

impl Direction {
    /// Returns `true` if a change from `before` to `after` is a crossing.
    #[must_use]
    pub fn crosses(self, before: f64, after: f64) -> bool {
        let up = before < 0.0 && after >= 0.0;
        let down = before > 0.0 && after <= 0.0;
        match self {
            Self::Up => up,
            Self::Down => down,
            Self::Either => up || down,
        }
    }
}

/// How an event is triggered.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// Fires where the event's condition crosses zero.
    Continuous { direction: Direction },

    /// Fires at fixed times.
    Preset { times: Vec<f64> },
}

impl EventKind {
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous { .. })
    }
}

/// A set of events that modify the state during integration.
///
/// Events are identified by their position in [`events`](Self::events).
/// When event `index` fires at time `t`, the integrator replaces the state
/// with the result of [`affect`](Self::affect).
///
/// `()` implements `Callbacks` as the empty set.
pub trait Callbacks {
    fn events(&self) -> Vec<EventKind>;

    /// Evaluates the condition of a continuous event.
    ///
    /// Only called for [`EventKind::Continuous`] entries. The default is a
    /// constant zero, which never crosses.
    fn condition<T: Scalar>(&self, index: usize, u: &[T], p: &[T], t: &T) -> T {
        let _ = (index, u, p, t);
        T::zero()
    }

    /// Applies event `index` to the state in place.
    fn affect<T: Scalar>(&self, index: usize, u: &mut [T], p: &[T], t: &T);

    /// Returns `true` if at least one event is registered.
    fn is_empty(&self) -> bool {
        self.events().is_empty()
    }
}

impl Callbacks for () {
    fn events(&self) -> Vec<EventKind> {
        Vec::new()
    }

    fn affect<T: Scalar>(&self, _index: usize, _u: &mut [T], _p: &[T], _t: &T) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_directions() {
        assert!(Direction::Up.crosses(-1.0, 0.5));
        assert!(!Direction::Up.crosses(1.0, -0.5));
        assert!(Direction::Down.crosses(1.0, -0.5));
        assert!(Direction::Down.crosses(1.0, 0.0));
        assert!(Direction::Either.crosses(-1.0, 2.0));
        assert!(!Direction::Either.crosses(1.0, 2.0));
    }

    #[test]
    fn unit_has_no_events() {
        assert!(().is_empty());
        let mut u = [1.0];
        ().affect(0, &mut u, &[], &0.0);
        assert_eq!(u, [1.0]);
    }
}
