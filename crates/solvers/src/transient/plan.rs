use deriva_core::EventKind;

/// What a solve records besides its final state.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Plan {
    /// Times at which the state is saved.
    ///
    /// Times outside the span are ignored; order does not matter.
    pub saveat: Vec<f64>,

    /// Keep the continuous extension of every step.
    pub dense: bool,

    /// Carry derivatives through located event times.
    ///
    /// With this set, the time of a continuous event becomes a function of
    /// the state and parameters through the implicit function theorem, so
    /// dual or taped scalars see how the event moves.
    pub event_time_derivatives: bool,
}

impl Plan {
    /// Creates a plan that saves at `saveat` and nothing else.
    #[must_use]
    pub fn saving(saveat: Vec<f64>) -> Self {
        Self {
            saveat,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dense(self) -> Self {
        Self {
            dense: true,
            ..self
        }
    }

    #[must_use]
    pub fn with_event_time_derivatives(self) -> Self {
        Self {
            event_time_derivatives: true,
            ..self
        }
    }

    /// Returns the save times inside the span, in integration order.
    pub(crate) fn save_times(&self, t0: f64, t1: f64) -> Vec<f64> {
        let (lo, hi) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        let mut times: Vec<f64> = self
            .saveat
            .iter()
            .copied()
            .filter(|t| (lo..=hi).contains(t))
            .collect();
        sort_along(&mut times, t0, t1, |t| *t);
        times.dedup();
        times
    }
}

/// Groups preset event times inside `(t0, t1]` by time, in integration order.
///
/// Events sharing a time are listed in index order.
pub(crate) fn preset_stops(kinds: &[EventKind], t0: f64, t1: f64) -> Vec<(f64, Vec<usize>)> {
    let dir = if t1 >= t0 { 1.0 } else { -1.0 };
    let mut stops: Vec<(f64, Vec<usize>)> = Vec::new();
    for (index, kind) in kinds.iter().enumerate() {
        let EventKind::Preset { times } = kind else {
            continue;
        };
        for &t in times {
            if (t - t0) * dir <= 0.0 || (t - t1) * dir > 0.0 {
                continue;
            }
            match stops.iter_mut().find(|(s, _)| *s == t) {
                Some((_, indices)) => {
                    if !indices.contains(&index) {
                        indices.push(index);
                    }
                }
                None => stops.push((t, vec![index])),
            }
        }
    }
    sort_along(&mut stops, t0, t1, |(t, _)| *t);
    stops
}

/// Adds landing stops without events at `breakpoints` not already stopped on.
pub(crate) fn with_breakpoints(
    mut stops: Vec<(f64, Vec<usize>)>,
    breakpoints: &[f64],
    t0: f64,
    t1: f64,
) -> Vec<(f64, Vec<usize>)> {
    let dir = if t1 >= t0 { 1.0 } else { -1.0 };
    for &t in breakpoints {
        let inside = (t - t0) * dir > 0.0 && (t - t1) * dir < 0.0;
        if inside && !stops.iter().any(|(s, _)| *s == t) {
            stops.push((t, Vec::new()));
        }
    }
    sort_along(&mut stops, t0, t1, |(t, _)| *t);
    stops
}

fn sort_along<X>(items: &mut [X], t0: f64, t1: f64, key: impl Fn(&X) -> f64) {
    if t0 <= t1 {
        items.sort_by(|a, b| key(a).total_cmp(&key(b)));
    } else {
        items.sort_by(|a, b| key(b).total_cmp(&key(a)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_times_follow_direction() {
        let plan = Plan::saving(vec![0.5, 2.0, 0.0, 0.5, 1.0]);
        assert_eq!(plan.save_times(0.0, 1.0), vec![0.0, 0.5, 1.0]);
        assert_eq!(plan.save_times(1.0, 0.0), vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn preset_stops_group_and_skip_start() {
        let kinds = [
            EventKind::Preset {
                times: vec![0.0, 0.75, 0.25],
            },
            EventKind::Continuous {
                direction: deriva_core::Direction::Up,
            },
            EventKind::Preset {
                times: vec![0.25, 3.0],
            },
        ];
        let stops = preset_stops(&kinds, 0.0, 1.0);
        assert_eq!(stops, vec![(0.25, vec![0, 2]), (0.75, vec![0])]);
    }

    #[test]
    fn breakpoints_become_silent_stops() {
        let stops = vec![(0.5, vec![1])];
        let merged = with_breakpoints(stops, &[0.5, 0.25, 1.0, 0.0], 0.0, 1.0);
        assert_eq!(merged, vec![(0.25, vec![]), (0.5, vec![1])]);
    }
}
