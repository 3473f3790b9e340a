//! Adaptive Dormand–Prince 5(4) integration with dense output and events.
//!
//! The method is generic over [`Scalar`]: running it on [`Dual`] numbers or
//! taped [`Var`]s differentiates the whole solve, including step-size choices
//! that are made on primal values only.
//!
//! # Events
//!
//! Preset events are step targets: the integrator lands exactly on each time
//! and applies the event there. Continuous events are detected by a sign
//! change of their condition over an accepted step, located with the Illinois
//! method on the step's interpolant, and applied after redoing the step up to
//! the located time.
//!
//! [`Dual`]: deriva_core::Dual
//! [`Var`]: deriva_core::Var

mod roots;
mod tableau;


use deriva_core::{Direction, EventKind, Observer, Scalar};

use crate::{Config, DenseOutput, DenseStep, EventSet, Past, SolverError, Tolerances, VectorField};

use super::plan::{preset_stops, with_breakpoints};
use super::{Action, Event, EventRecord, Plan, Solution, Status};

use tableau::{
    A21, A31, A32, A41, A42, A43, A51, A52, A53, A54, A61, A62, A63, A64, A65, A71, A73, A74, A75,
    A76, C2, C3, C4, C5, D1, D3, D4, D5, D6, D7, E1, E3, E4, E5, E6, E7, MAX_FACTOR, MIN_FACTOR,
    SAFETY,
};

/// Conditions this close to zero right after an event do not count as a side.
const EVENT_ZERO: f64 = 1e-8;

/// Integrates `field` from `tspan.0` to `tspan.1`.
///
/// # Algorithm
///
/// 1. Save the initial state if requested and evaluate the first stage.
/// 2. Attempt a step, clipped so it lands on the next preset event or the
///    end of the span.
/// 3. Reject and shrink the step while the scaled error exceeds one.
/// 4. On acceptance, look for continuous event crossings, save any
///    requested states inside the step, and apply events at the step end.
/// 5. Emit [`Event::Step`] (and [`Event::Callback`] per fired event); stop
///    if the observer returns [`Action::StopEarly`].
///
/// # Errors
///
/// Returns a [`SolverError`] if the step budget runs out, the step size
/// underflows, or the field or an event fails to evaluate.
pub fn solve<T, F, E, O>(
    field: &mut F,
    events: &E,
    y0: Vec<T>,
    tspan: (f64, f64),
    plan: &Plan,
    config: &Config,
    mut observer: O,
) -> Result<Solution<T>, SolverError>
where
    T: Scalar,
    F: VectorField<T>,
    E: EventSet<T>,
    O: Observer<Event, Action>,
{
    let (t0, t1) = tspan;
    let dir = if t1 >= t0 { 1.0 } else { -1.0 };
    if field.needs_history() && dir < 0.0 {
        return Err(SolverError::Unsupported(
            "delay equations can only be integrated forward in time",
        ));
    }

    let tol = config.tolerances();
    let span = (t1 - t0).abs();
    let max_step = match (config.max_step(), field.max_step()) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b).unwrap_or(f64::INFINITY),
    };

    let saves = plan.save_times(t0, t1);
    let stops = with_breakpoints(
        preset_stops(events.kinds(), t0, t1),
        &field.breakpoints(t0, t1),
        t0,
        t1,
    );
    let continuous: Vec<(usize, Direction)> = events
        .kinds()
        .iter()
        .enumerate()
        .filter_map(|(index, kind)| match kind {
            EventKind::Continuous { direction } => Some((index, *direction)),
            EventKind::Preset { .. } => None,
        })
        .collect();

    let n = field.dim();
    let y_start = y0.clone();
    let keep_history = field.needs_history();
    let mut history: Vec<DenseStep<T>> = Vec::new();

    let mut solution = Solution::new(t0, y0.clone());
    if plan.dense {
        solution.dense = Some(DenseOutput::new());
    }

    let mut t = T::from_f64(t0);
    let mut y = y0;
    let mut next_save = 0;
    while next_save < saves.len() && saves[next_save] == t0 {
        solution.save(t0, y.clone());
        next_save += 1;
    }

    let mut k1 = vec![T::zero(); n];
    field.eval(&t, &y, &Past::new(t0, &y_start, &history), &mut k1)?;
    solution.stats.evaluations += 1;
    let mut conditions = eval_conditions(events, &continuous, &t, &y)?;

    let mut h = match config.initial_step() {
        Some(h) => h,
        None => {
            let past = Past::new(t0, &y_start, &history);
            solution.stats.evaluations += 1;
            initial_step(field, &t, &y, &k1, &past, &tol, dir)?
        }
    }
    .min(max_step)
    .min(span);

    let mut next_stop = 0;
    let mut attempts = 0;
    let mut last_rejected = false;

    loop {
        let tv = t.value();
        if (t1 - tv) * dir <= 0.0 {
            break;
        }
        if attempts >= config.max_steps() {
            return Err(SolverError::MaxSteps {
                max_steps: config.max_steps(),
                t: tv,
                t_end: t1,
            });
        }
        attempts += 1;

        // Clip the step to land on the next preset event or the end.
        let target = stops.get(next_stop).map_or(t1, |(s, _)| *s);
        let remaining = (target - tv).abs();
        let stretch = if h < max_step { 1.01 } else { 1.0 };
        let landing = remaining <= h * stretch;
        let (h_t, h_val) = if landing {
            (T::from_f64(target) - t.clone(), target - tv)
        } else {
            (T::from_f64(dir * h), dir * h)
        };

        let past = Past::new(t0, &y_start, &history);
        let attempt = step(field, &t, &h_t, &y, &k1, &past)?;
        solution.stats.evaluations += 6;
        let err = error_norm(&tol, &y, &attempt.y, &attempt.err);

        if err > 1.0 || err.is_nan() {
            solution.stats.rejected += 1;
            let factor = if err.is_finite() {
                (SAFETY * err.powf(-0.2)).max(MIN_FACTOR)
            } else {
                MIN_FACTOR
            };
            h = h_val.abs() * factor;
            last_rejected = true;
            if h < min_step(tv) {
                return Err(if err.is_finite() {
                    SolverError::StepSizeTooSmall { t: tv, h }
                } else {
                    SolverError::NonFinite { t: tv }
                });
            }
            continue;
        }

        let t_new = if landing {
            T::from_f64(target)
        } else {
            t.clone() + h_t.clone()
        };
        let t_new_v = t_new.value();

        // Look for continuous events crossed during the step.
        let mut new_conditions = Vec::new();
        let mut fired: Option<(usize, usize, f64)> = None;
        if !continuous.is_empty() {
            new_conditions = eval_conditions(events, &continuous, &t_new, &attempt.y)?;
            let interpolant = dense_step(&t, &h_t, t_new_v, &y, &attempt).to_values();
            for (slot, &(index, direction)) in continuous.iter().enumerate() {
                if !direction.crosses(conditions[slot], new_conditions[slot]) {
                    continue;
                }
                let g = |theta: f64| {
                    let time = tv + theta * h_val;
                    let state: Vec<T> = interpolant
                        .eval(&time)
                        .into_iter()
                        .map(T::from_f64)
                        .collect();
                    events
                        .condition(index, &T::from_f64(time), &state)
                        .map(|c| c.value())
                };
                let theta = roots::illinois(g, conditions[slot], new_conditions[slot])?;
                if fired.is_none_or(|(_, _, best)| theta < best) {
                    fired = Some((slot, index, theta));
                }
            }
        }

        if let Some((slot, index, theta)) = fired {
            // Redo the step up to the event and apply it there.
            let t_star = tv + theta * h_val;
            let h_star = T::from_f64(t_star) - t.clone();
            let redo = step(field, &t, &h_star, &y, &k1, &past)?;
            solution.stats.evaluations += 6;
            solution.stats.steps += 1;

            let dense = dense_step(&t, &h_star, t_star, &y, &redo);
            save_inside(&mut solution, &saves, &mut next_save, &dense, t_star, dir);
            record_dense(&mut solution, &mut history, keep_history, dense);

            let (t_event, mut y_event) = if plan.event_time_derivatives {
                event_time(events, index, t_star, redo)?
            } else {
                (T::from_f64(t_star), redo.y)
            };

            let step_event = Event::Step {
                t: t_star,
                h: t_star - tv,
                error: err,
            };
            let mut stop = observer.observe(&step_event) == Some(Action::StopEarly);
            let action = apply_event(
                events,
                index,
                &t_event,
                &mut y_event,
                &mut solution,
                &mut observer,
            )?;
            stop |= action == Some(Action::StopEarly);

            t = t_event;
            y = y_event;
            if stop {
                return Ok(finish(solution, t, y, Status::StoppedByObserver));
            }

            let past = Past::new(t0, &y_start, &history);
            field.eval(&t, &y, &past, &mut k1)?;
            solution.stats.evaluations += 1;
            conditions = eval_conditions(events, &continuous, &t, &y)?;
            if conditions[slot].abs() <= EVENT_ZERO {
                conditions[slot] = 0.0;
            }
            h = h_val.abs();
            last_rejected = false;
            continue;
        }

        solution.stats.steps += 1;
        let needs_dense = plan.dense
            || keep_history
            || saves
                .get(next_save)
                .is_some_and(|&s| (s - t_new_v) * dir < 0.0);
        if needs_dense {
            let dense = dense_step(&t, &h_t, t_new_v, &y, &attempt);
            save_inside(&mut solution, &saves, &mut next_save, &dense, t_new_v, dir);
            record_dense(&mut solution, &mut history, keep_history, dense);
        }

        t = t_new;
        let Attempt { y: y_new, k, .. } = attempt;
        y = y_new;
        let [_, _, _, _, _, _, k7] = k;
        k1 = k7;
        conditions = new_conditions;

        let step_event = Event::Step {
            t: t_new_v,
            h: h_val,
            error: err,
        };
        let mut stop = observer.observe(&step_event) == Some(Action::StopEarly);

        // Preset events at the end of the step.
        if landing && stops.get(next_stop).is_some_and(|(s, _)| *s == target) {
            for &index in &stops[next_stop].1 {
                stop |= apply_event(events, index, &t, &mut y, &mut solution, &mut observer)?
                    == Some(Action::StopEarly);
            }
            next_stop += 1;
            let past = Past::new(t0, &y_start, &history);
            field.eval(&t, &y, &past, &mut k1)?;
            solution.stats.evaluations += 1;
            conditions = eval_conditions(events, &continuous, &t, &y)?;
        }

        while next_save < saves.len() && saves[next_save] == t_new_v {
            solution.save(t_new_v, y.clone());
            next_save += 1;
        }

        if stop {
            return Ok(finish(solution, t, y, Status::StoppedByObserver));
        }

        let mut factor = (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR);
        if last_rejected {
            factor = factor.min(1.0);
        }
        h = (h_val.abs() * factor).min(max_step);
        last_rejected = false;
    }

    Ok(finish(solution, t, y, Status::Complete))
}

/// Integrates `field` without observation.
///
/// # Errors
///
/// Returns a [`SolverError`] under the same conditions as [`solve`].
pub fn solve_unobserved<T, F, E>(
    field: &mut F,
    events: &E,
    y0: Vec<T>,
    tspan: (f64, f64),
    plan: &Plan,
    config: &Config,
) -> Result<Solution<T>, SolverError>
where
    T: Scalar,
    F: VectorField<T>,
    E: EventSet<T>,
{
    solve(field, events, y0, tspan, plan, config, ())
}

// ============================================================================
// Steps
// ============================================================================

struct Attempt<T> {
    y: Vec<T>,
    k: [Vec<T>; 7],
    err: Vec<f64>,
}

/// Returns `y + h Σ a_j k_j`.
fn combine<T: Scalar>(y: &[T], h: &T, terms: &[(f64, &[T])]) -> Vec<T> {
    (0..y.len())
        .map(|i| {
            let sum = terms
                .iter()
                .fold(T::zero(), |acc, (a, k)| acc + k[i].clone() * *a);
            y[i].clone() + h.clone() * sum
        })
        .collect()
}

fn step<T, F>(
    field: &mut F,
    t: &T,
    h: &T,
    y: &[T],
    k1: &[T],
    past: &Past<'_, T>,
) -> Result<Attempt<T>, SolverError>
where
    T: Scalar,
    F: VectorField<T>,
{
    let n = y.len();
    let at = |c: f64| t.clone() + h.clone() * c;
    let mut k2 = vec![T::zero(); n];
    let mut k3 = vec![T::zero(); n];
    let mut k4 = vec![T::zero(); n];
    let mut k5 = vec![T::zero(); n];
    let mut k6 = vec![T::zero(); n];
    let mut k7 = vec![T::zero(); n];

    field.eval(&at(C2), &combine(y, h, &[(A21, k1)]), past, &mut k2)?;
    field.eval(&at(C3), &combine(y, h, &[(A31, k1), (A32, &k2)]), past, &mut k3)?;
    field.eval(
        &at(C4),
        &combine(y, h, &[(A41, k1), (A42, &k2), (A43, &k3)]),
        past,
        &mut k4,
    )?;
    field.eval(
        &at(C5),
        &combine(y, h, &[(A51, k1), (A52, &k2), (A53, &k3), (A54, &k4)]),
        past,
        &mut k5,
    )?;
    field.eval(
        &at(1.0),
        &combine(
            y,
            h,
            &[(A61, k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)],
        ),
        past,
        &mut k6,
    )?;
    let y_new = combine(
        y,
        h,
        &[(A71, k1), (A73, &k3), (A74, &k4), (A75, &k5), (A76, &k6)],
    );
    field.eval(&at(1.0), &y_new, past, &mut k7)?;

    let hv = h.value();
    let err = (0..n)
        .map(|i| {
            hv * (E1 * k1[i].value()
                + E3 * k3[i].value()
                + E4 * k4[i].value()
                + E5 * k5[i].value()
                + E6 * k6[i].value()
                + E7 * k7[i].value())
        })
        .collect();

    Ok(Attempt {
        y: y_new,
        k: [k1.to_vec(), k2, k3, k4, k5, k6, k7],
        err,
    })
}

fn error_norm<T: Scalar>(tol: &Tolerances, y: &[T], y_new: &[T], err: &[f64]) -> f64 {
    if err.is_empty() {
        return 0.0;
    }
    let sum: f64 = err
        .iter()
        .zip(y.iter().zip(y_new))
        .map(|(e, (a, b))| {
            let scale = tol.scale(a.value().abs().max(b.value().abs()));
            (e / scale).powi(2)
        })
        .sum();
    (sum / err.len() as f64).sqrt()
}

fn min_step(t: f64) -> f64 {
    16.0 * f64::EPSILON * t.abs().max(1.0)
}

/// Estimates a first step size following Hairer, Nørsett and Wanner.
fn initial_step<T, F>(
    field: &mut F,
    t: &T,
    y: &[T],
    f0: &[T],
    past: &Past<'_, T>,
    tol: &Tolerances,
    dir: f64,
) -> Result<f64, SolverError>
where
    T: Scalar,
    F: VectorField<T>,
{
    let n = y.len().max(1) as f64;
    let scales: Vec<f64> = y.iter().map(|v| tol.scale(v.value().abs())).collect();
    let rms = |v: &mut dyn Iterator<Item = f64>| {
        (v.zip(&scales).map(|(x, s)| (x / s).powi(2)).sum::<f64>() / n).sqrt()
    };

    let d0 = rms(&mut y.iter().map(Scalar::value));
    let d1 = rms(&mut f0.iter().map(Scalar::value));
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };

    let y1: Vec<T> = y
        .iter()
        .zip(f0)
        .map(|(y, f)| T::from_f64(y.value() + dir * h0 * f.value()))
        .collect();
    let mut f1 = vec![T::zero(); y.len()];
    field.eval(&T::from_f64(t.value() + dir * h0), &y1, past, &mut f1)?;

    let d2 = rms(&mut f1.iter().zip(f0).map(|(a, b)| a.value() - b.value())) / h0;
    let h1 = if d1.max(d2) <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(0.2)
    };

    Ok((100.0 * h0).min(h1))
}

fn dense_step<T: Scalar>(t: &T, h: &T, end: f64, y: &[T], attempt: &Attempt<T>) -> DenseStep<T> {
    let [k1, _, k3, k4, k5, k6, k7] = &attempt.k;
    let n = y.len();
    let mut r2 = Vec::with_capacity(n);
    let mut r3 = Vec::with_capacity(n);
    let mut r4 = Vec::with_capacity(n);
    let mut r5 = Vec::with_capacity(n);
    for i in 0..n {
        let diff = attempt.y[i].clone() - y[i].clone();
        let bspl = h.clone() * k1[i].clone() - diff.clone();
        let tail = diff.clone() - h.clone() * k7[i].clone() - bspl.clone();
        let weighted = k1[i].clone() * D1
            + k3[i].clone() * D3
            + k4[i].clone() * D4
            + k5[i].clone() * D5
            + k6[i].clone() * D6
            + k7[i].clone() * D7;
        r2.push(diff);
        r3.push(bspl);
        r4.push(tail);
        r5.push(h.clone() * weighted);
    }
    DenseStep::new(t.clone(), h.clone(), end, [y.to_vec(), r2, r3, r4, r5])
}

// ============================================================================
// Saves and events
// ============================================================================

/// Saves every requested time strictly inside the step.
fn save_inside<T: Scalar>(
    solution: &mut Solution<T>,
    saves: &[f64],
    next_save: &mut usize,
    dense: &DenseStep<T>,
    end: f64,
    dir: f64,
) {
    while *next_save < saves.len() && (saves[*next_save] - end) * dir < 0.0 {
        let s = saves[*next_save];
        solution.save(s, dense.eval(&T::from_f64(s)));
        *next_save += 1;
    }
}

fn record_dense<T: Scalar>(
    solution: &mut Solution<T>,
    history: &mut Vec<DenseStep<T>>,
    keep_history: bool,
    dense: DenseStep<T>,
) {
    if let Some(output) = solution.dense.as_mut() {
        output.push(dense.to_values());
    }
    if keep_history {
        history.push(dense);
    }
}

fn eval_conditions<T, E>(
    events: &E,
    continuous: &[(usize, Direction)],
    t: &T,
    y: &[T],
) -> Result<Vec<f64>, SolverError>
where
    T: Scalar,
    E: EventSet<T>,
{
    continuous
        .iter()
        .map(|&(index, _)| events.condition(index, t, y).map(|c| c.value()))
        .collect()
}

/// Lifts a located event time into the scalar type.
///
/// The condition `c(t, y(t))` vanishes at the event, so to first order
/// `dt_e = -dc / (c_t + c_y · f)`, where `dc` is the derivative carried by
/// the condition evaluated at the fixed time `t_star`.
fn event_time<T, E>(
    events: &E,
    index: usize,
    t_star: f64,
    redo: Attempt<T>,
) -> Result<(T, Vec<T>), SolverError>
where
    T: Scalar,
    E: EventSet<T>,
{
    let Attempt { y, k, .. } = redo;
    let [_, _, _, _, _, _, f] = k;

    let condition = events.condition(index, &T::from_f64(t_star), &y)?;

    let delta = 1e-7 * t_star.abs().max(1.0);
    let shifted = |s: f64| {
        let state: Vec<T> = y
            .iter()
            .zip(&f)
            .map(|(y, f)| T::from_f64(y.value() + s * f.value()))
            .collect();
        events
            .condition(index, &T::from_f64(t_star + s), &state)
            .map(|c| c.value())
    };
    let slope = (shifted(delta)? - shifted(-delta)?) / (2.0 * delta);
    if !slope.is_finite() || slope.abs() < f64::EPSILON {
        return Ok((T::from_f64(t_star), y));
    }

    let value = condition.value();
    let shift = (condition - value) / (-slope);
    let y_event = y
        .iter()
        .zip(&f)
        .map(|(y, f)| y.clone() + f.clone() * shift.clone())
        .collect();
    Ok((shift + t_star, y_event))
}

fn apply_event<T, E, O>(
    events: &E,
    index: usize,
    t: &T,
    y: &mut Vec<T>,
    solution: &mut Solution<T>,
    observer: &mut O,
) -> Result<Option<Action>, SolverError>
where
    T: Scalar,
    E: EventSet<T>,
    O: Observer<Event, Action>,
{
    let before = y.clone();
    events.affect(index, t, y)?;
    solution.events.push(EventRecord {
        t: t.clone(),
        index,
        before,
        after: y.clone(),
    });
    Ok(observer.observe(&Event::Callback {
        t: t.value(),
        index,
    }))
}

fn finish<T: Scalar>(mut solution: Solution<T>, t: T, y: Vec<T>, status: Status) -> Solution<T> {
    solution.status = status;
    solution.final_time = t.value();
    solution.final_state = y;
    solution
}
