//! Applicability checks run before any integration.

use deriva_core::{Callbacks, EquationClass, EventKind, Hints, Problem};

use crate::{ConfigurationError, Differentiable, Options, SensitivityAlgorithm, VjpChoice};

/// Checks that `options` can be applied to `problem`.
///
/// On success, returns the VJP choice the algorithm will use with `Auto`
/// resolved, or `None` for algorithms that do not take one.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] describing the first violated rule.
pub fn validate<S, C>(
    problem: &Problem<S, C>,
    options: &Options,
) -> Result<Option<VjpChoice>, ConfigurationError>
where
    S: Differentiable,
    C: Callbacks,
{
    use SensitivityAlgorithm as A;

    let algorithm = options.algorithm();
    let name = algorithm.name();
    let class = problem.class();
    let kinds = problem.callbacks.events();
    let has_callbacks = !kinds.is_empty();
    let hints = problem.system.effective_hints();

    let (t0, t1) = problem.tspan;
    if matches!(class, EquationClass::Sde | EquationClass::Dde) && t1 < t0 {
        return Err(ConfigurationError::BackwardSpan { class });
    }
    if class == EquationClass::Sde && kinds.iter().any(EventKind::is_continuous) {
        return Err(ConfigurationError::ContinuousSdeEvents);
    }

    let inapplicable = || ConfigurationError::Inapplicable {
        algorithm: name,
        class,
    };
    let no_callbacks = || ConfigurationError::Callbacks {
        algorithm: name,
        class,
    };

    match algorithm {
        A::ForwardSensitivity { autojacvec } => {
            if class != EquationClass::Ode {
                return Err(inapplicable());
            }
            if has_callbacks {
                return Err(no_callbacks());
            }
            resolve_forward(autojacvec, name).map(Some)
        }

        A::ForwardDiffSensitivity { convert_tspan, .. } => {
            if has_callbacks && !convert_tspan {
                return Err(ConfigurationError::ConvertTspan);
            }
            Ok(None)
        }

        A::BacksolveAdjoint { autojacvec, .. } => {
            match class {
                EquationClass::Ode | EquationClass::Sde => {}
                EquationClass::Dae if problem.system.reinit() => {}
                EquationClass::Dae => return Err(ConfigurationError::DaeWithoutReinit),
                EquationClass::Dde => return Err(inapplicable()),
            }
            single_event_per_time(&kinds)?;
            resolve_reverse(autojacvec, hints).map(Some)
        }

        A::InterpolatingAdjoint { autojacvec, .. } => {
            match class {
                EquationClass::Ode | EquationClass::Sde => {}
                EquationClass::Dae if has_callbacks => return Err(no_callbacks()),
                EquationClass::Dae => {}
                EquationClass::Dde => return Err(inapplicable()),
            }
            single_event_per_time(&kinds)?;
            resolve_reverse(autojacvec, hints).map(Some)
        }

        A::QuadratureAdjoint {
            autojacvec,
            abstol,
            reltol,
        } => {
            if class != EquationClass::Ode {
                return Err(inapplicable());
            }
            if !abstol.is_finite() || *abstol <= 0.0 || !reltol.is_finite() || *reltol < 0.0 {
                return Err(ConfigurationError::Option(
                    "quadrature tolerances must be finite, with abstol positive",
                ));
            }
            single_event_per_time(&kinds)?;
            resolve_reverse(autojacvec, hints).map(Some)
        }

        A::ZygoteAdjoint if hints.in_place => Err(ConfigurationError::Mutation { vjp: "Zygote" }),

        A::ReverseDiffAdjoint | A::TrackerAdjoint | A::ZygoteAdjoint | A::PassThrough => Ok(None),

        A::ForwardLss { alpha } | A::AdjointLss { alpha } => {
            if class != EquationClass::Ode {
                return Err(inapplicable());
            }
            if has_callbacks {
                return Err(no_callbacks());
            }
            if !alpha.is_finite() || *alpha <= 0.0 {
                return Err(ConfigurationError::Option(
                    "alpha must be finite and positive",
                ));
            }
            let intervals = options.save_times(problem.tspan).len().saturating_sub(1);
            if intervals < 2 {
                return Err(ConfigurationError::SaveIntervals(intervals));
            }
            Ok(None)
        }
    }
}

fn resolve_forward(
    choice: &VjpChoice,
    algorithm: &'static str,
) -> Result<VjpChoice, ConfigurationError> {
    match choice {
        VjpChoice::Auto => Ok(VjpChoice::ForwardMode),
        VjpChoice::ForwardMode | VjpChoice::Numerical => Ok(choice.clone()),
        _ => Err(ConfigurationError::ReverseVjp {
            vjp: choice.name(),
            algorithm,
        }),
    }
}

fn resolve_reverse(choice: &VjpChoice, hints: Hints) -> Result<VjpChoice, ConfigurationError> {
    let choice = match choice {
        VjpChoice::Auto => VjpChoice::ReverseDiff {
            compile: !hints.branching,
        },
        other => other.clone(),
    };
    let caps = choice.capabilities();
    if hints.in_place && !caps.mutation {
        return Err(ConfigurationError::Mutation { vjp: choice.name() });
    }
    if hints.branching && !caps.branching {
        return Err(ConfigurationError::Branching { vjp: choice.name() });
    }
    Ok(choice)
}

/// Rejects two preset events sharing a time.
fn single_event_per_time(kinds: &[EventKind]) -> Result<(), ConfigurationError> {
    let mut times: Vec<f64> = kinds
        .iter()
        .filter_map(|kind| match kind {
            EventKind::Preset { times } => Some(times.iter().copied()),
            EventKind::Continuous { .. } => None,
        })
        .flatten()
        .collect();
    times.sort_by(f64::total_cmp);
    match times.windows(2).find(|w| w[0] == w[1]) {
        Some(w) => Err(ConfigurationError::SimultaneousEvents(w[0])),
        None => Ok(()),
    }
}
