//! Sensitivity algorithms and vector-Jacobian product choices.

use std::fmt;
use std::sync::Arc;

/// Reverse pass returned by a [`UserVjp`]: maps `v` to `(J_uᵀv, J_pᵀv)`.
pub type Pullback = Box<dyn Fn(&[f64]) -> (Vec<f64>, Vec<f64>)>;

type VjpFn = dyn Fn(&[f64], &[f64], f64) -> (Vec<f64>, Pullback) + Send + Sync;

/// A hand-written vector-Jacobian product.
///
/// Called with `(u, p, t)`, it returns `f(u, p, t)` and a [`Pullback`].
#[derive(Clone)]
pub struct UserVjp(Arc<VjpFn>);

impl UserVjp {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[f64], &[f64], f64) -> (Vec<f64>, Pullback) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Evaluates the function and returns its pullback.
    #[must_use]
    pub fn call(&self, u: &[f64], p: &[f64], t: f64) -> (Vec<f64>, Pullback) {
        (self.0)(u, p, t)
    }
}

impl fmt::Debug for UserVjp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserVjp(..)")
    }
}

impl PartialEq for UserVjp {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// What a VJP backend can differentiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Handles functions that write into their output buffer.
    pub mutation: bool,

    /// Replays a recorded trace instead of re-tracing every call.
    pub compiled: bool,

    /// Handles control flow that depends on the evaluated values.
    pub branching: bool,
}

/// How adjoint engines compute `J_uᵀλ` and `J_pᵀλ`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VjpChoice {
    /// Let the selector pick from the function's hints.
    #[default]
    Auto,

    /// Reverse mode on a tape, optionally compiled once and replayed.
    ReverseDiff { compile: bool },

    /// Reverse mode on a fresh tape per call.
    Tracker,

    /// Reverse mode on a fresh tape per call; rejects in-place functions.
    Zygote,

    /// Reverse mode on a fresh tape per call.
    Enzyme,

    /// Forward-mode duals, one pass per column.
    ForwardMode,

    /// Central finite differences.
    Numerical,

    /// A hand-written product.
    #[cfg_attr(feature = "serde", serde(skip))]
    UserProvided(UserVjp),
}

impl VjpChoice {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::ReverseDiff { compile: false } => "ReverseDiff",
            Self::ReverseDiff { compile: true } => "ReverseDiff (compiled)",
            Self::Tracker => "Tracker",
            Self::Zygote => "Zygote",
            Self::Enzyme => "Enzyme",
            Self::ForwardMode => "ForwardMode",
            Self::Numerical => "Numerical",
            Self::UserProvided(_) => "UserProvided",
        }
    }

    /// Returns `true` for choices that only provide reverse-mode products.
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        matches!(
            self,
            Self::ReverseDiff { .. }
                | Self::Tracker
                | Self::Zygote
                | Self::Enzyme
                | Self::UserProvided(_)
        )
    }

    /// Returns what the backend behind this choice supports.
    ///
    /// `Auto` reports the capabilities of a non-compiled tape.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        let compiled = matches!(self, Self::ReverseDiff { compile: true });
        Capabilities {
            mutation: !matches!(self, Self::Zygote),
            compiled,
            branching: !compiled,
        }
    }
}

/// A method for computing gradients through a solve.
///
/// Each variant carries its own options and applies only to some equation
/// classes; see [`validate`](crate::validate).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensitivityAlgorithm {
    /// Continuous forward sensitivities integrated alongside the state.
    ForwardSensitivity { autojacvec: VjpChoice },

    /// The solver run on dual numbers seeded on `[u0; p]`.
    ///
    /// `chunk_size` directions are carried per pass; zero picks
    /// `min(n + np, 12)`.
    ForwardDiffSensitivity {
        chunk_size: usize,
        convert_tspan: bool,
    },

    /// Integrates the state backward together with the adjoint.
    BacksolveAdjoint {
        autojacvec: VjpChoice,
        checkpointing: bool,
    },

    /// Reads the state from the forward interpolant.
    InterpolatingAdjoint {
        autojacvec: VjpChoice,
        checkpointing: bool,
    },

    /// Integrates the adjoint alone, then the parameter gradient by
    /// Gauss–Kronrod quadrature.
    QuadratureAdjoint {
        autojacvec: VjpChoice,
        abstol: f64,
        reltol: f64,
    },

    ReverseDiffAdjoint,
    TrackerAdjoint,
    ZygoteAdjoint,

    /// Differentiates straight through the solver.
    PassThrough,

    /// Forward least-squares shadowing with time dilation weight `alpha`.
    ForwardLss { alpha: f64 },

    /// Adjoint least-squares shadowing with time dilation weight `alpha`.
    AdjointLss { alpha: f64 },
}

impl Default for SensitivityAlgorithm {
    fn default() -> Self {
        Self::InterpolatingAdjoint {
            autojacvec: VjpChoice::Auto,
            checkpointing: false,
        }
    }
}

impl SensitivityAlgorithm {
    /// Default time dilation weight of the shadowing variants.
    pub const DEFAULT_ALPHA: f64 = 10.0;

    /// Returns a quadrature adjoint with tolerances `abstol = 1e-6`,
    /// `reltol = 1e-3`.
    #[must_use]
    pub fn quadrature(autojacvec: VjpChoice) -> Self {
        Self::QuadratureAdjoint {
            autojacvec,
            abstol: 1e-6,
            reltol: 1e-3,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ForwardSensitivity { .. } => "ForwardSensitivity",
            Self::ForwardDiffSensitivity { .. } => "ForwardDiffSensitivity",
            Self::BacksolveAdjoint { .. } => "BacksolveAdjoint",
            Self::InterpolatingAdjoint { .. } => "InterpolatingAdjoint",
            Self::QuadratureAdjoint { .. } => "QuadratureAdjoint",
            Self::ReverseDiffAdjoint => "ReverseDiffAdjoint",
            Self::TrackerAdjoint => "TrackerAdjoint",
            Self::ZygoteAdjoint => "ZygoteAdjoint",
            Self::PassThrough => "PassThrough",
            Self::ForwardLss { .. } => "ForwardLSS",
            Self::AdjointLss { .. } => "AdjointLSS",
        }
    }

    /// Returns the VJP choice carried by the variant, if any.
    #[must_use]
    pub fn autojacvec(&self) -> Option<&VjpChoice> {
        match self {
            Self::ForwardSensitivity { autojacvec }
            | Self::BacksolveAdjoint { autojacvec, .. }
            | Self::InterpolatingAdjoint { autojacvec, .. }
            | Self::QuadratureAdjoint { autojacvec, .. } => Some(autojacvec),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_table() {
        let plain = VjpChoice::ReverseDiff { compile: false }.capabilities();
        assert!(plain.mutation && plain.branching && !plain.compiled);

        let compiled = VjpChoice::ReverseDiff { compile: true }.capabilities();
        assert!(compiled.compiled && !compiled.branching);

        let zygote = VjpChoice::Zygote.capabilities();
        assert!(!zygote.mutation && zygote.branching);

        for choice in [VjpChoice::ForwardMode, VjpChoice::Numerical, VjpChoice::Enzyme] {
            let caps = choice.capabilities();
            assert!(caps.mutation && caps.branching && !caps.compiled);
        }
    }

    #[test]
    fn user_vjp_compares_by_identity() {
        let make = || {
            UserVjp::new(|u, _p, _t| {
                let pullback: Pullback = Box::new(|v| (v.to_vec(), Vec::new()));
                (u.to_vec(), pullback)
            })
        };
        let a = make();
        assert_eq!(a, a.clone());
        assert_ne!(a, make());

        let (f, pullback) = a.call(&[2.0], &[], 0.0);
        assert_eq!(f, vec![2.0]);
        assert_eq!(pullback(&[3.0]).0, vec![3.0]);
    }

    #[test]
    fn default_is_interpolating_auto() {
        let algorithm = SensitivityAlgorithm::default();
        assert_eq!(algorithm.name(), "InterpolatingAdjoint");
        assert_eq!(algorithm.autojacvec(), Some(&VjpChoice::Auto));
        assert_eq!(SensitivityAlgorithm::PassThrough.autojacvec(), None);
    }
}
