//! Jacobian-vector and vector-Jacobian products of a drift.
//!
//! Every engine talks to the drift's derivatives through [`VjpBackend`].
//! Which implementation backs it is decided once, from the resolved
//! [`VjpChoice`].

mod dual;
mod numerical;
mod tape;
mod user;

pub use dual::DualBackend;
pub use numerical::FiniteDifferences;
pub use tape::TapeBackend;
pub use user::UserBackend;

use deriva_solvers::{Drift, SolverError};

use crate::{Capabilities, VjpChoice};

/// Products of a drift's Jacobians at a point.
pub trait VjpBackend {
    fn capabilities(&self) -> Capabilities;

    /// Returns `(J_yᵀv, J_pᵀv)` at `(y, p, t)`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the drift cannot be evaluated.
    fn vjp<D: Drift>(
        &mut self,
        drift: &D,
        y: &[f64],
        p: &[f64],
        t: f64,
        v: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), SolverError>;

    /// Returns `J_y w + J_p q` at `(y, p, t)`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the drift cannot be evaluated or the
    /// backend has no forward mode.
    #[allow(clippy::too_many_arguments)]
    fn jvp<D: Drift>(
        &mut self,
        drift: &D,
        y: &[f64],
        p: &[f64],
        t: f64,
        w: &[f64],
        q: &[f64],
    ) -> Result<Vec<f64>, SolverError>;
}

/// The backend selected for a resolved [`VjpChoice`].
#[derive(Debug)]
pub(crate) enum Backend {
    Tape(TapeBackend),
    Dual(DualBackend),
    Numerical(FiniteDifferences),
    User(UserBackend),
}

impl Backend {
    pub(crate) fn new(choice: &VjpChoice) -> Self {
        match choice {
            VjpChoice::ReverseDiff { compile } => {
                Self::Tape(TapeBackend::new(choice.clone(), *compile))
            }
            VjpChoice::Auto | VjpChoice::Tracker | VjpChoice::Zygote | VjpChoice::Enzyme => {
                Self::Tape(TapeBackend::new(choice.clone(), false))
            }
            VjpChoice::ForwardMode => Self::Dual(DualBackend),
            VjpChoice::Numerical => Self::Numerical(FiniteDifferences),
            VjpChoice::UserProvided(user) => Self::User(UserBackend::new(user.clone())),
        }
    }
}

impl VjpBackend for Backend {
    fn capabilities(&self) -> Capabilities {
        match self {
            Self::Tape(b) => b.capabilities(),
            Self::Dual(b) => b.capabilities(),
            Self::Numerical(b) => b.capabilities(),
            Self::User(b) => b.capabilities(),
        }
    }

    fn vjp<D: Drift>(
        &mut self,
        drift: &D,
        y: &[f64],
        p: &[f64],
        t: f64,
        v: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), SolverError> {
        match self {
            Self::Tape(b) => b.vjp(drift, y, p, t, v),
            Self::Dual(b) => b.vjp(drift, y, p, t, v),
            Self::Numerical(b) => b.vjp(drift, y, p, t, v),
            Self::User(b) => b.vjp(drift, y, p, t, v),
        }
    }

    fn jvp<D: Drift>(
        &mut self,
        drift: &D,
        y: &[f64],
        p: &[f64],
        t: f64,
        w: &[f64],
        q: &[f64],
    ) -> Result<Vec<f64>, SolverError> {
        match self {
            Self::Tape(b) => b.jvp(drift, y, p, t, w, q),
            Self::Dual(b) => b.jvp(drift, y, p, t, w, q),
            Self::Numerical(b) => b.jvp(drift, y, p, t, w, q),
            Self::User(b) => b.jvp(drift, y, p, t, w, q),
        }
    }
}

/// Evaluates the drift in `f64`.
pub(crate) fn eval<D: Drift>(
    drift: &D,
    y: &[f64],
    p: &[f64],
    t: f64,
) -> Result<Vec<f64>, SolverError> {
    let mut dy = vec![0.0; drift.state_dim()];
    drift.eval(y, p, &t, &mut dy)?;
    Ok(dy)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use deriva_core::{Ode, OdeFunction, Scalar};

    use crate::{Pullback, UserVjp};

    /// `du = [p0 u0 u1, sin(u1) + p1 t]`
    struct Coupled;

    impl OdeFunction for Coupled {
        fn dim(&self) -> usize {
            2
        }

        fn num_params(&self) -> usize {
            2
        }

        fn eval<T: Scalar>(&self, u: &[T], p: &[T], t: &T, du: &mut [T]) {
            du[0] = p[0].clone() * u[0].clone() * u[1].clone();
            du[1] = u[1].sin() + p[1].clone() * t.clone();
        }
    }

    const Y: [f64; 2] = [1.5, 0.7];
    const P: [f64; 2] = [2.0, -0.5];
    const TIME: f64 = 0.3;
    const V: [f64; 2] = [0.4, -1.2];

    /// Exact `(J_yᵀv, J_pᵀv)`.
    fn expected() -> (Vec<f64>, Vec<f64>) {
        let jy = [[P[0] * Y[1], P[0] * Y[0]], [0.0, Y[1].cos()]];
        let jp = [[Y[0] * Y[1], 0.0], [0.0, TIME]];
        let vy = (0..2).map(|i| V[0] * jy[0][i] + V[1] * jy[1][i]).collect();
        let vp = (0..2).map(|j| V[0] * jp[0][j] + V[1] * jp[1][j]).collect();
        (vy, vp)
    }

    fn check(choice: &VjpChoice, epsilon: f64) {
        let ode = Ode::new(Coupled);
        let mut backend = Backend::new(choice);
        let (ey, ep) = expected();

        // Twice, so compiled replay is exercised after the first trace.
        for _ in 0..2 {
            let (vy, vp) = backend.vjp(&ode, &Y, &P, TIME, &V).expect("should evaluate");
            for i in 0..2 {
                assert_relative_eq!(vy[i], ey[i], epsilon = epsilon);
                assert_relative_eq!(vp[i], ep[i], epsilon = epsilon);
            }
        }
    }

    #[test]
    fn all_backends_agree_on_vjp() {
        check(&VjpChoice::ReverseDiff { compile: false }, 1e-14);
        check(&VjpChoice::ReverseDiff { compile: true }, 1e-14);
        check(&VjpChoice::Zygote, 1e-14);
        check(&VjpChoice::ForwardMode, 1e-14);
        check(&VjpChoice::Numerical, 1e-8);
    }

    #[test]
    fn jvp_matches_jacobian() {
        let ode = Ode::new(Coupled);
        let w = [1.0, 2.0];
        let q = [0.5, 1.0];
        // J_y w + J_p q
        let expected = [
            P[0] * Y[1] * w[0] + P[0] * Y[0] * w[1] + Y[0] * Y[1] * q[0],
            Y[1].cos() * w[1] + TIME * q[1],
        ];
        for choice in [VjpChoice::ForwardMode, VjpChoice::Numerical, VjpChoice::Tracker] {
            let mut backend = Backend::new(&choice);
            let jvp = backend
                .jvp(&ode, &Y, &P, TIME, &w, &q)
                .expect("should evaluate");
            assert_relative_eq!(jvp[0], expected[0], epsilon = 1e-8);
            assert_relative_eq!(jvp[1], expected[1], epsilon = 1e-8);
        }
    }

    #[test]
    fn user_pullback_is_used_verbatim() {
        let user = UserVjp::new(|u, _p, _t| {
            let pullback: Pullback = Box::new(|v| (vec![2.0 * v[0], 0.0], vec![v[1], v[1]]));
            (u.to_vec(), pullback)
        });
        let mut backend = Backend::new(&VjpChoice::UserProvided(user));
        let ode = Ode::new(Coupled);

        let (vy, vp) = backend.vjp(&ode, &Y, &P, TIME, &V).expect("should evaluate");
        assert_eq!(vy, vec![0.8, 0.0]);
        assert_eq!(vp, vec![-1.2, -1.2]);

        let err = backend
            .jvp(&ode, &Y, &P, TIME, &V, &P)
            .expect_err("no forward mode");
        assert!(matches!(err, SolverError::Unsupported(_)));
    }
}
