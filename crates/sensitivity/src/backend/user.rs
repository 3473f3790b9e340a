use deriva_solvers::{Drift, SolverError};

use crate::{Capabilities, UserVjp};

use super::VjpBackend;

/// A hand-written pullback, called in place of differentiating the drift.
#[derive(Debug, Clone)]
pub struct UserBackend {
    vjp: UserVjp,
}

impl UserBackend {
    #[must_use]
    pub fn new(vjp: UserVjp) -> Self {
        Self { vjp }
    }
}

impl VjpBackend for UserBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            mutation: true,
            compiled: false,
            branching: true,
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
        let (_, pullback) = self.vjp.call(y, p, t);
        let (vy, vp) = pullback(v);
        if vy.len() != drift.state_dim() || vp.len() != p.len() {
            return Err(SolverError::Unsupported(
                "user pullback returned products of the wrong length",
            ));
        }
        Ok((vy, vp))
    }

    fn jvp<D: Drift>(
        &mut self,
        _drift: &D,
        _y: &[f64],
        _p: &[f64],
        _t: f64,
        _w: &[f64],
        _q: &[f64],
    ) -> Result<Vec<f64>, SolverError> {
        Err(SolverError::Unsupported(
            "user-provided pullbacks have no forward mode",
        ))
    }
}
