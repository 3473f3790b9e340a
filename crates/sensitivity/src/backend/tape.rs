use deriva_core::{CompiledTape, Tape, Var};
use deriva_solvers::{Drift, SolverError};

use crate::{Capabilities, VjpChoice};

use super::{DualBackend, VjpBackend};

/// Reverse mode on a [`Tape`].
///
/// Without compilation the drift is traced afresh on every call. With it,
/// the first trace is frozen into a [`CompiledTape`] with inputs `[y, p, t]`
/// and replayed at every later point, so a backend instance must only ever
/// see one drift.
#[derive(Debug)]
pub struct TapeBackend {
    choice: VjpChoice,
    compile: bool,
    program: Option<CompiledTape>,
}

impl TapeBackend {
    #[must_use]
    pub fn new(choice: VjpChoice, compile: bool) -> Self {
        Self {
            choice,
            compile,
            program: None,
        }
    }

    fn trace<D: Drift>(
        drift: &D,
        y: &[f64],
        p: &[f64],
        t: f64,
    ) -> Result<CompiledTape, SolverError> {
        let tape = Tape::new();
        let yv = tape.vars(y);
        let pv = tape.vars(p);
        let tv = tape.var(t);
        let mut dy = vec![Var::constant(0.0); drift.state_dim()];
        drift.eval(&yv, &pv, &tv, &mut dy)?;

        let inputs: Vec<Var<'_>> = yv.iter().chain(&pv).copied().chain([tv]).collect();
        Ok(tape.compile(&inputs, &dy))
    }
}

impl VjpBackend for TapeBackend {
    fn capabilities(&self) -> Capabilities {
        self.choice.capabilities()
    }

    fn vjp<D: Drift>(
        &mut self,
        drift: &D,
        y: &[f64],
        p: &[f64],
        t: f64,
        v: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), SolverError> {
        if !self.compile {
            let tape = Tape::new();
            let yv = tape.vars(y);
            let pv = tape.vars(p);
            let tv = tape.var(t);
            let mut dy = vec![Var::constant(0.0); drift.state_dim()];
            drift.eval(&yv, &pv, &tv, &mut dy)?;
            let adjoints = tape.pullback(&dy, v);
            return Ok((adjoints.wrt_all(&yv), adjoints.wrt_all(&pv)));
        }

        let program = match &mut self.program {
            Some(program) => program,
            slot @ None => slot.insert(Self::trace(drift, y, p, t)?),
        };
        let inputs: Vec<f64> = y.iter().chain(p).copied().chain([t]).collect();
        let dy = program.replay(&inputs);
        if dy.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NonFinite { t });
        }
        let mut grad = program.pullback(v);
        grad.truncate(y.len() + p.len());
        let vp = grad.split_off(y.len());
        Ok((grad, vp))
    }

    /// Tapes have no forward sweep; products come from dual numbers.
    fn jvp<D: Drift>(
        &mut self,
        drift: &D,
        y: &[f64],
        p: &[f64],
        t: f64,
        w: &[f64],
        q: &[f64],
    ) -> Result<Vec<f64>, SolverError> {
        DualBackend.jvp(drift, y, p, t, w, q)
    }
}
