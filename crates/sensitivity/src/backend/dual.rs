use deriva_core::Dual;
use deriva_solvers::{Drift, SolverError};

use crate::Capabilities;

use super::VjpBackend;

/// Forward mode on [`Dual`] numbers.
///
/// A JVP is one pass with a single seeded direction. A VJP builds the full
/// Jacobian in one pass of width `n + np`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DualBackend;

impl VjpBackend for DualBackend {
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
        let (n, np) = (y.len(), p.len());
        let width = n + np;
        let yd: Vec<Dual> = y
            .iter()
            .enumerate()
            .map(|(i, &x)| Dual::variable(x, i, width))
            .collect();
        let pd: Vec<Dual> = p
            .iter()
            .enumerate()
            .map(|(j, &x)| Dual::variable(x, n + j, width))
            .collect();
        let mut dy = vec![Dual::constant(0.0); drift.state_dim()];
        drift.eval(&yd, &pd, &Dual::constant(t), &mut dy)?;

        let column = |c: usize| dy.iter().zip(v).map(|(d, vk)| vk * d.partial(c)).sum::<f64>();
        Ok(((0..n).map(column).collect(), (n..width).map(column).collect()))
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
        let yd: Vec<Dual> = y.iter().zip(w).map(|(&x, &d)| Dual::new(x, vec![d])).collect();
        let pd: Vec<Dual> = p.iter().zip(q).map(|(&x, &d)| Dual::new(x, vec![d])).collect();
        let mut dy = vec![Dual::constant(0.0); drift.state_dim()];
        drift.eval(&yd, &pd, &Dual::constant(t), &mut dy)?;
        Ok(dy.iter().map(|d| d.partial(0)).collect())
    }
}
