use deriva_solvers::{Drift, SolverError};

use crate::Capabilities;

use super::{VjpBackend, eval};

/// Central finite differences.
///
/// Each coordinate is perturbed by `∛ε · max(1, |x|)`, which balances
/// truncation against rounding for a second-order difference.
#[derive(Debug, Clone, Copy, Default)]
pub struct FiniteDifferences;

fn step(x: f64) -> f64 {
    f64::EPSILON.cbrt() * x.abs().max(1.0)
}

fn max_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}

impl VjpBackend for FiniteDifferences {
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
        let dot = |a: &[f64], b: &[f64], h: f64| -> f64 {
            a.iter().zip(b).zip(v).map(|((a, b), v)| v * (a - b)).sum::<f64>() / (2.0 * h)
        };

        let mut vy = Vec::with_capacity(y.len());
        let mut shifted = y.to_vec();
        for i in 0..y.len() {
            let h = step(y[i]);
            shifted[i] = y[i] + h;
            let hi = eval(drift, &shifted, p, t)?;
            shifted[i] = y[i] - h;
            let lo = eval(drift, &shifted, p, t)?;
            shifted[i] = y[i];
            vy.push(dot(&hi, &lo, h));
        }

        let mut vp = Vec::with_capacity(p.len());
        let mut shifted = p.to_vec();
        for j in 0..p.len() {
            let h = step(p[j]);
            shifted[j] = p[j] + h;
            let hi = eval(drift, y, &shifted, t)?;
            shifted[j] = p[j] - h;
            let lo = eval(drift, y, &shifted, t)?;
            shifted[j] = p[j];
            vp.push(dot(&hi, &lo, h));
        }
        Ok((vy, vp))
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
        let size = max_norm(w).max(max_norm(q));
        if size == 0.0 {
            return Ok(vec![0.0; drift.state_dim()]);
        }
        let h = step(max_norm(y).max(max_norm(p))) / size;
        let shift = |x: &[f64], d: &[f64], s: f64| -> Vec<f64> {
            x.iter().zip(d).map(|(x, d)| x + s * d).collect()
        };
        let hi = eval(drift, &shift(y, w, h), &shift(p, q, h), t)?;
        let lo = eval(drift, &shift(y, w, -h), &shift(p, q, -h), t)?;
        Ok(hi.iter().zip(&lo).map(|(a, b)| (a - b) / (2.0 * h)).collect())
    }
}
