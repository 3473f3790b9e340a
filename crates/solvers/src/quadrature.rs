//! Adaptive Gauss–Kronrod quadrature for vector-valued integrands.
//!
//! Each interval is integrated with the 15-point Kronrod rule, and the
//! embedded 7-point Gauss rule gives the error estimate. The interval with
//! the largest estimate is bisected until the total estimate meets the
//! tolerance.

use crate::{SolverError, Tolerances};

const MAX_INTERVALS: usize = 200;

/// Kronrod abscissae on `[0, 1]`; odd indices are shared with the Gauss rule.
const XGK: [f64; 8] = [
    0.991_455_371_120_812_639,
    0.949_107_912_342_758_525,
    0.864_864_423_359_769_073,
    0.741_531_185_599_394_440,
    0.586_087_235_467_691_130,
    0.405_845_151_377_397_167,
    0.207_784_955_007_898_468,
    0.0,
];

const WGK: [f64; 8] = [
    0.022_935_322_010_529_225,
    0.063_092_092_629_978_553,
    0.104_790_010_322_250_184,
    0.140_653_259_715_525_919,
    0.169_004_726_639_267_903,
    0.190_350_578_064_785_410,
    0.204_432_940_075_298_892,
    0.209_482_141_084_727_828,
];

const WG: [f64; 4] = [
    0.129_484_966_168_869_693,
    0.279_705_391_489_276_668,
    0.381_830_050_505_118_945,
    0.417_959_183_673_469_388,
];

/// The result of an adaptive quadrature.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrature {
    pub value: Vec<f64>,

    /// Estimated absolute error, in the max norm.
    pub error: f64,

    /// Number of integrand evaluations.
    pub evaluations: usize,
}

struct Interval {
    a: f64,
    b: f64,
    value: Vec<f64>,
    error: f64,
}

/// Integrates `f` from `a` to `b`.
///
/// Converges when the summed error estimate is at most
/// `max(abstol, reltol · ‖value‖∞)`. Reversed limits give the negated
/// integral.
///
/// # Errors
///
/// Returns [`SolverError::Quadrature`] if the tolerance is not met within
/// the interval budget, or any error returned by `f`.
pub fn integrate<F>(mut f: F, a: f64, b: f64, tol: &Tolerances) -> Result<Quadrature, SolverError>
where
    F: FnMut(f64) -> Result<Vec<f64>, SolverError>,
{
    let mut evaluations = 0;
    if a == b {
        let zero = f(a)?.iter().map(|_| 0.0).collect();
        return Ok(Quadrature {
            value: zero,
            error: 0.0,
            evaluations: 1,
        });
    }

    let mut intervals = vec![kronrod(&mut f, a, b, &mut evaluations)?];
    loop {
        let value = total(&intervals);
        let error: f64 = intervals.iter().map(|i| i.error).sum();
        let target = tol.abstol().max(tol.reltol() * max_norm(&value));
        if error <= target {
            return Ok(Quadrature {
                value,
                error,
                evaluations,
            });
        }
        if intervals.len() >= MAX_INTERVALS || !error.is_finite() {
            return Err(SolverError::Quadrature { estimate: error });
        }

        let worst = intervals
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| x.error.total_cmp(&y.error))
            .map_or(0, |(i, _)| i);
        let Interval { a, b, .. } = intervals.swap_remove(worst);
        let mid = 0.5 * (a + b);
        intervals.push(kronrod(&mut f, a, mid, &mut evaluations)?);
        intervals.push(kronrod(&mut f, mid, b, &mut evaluations)?);
    }
}

/// Applies the 15-point Kronrod rule and its embedded Gauss rule on `[a, b]`.
fn kronrod<F>(f: &mut F, a: f64, b: f64, evaluations: &mut usize) -> Result<Interval, SolverError>
where
    F: FnMut(f64) -> Result<Vec<f64>, SolverError>,
{
    let center = 0.5 * (a + b);
    let half = 0.5 * (b - a);

    let fc = f(center)?;
    let mut kronrod: Vec<f64> = fc.iter().map(|v| v * WGK[7]).collect();
    let mut gauss: Vec<f64> = fc.iter().map(|v| v * WG[3]).collect();
    for j in 0..7 {
        let dx = half * XGK[j];
        let lo = f(center - dx)?;
        let hi = f(center + dx)?;
        for (i, (l, h)) in lo.iter().zip(&hi).enumerate() {
            kronrod[i] += WGK[j] * (l + h);
            if j % 2 == 1 {
                gauss[i] += WG[j / 2] * (l + h);
            }
        }
    }
    *evaluations += 15;

    let value: Vec<f64> = kronrod.iter().map(|k| k * half).collect();
    let error = kronrod
        .iter()
        .zip(&gauss)
        .map(|(k, g)| ((k - g) * half).abs())
        .fold(0.0, f64::max);
    Ok(Interval { a, b, value, error })
}

fn total(intervals: &[Interval]) -> Vec<f64> {
    let mut sum = vec![0.0; intervals.first().map_or(0, |i| i.value.len())];
    for interval in intervals {
        for (s, v) in sum.iter_mut().zip(&interval.value) {
            *s += v;
        }
    }
    sum
}

fn max_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}
