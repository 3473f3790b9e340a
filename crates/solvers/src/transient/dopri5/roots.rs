use crate::SolverError;

const MAX_ITERS: usize = 100;
const THETA_TOL: f64 = 1e-13;

/// Locates a sign change of `g` on `[0, 1]` with the Illinois method.
///
/// `g0` and `g1` are the values at the ends and must have opposite signs,
/// or `g1` must be zero. Returns a point on the `g1` side of the root, so
/// the condition has already crossed there.
pub(super) fn illinois<G>(mut g: G, g0: f64, g1: f64) -> Result<f64, SolverError>
where
    G: FnMut(f64) -> Result<f64, SolverError>,
{
    if g1 == 0.0 {
        return Ok(1.0);
    }

    let (mut a, mut fa) = (0.0, g0);
    let (mut b, mut fb) = (1.0, g1);
    let mut side = 0_i8;

    for _ in 0..MAX_ITERS {
        if b - a <= THETA_TOL {
            break;
        }
        let c = ((a * fb - b * fa) / (fb - fa)).clamp(a, b);
        let fc = g(c)?;
        if fc == 0.0 {
            return Ok(c);
        }
        if (fc > 0.0) == (fb > 0.0) {
            b = c;
            fb = fc;
            if side == 1 {
                fa *= 0.5;
            }
            side = 1;
        } else {
            a = c;
            fa = fc;
            if side == -1 {
                fb *= 0.5;
            }
            side = -1;
        }
    }

    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn finds_root_of_cubic() {
        let g = |x: f64| Ok(x.powi(3) - 0.1);
        let root = illinois(g, -0.1, 0.9).expect("bracketed");
        assert_relative_eq!(root, 0.1_f64.cbrt(), epsilon = 1e-12);
        assert!(root.powi(3) - 0.1 >= 0.0);
    }

    #[test]
    fn zero_at_end() {
        let root = illinois(|x| Ok(x - 1.0), -1.0, 0.0).expect("bracketed");
        assert_relative_eq!(root, 1.0);
    }
}
