use std::cell::RefCell;

use deriva_core::{Dae, DaeFunction, Dual, Hints, Scalar};
use nalgebra::{DMatrix, DVector};

use crate::{Drift, SolverError, StateMap};

const MAX_ITERS: usize = 25;
const RESIDUAL_TOL: f64 = 1e-12;
const STEP_TOL: f64 = 1e-13;

/// A semi-explicit DAE reduced to an ODE in its differential variables.
///
/// Every evaluation solves the constraints `g(y, z, p, t) = 0` for `z` by
/// Newton's method in `f64`, warm-started from the previous solution. The
/// converged `z` is then lifted into the caller's scalar type with one
/// Newton step, which carries `∂z/∂(y, p) = -g_z⁻¹ g_(y, p)` into dual and
/// taped values.
#[derive(Debug)]
pub struct DaeDrift<'a, F> {
    dae: &'a Dae<F>,
    guess: RefCell<Vec<f64>>,
}

impl<'a, F: DaeFunction> DaeDrift<'a, F> {
    /// Creates the reduced drift with `z0` as the first Newton guess.
    ///
    /// A guess of the wrong length is replaced by zeros.
    pub fn new(dae: &'a Dae<F>, z0: &[f64]) -> Self {
        let m = dae.f.algebraic_dim();
        let guess = if z0.len() == m {
            z0.to_vec()
        } else {
            vec![0.0; m]
        };
        Self {
            dae,
            guess: RefCell::new(guess),
        }
    }

    /// Solves the constraints for the algebraic variables.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::SingularJacobian`] if `∂g/∂z` cannot be
    /// inverted, or [`SolverError::Newton`] if the iteration does not
    /// converge.
    pub fn solve_algebraic<T: Scalar>(
        &self,
        y: &[T],
        p: &[T],
        t: &T,
    ) -> Result<Vec<T>, SolverError> {
        let m = self.dae.f.algebraic_dim();
        if m == 0 {
            return Ok(Vec::new());
        }

        let yv: Vec<f64> = y.iter().map(Scalar::value).collect();
        let pv: Vec<f64> = p.iter().map(Scalar::value).collect();
        let tv = t.value();

        let mut z = self.guess.borrow().clone();
        let mut res = vec![0.0; m];
        let mut converged = false;
        for _ in 0..MAX_ITERS {
            self.dae.f.algebraic(&yv, &z, &pv, &tv, &mut res);
            if norm(&res) <= RESIDUAL_TOL {
                converged = true;
                break;
            }
            let jac = self.constraint_jacobian(&yv, &z, &pv, tv)?;
            let dz = jac
                .lu()
                .solve(&DVector::from_column_slice(&res))
                .ok_or(SolverError::SingularJacobian { t: tv })?;
            for (zi, dzi) in z.iter_mut().zip(dz.iter()) {
                *zi -= dzi;
            }
            if dz.amax() <= STEP_TOL * (1.0 + norm(&z)) {
                converged = true;
                break;
            }
        }
        if !converged {
            self.dae.f.algebraic(&yv, &z, &pv, &tv, &mut res);
            return Err(SolverError::Newton {
                t: tv,
                residual: norm(&res),
            });
        }
        self.guess.borrow_mut().clone_from(&z);

        // Lift: z_T = z - g_z⁻¹ g(y_T, z, p_T, t_T).
        let inverse = self
            .constraint_jacobian(&yv, &z, &pv, tv)?
            .try_inverse()
            .ok_or(SolverError::SingularJacobian { t: tv })?;
        let z_const: Vec<T> = z.iter().map(|&v| T::from_f64(v)).collect();
        let mut res_t = vec![T::zero(); m];
        self.dae.f.algebraic(y, &z_const, p, t, &mut res_t);

        Ok((0..m)
            .map(|i| {
                (0..m).fold(T::from_f64(z[i]), |acc, j| {
                    acc - res_t[j].clone() * inverse[(i, j)]
                })
            })
            .collect())
    }

    /// Returns `∂g/∂z` at `(y, z, p, t)`.
    fn constraint_jacobian(
        &self,
        y: &[f64],
        z: &[f64],
        p: &[f64],
        t: f64,
    ) -> Result<DMatrix<f64>, SolverError> {
        let m = z.len();
        let y: Vec<Dual> = y.iter().map(|&v| Dual::constant(v)).collect();
        let p: Vec<Dual> = p.iter().map(|&v| Dual::constant(v)).collect();
        let z: Vec<Dual> = z
            .iter()
            .enumerate()
            .map(|(i, &v)| Dual::variable(v, i, m))
            .collect();
        let mut res = vec![Dual::constant(0.0); m];
        self.dae.f.algebraic(&y, &z, &p, &Dual::constant(t), &mut res);

        let jac = DMatrix::from_fn(m, m, |r, c| res[r].partial(c));
        if jac.iter().all(|v| v.is_finite()) {
            Ok(jac)
        } else {
            Err(SolverError::SingularJacobian { t })
        }
    }
}

impl<F: DaeFunction> StateMap for DaeDrift<'_, F> {
    fn observe<T: Scalar>(&self, y: &[T], p: &[T], t: &T) -> Result<Vec<T>, SolverError> {
        let z = self.solve_algebraic(y, p, t)?;
        Ok(y.iter().cloned().chain(z).collect())
    }

    fn project<T: Clone>(&self, u: &[T]) -> Vec<T> {
        u[..self.dae.f.differential_dim()].to_vec()
    }
}

impl<F: DaeFunction> Drift for DaeDrift<'_, F> {
    fn state_dim(&self) -> usize {
        self.dae.f.differential_dim()
    }

    fn num_params(&self) -> usize {
        self.dae.f.num_params()
    }

    fn hints(&self) -> Hints {
        self.dae.f.hints()
    }

    fn eval<T: Scalar>(&self, y: &[T], p: &[T], t: &T, dy: &mut [T]) -> Result<(), SolverError> {
        let z = self.solve_algebraic(y, p, t)?;
        self.dae.f.differential(y, &z, p, t, dy);
        Ok(())
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}
