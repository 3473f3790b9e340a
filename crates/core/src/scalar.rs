use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::{One, Zero};

/// The numeric type that user functions are written against.
///
/// Right-hand sides, callbacks, and losses are generic over `Scalar` so the
/// same code runs on plain `f64` values, on forward-mode [`Dual`] numbers, and
/// on reverse-mode [`Var`] handles recorded on a [`Tape`].
///
/// Arithmetic is by value. Types that are not `Copy` (such as `Dual`) are
/// cloned explicitly where an operand is reused.
///
/// [`Dual`]: crate::Dual
/// [`Var`]: crate::Var
/// [`Tape`]: crate::Tape
pub trait Scalar:
    Clone
    + Debug
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    /// Lifts a constant into the scalar type.
    fn from_f64(value: f64) -> Self;

    /// Returns the primal value, discarding any derivative information.
    fn value(&self) -> f64;

    #[must_use]
    fn exp(&self) -> Self;

    /// Natural logarithm.
    #[must_use]
    fn ln(&self) -> Self;

    #[must_use]
    fn sin(&self) -> Self;

    #[must_use]
    fn cos(&self) -> Self;

    #[must_use]
    fn tan(&self) -> Self;

    #[must_use]
    fn sqrt(&self) -> Self;

    #[must_use]
    fn tanh(&self) -> Self;

    #[must_use]
    fn abs(&self) -> Self;

    #[must_use]
    fn powi(&self, n: i32) -> Self;

    #[must_use]
    fn powf(&self, exponent: f64) -> Self;
}

impl Scalar for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn value(&self) -> f64 {
        *self
    }

    fn exp(&self) -> Self {
        f64::exp(*self)
    }

    fn ln(&self) -> Self {
        f64::ln(*self)
    }

    fn sin(&self) -> Self {
        f64::sin(*self)
    }

    fn cos(&self) -> Self {
        f64::cos(*self)
    }

    fn tan(&self) -> Self {
        f64::tan(*self)
    }

    fn sqrt(&self) -> Self {
        f64::sqrt(*self)
    }

    fn tanh(&self) -> Self {
        f64::tanh(*self)
    }

    fn abs(&self) -> Self {
        f64::abs(*self)
    }

    fn powi(&self, n: i32) -> Self {
        f64::powi(*self, n)
    }

    fn powf(&self, exponent: f64) -> Self {
        f64::powf(*self, exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    /// A polynomial written once against the trait.
    fn cubic<T: Scalar>(x: &T) -> T {
        x.clone() * x.clone() * x.clone() - x.clone() * 2.0 + 1.0
    }

    #[test]
    fn f64_is_a_scalar() {
        assert_relative_eq!(cubic(&2.0), 5.0);
        assert_relative_eq!(Scalar::value(&3.5), 3.5);
        assert_relative_eq!(<f64 as Scalar>::from_f64(1.25), 1.25);
    }

    #[test]
    fn elementary_functions_match_std() {
        let x = 0.7_f64;
        assert_relative_eq!(Scalar::exp(&x), x.exp());
        assert_relative_eq!(Scalar::tanh(&x), x.tanh());
        assert_relative_eq!(Scalar::powf(&x, 2.5), x.powf(2.5));
        assert_relative_eq!(Scalar::powi(&x, 3), x.powi(3));
    }
}
