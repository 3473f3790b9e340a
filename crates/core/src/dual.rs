//! Forward-mode dual numbers with a dynamic number of partials.

use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::{One, Zero};

use crate::Scalar;

/// A value paired with its directional derivatives.
///
/// Each entry of `partials` is the derivative along one seeded direction.
/// An empty `partials` vector denotes a constant; vectors of different lengths
/// combine as if the shorter one were padded with zeros, so constants created
/// through [`Scalar::from_f64`] mix freely with seeded variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Dual {
    value: f64,
    partials: Vec<f64>,
}

impl Dual {
    /// Creates a dual number from a value and its partials.
    #[must_use]
    pub fn new(value: f64, partials: Vec<f64>) -> Self {
        Self { value, partials }
    }

    /// Creates a constant (all partials zero).
    #[must_use]
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            partials: Vec::new(),
        }
    }

    /// Creates a variable seeded along direction `index` out of `width`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= width`.
    #[must_use]
    pub fn variable(value: f64, index: usize, width: usize) -> Self {
        assert!(index < width, "seed index {index} out of range for width {width}");
        let mut partials = vec![0.0; width];
        partials[index] = 1.0;
        Self { value, partials }
    }

    /// Returns the stored partials.
    #[must_use]
    pub fn partials(&self) -> &[f64] {
        &self.partials
    }

    /// Returns the partial along direction `index`, or zero if it was never seeded.
    #[must_use]
    pub fn partial(&self, index: usize) -> f64 {
        self.partials.get(index).copied().unwrap_or(0.0)
    }

    /// Applies a unary function with derivative `slope` at the current value.
    fn chain(&self, value: f64, slope: f64) -> Self {
        Self {
            value,
            partials: self.partials.iter().map(|d| d * slope).collect(),
        }
    }

    /// Returns `da * self.partials + db * other.partials`.
    fn combine(&self, da: f64, other: &Self, db: f64) -> Vec<f64> {
        let width = self.partials.len().max(other.partials.len());
        (0..width)
            .map(|i| da * self.partial(i) + db * other.partial(i))
            .collect()
    }
}

impl Add for Dual {
    type Output = Dual;

    fn add(self, rhs: Dual) -> Dual {
        let partials = self.combine(1.0, &rhs, 1.0);
        Dual::new(self.value + rhs.value, partials)
    }
}

impl Sub for Dual {
    type Output = Dual;

    fn sub(self, rhs: Dual) -> Dual {
        let partials = self.combine(1.0, &rhs, -1.0);
        Dual::new(self.value - rhs.value, partials)
    }
}

impl Mul for Dual {
    type Output = Dual;

    fn mul(self, rhs: Dual) -> Dual {
        let partials = self.combine(rhs.value, &rhs, self.value);
        Dual::new(self.value * rhs.value, partials)
    }
}

impl Div for Dual {
    type Output = Dual;

    fn div(self, rhs: Dual) -> Dual {
        let value = self.value / rhs.value;
        let partials = self.combine(1.0 / rhs.value, &rhs, -value / rhs.value);
        Dual::new(value, partials)
    }
}

impl Neg for Dual {
    type Output = Dual;

    fn neg(self) -> Dual {
        self.chain(-self.value, -1.0)
    }
}

impl Add<f64> for Dual {
    type Output = Dual;

    fn add(mut self, rhs: f64) -> Dual {
        self.value += rhs;
        self
    }
}

impl Sub<f64> for Dual {
    type Output = Dual;

    fn sub(mut self, rhs: f64) -> Dual {
        self.value -= rhs;
        self
    }
}

impl Mul<f64> for Dual {
    type Output = Dual;

    fn mul(self, rhs: f64) -> Dual {
        self.chain(self.value * rhs, rhs)
    }
}

impl Div<f64> for Dual {
    type Output = Dual;

    fn div(self, rhs: f64) -> Dual {
        self.chain(self.value / rhs, 1.0 / rhs)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Dual::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.partials.iter().all(|d| *d == 0.0)
    }
}

impl One for Dual {
    fn one() -> Self {
        Dual::constant(1.0)
    }
}

impl Scalar for Dual {
    fn from_f64(value: f64) -> Self {
        Dual::constant(value)
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn exp(&self) -> Self {
        let e = self.value.exp();
        self.chain(e, e)
    }

    fn ln(&self) -> Self {
        self.chain(self.value.ln(), 1.0 / self.value)
    }

    fn sin(&self) -> Self {
        self.chain(self.value.sin(), self.value.cos())
    }

    fn cos(&self) -> Self {
        self.chain(self.value.cos(), -self.value.sin())
    }

    fn tan(&self) -> Self {
        let t = self.value.tan();
        self.chain(t, 1.0 + t * t)
    }

    fn sqrt(&self) -> Self {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s)
    }

    fn tanh(&self) -> Self {
        let t = self.value.tanh();
        self.chain(t, 1.0 - t * t)
    }

    fn abs(&self) -> Self {
        let sign = if self.value < 0.0 { -1.0 } else { 1.0 };
        self.chain(self.value.abs(), sign)
    }

    fn powi(&self, n: i32) -> Self {
        let slope = if n == 0 {
            0.0
        } else {
            f64::from(n) * self.value.powi(n - 1)
        };
        self.chain(self.value.powi(n), slope)
    }

    fn powf(&self, exponent: f64) -> Self {
        let slope = if exponent == 0.0 {
            0.0
        } else {
            exponent * self.value.powf(exponent - 1.0)
        };
        self.chain(self.value.powf(exponent), slope)
    }
}
