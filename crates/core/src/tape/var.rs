use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::{One, Zero};

use crate::Scalar;

use super::Tape;
use super::op::Op;

/// A value tracked on a [`Tape`], or a constant.
///
/// `Var` is `Copy`; arithmetic between two tracked values records a node on
/// their tape. Operations involving only constants record nothing.
#[derive(Clone, Copy)]
pub struct Var<'t> {
    value: f64,
    slot: Option<(&'t Tape, usize)>,
}

impl<'t> Var<'t> {
    pub(super) fn tracked(tape: &'t Tape, index: usize, value: f64) -> Self {
        Self {
            value,
            slot: Some((tape, index)),
        }
    }

    /// Creates an untracked constant.
    #[must_use]
    pub fn constant(value: f64) -> Self {
        Self { value, slot: None }
    }

    /// Returns the node index, or `None` for constants.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.slot.map(|(_, index)| index)
    }

    /// Returns `true` if the value is recorded on a tape.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.slot.is_some()
    }

    fn unary(self, op: fn(usize) -> Op, value: f64) -> Self {
        match self.slot {
            Some((tape, index)) => {
                let node = tape.push(op(index), value);
                Self::tracked(tape, node, value)
            }
            None => Self::constant(value),
        }
    }

    fn affine(self, scale: f64, offset: f64) -> Self {
        let value = scale * self.value + offset;
        match self.slot {
            Some((tape, arg)) => {
                let node = tape.push(Op::Affine { arg, scale, offset }, value);
                Self::tracked(tape, node, value)
            }
            None => Self::constant(value),
        }
    }

    fn recip_scaled(self, numerator: f64) -> Self {
        let value = numerator / self.value;
        match self.slot {
            Some((tape, arg)) => {
                let node = tape.push(Op::Recip { arg, numerator }, value);
                Self::tracked(tape, node, value)
            }
            None => Self::constant(value),
        }
    }
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(index) => write!(f, "Var({} @ {index})", self.value),
            None => write!(f, "Var({})", self.value),
        }
    }
}

impl<'t> Add for Var<'t> {
    type Output = Var<'t>;

    fn add(self, rhs: Var<'t>) -> Var<'t> {
        match (self.slot, rhs.slot) {
            (Some((tape, a)), Some((_, b))) => {
                let value = self.value + rhs.value;
                Var::tracked(tape, tape.push(Op::Add(a, b), value), value)
            }
            (Some(_), None) => self.affine(1.0, rhs.value),
            (None, _) => rhs.affine(1.0, self.value),
        }
    }
}

impl<'t> Sub for Var<'t> {
    type Output = Var<'t>;

    fn sub(self, rhs: Var<'t>) -> Var<'t> {
        match (self.slot, rhs.slot) {
            (Some((tape, a)), Some((_, b))) => {
                let value = self.value - rhs.value;
                Var::tracked(tape, tape.push(Op::Sub(a, b), value), value)
            }
            (Some(_), None) => self.affine(1.0, -rhs.value),
            (None, _) => rhs.affine(-1.0, self.value),
        }
    }
}

impl<'t> Mul for Var<'t> {
    type Output = Var<'t>;

    fn mul(self, rhs: Var<'t>) -> Var<'t> {
        match (self.slot, rhs.slot) {
            (Some((tape, a)), Some((_, b))) => {
                let value = self.value * rhs.value;
                Var::tracked(tape, tape.push(Op::Mul(a, b), value), value)
            }
            (Some(_), None) => self.affine(rhs.value, 0.0),
            (None, _) => rhs.affine(self.value, 0.0),
        }
    }
}

impl<'t> Div for Var<'t> {
    type Output = Var<'t>;

    fn div(self, rhs: Var<'t>) -> Var<'t> {
        match (self.slot, rhs.slot) {
            (Some((tape, a)), Some((_, b))) => {
                let value = self.value / rhs.value;
                Var::tracked(tape, tape.push(Op::Div(a, b), value), value)
            }
            (Some(_), None) => self.affine(1.0 / rhs.value, 0.0),
            (None, _) => rhs.recip_scaled(self.value),
        }
    }
}

impl<'t> Neg for Var<'t> {
    type Output = Var<'t>;

    fn neg(self) -> Var<'t> {
        self.affine(-1.0, 0.0)
    }
}

impl<'t> Add<f64> for Var<'t> {
    type Output = Var<'t>;

    fn add(self, rhs: f64) -> Var<'t> {
        self.affine(1.0, rhs)
    }
}

impl<'t> Sub<f64> for Var<'t> {
    type Output = Var<'t>;

    fn sub(self, rhs: f64) -> Var<'t> {
        self.affine(1.0, -rhs)
    }
}

impl<'t> Mul<f64> for Var<'t> {
    type Output = Var<'t>;

    fn mul(self, rhs: f64) -> Var<'t> {
        self.affine(rhs, 0.0)
    }
}

impl<'t> Div<f64> for Var<'t> {
    type Output = Var<'t>;

    fn div(self, rhs: f64) -> Var<'t> {
        self.affine(1.0 / rhs, 0.0)
    }
}

impl<'t> Add<Var<'t>> for f64 {
    type Output = Var<'t>;

    fn add(self, rhs: Var<'t>) -> Var<'t> {
        rhs.affine(1.0, self)
    }
}

impl<'t> Sub<Var<'t>> for f64 {
    type Output = Var<'t>;

    fn sub(self, rhs: Var<'t>) -> Var<'t> {
        rhs.affine(-1.0, self)
    }
}

impl<'t> Mul<Var<'t>> for f64 {
    type Output = Var<'t>;

    fn mul(self, rhs: Var<'t>) -> Var<'t> {
        rhs.affine(self, 0.0)
    }
}

impl<'t> Div<Var<'t>> for f64 {
    type Output = Var<'t>;

    fn div(self, rhs: Var<'t>) -> Var<'t> {
        rhs.recip_scaled(self)
    }
}

impl Zero for Var<'_> {
    fn zero() -> Self {
        Var::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.slot.is_none() && self.value == 0.0
    }
}

impl One for Var<'_> {
    fn one() -> Self {
        Var::constant(1.0)
    }
}

impl Scalar for Var<'_> {
    fn from_f64(value: f64) -> Self {
        Var::constant(value)
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn exp(&self) -> Self {
        self.unary(Op::Exp, self.value.exp())
    }

    fn ln(&self) -> Self {
        self.unary(Op::Ln, self.value.ln())
    }

    fn sin(&self) -> Self {
        self.unary(Op::Sin, self.value.sin())
    }

    fn cos(&self) -> Self {
        self.unary(Op::Cos, self.value.cos())
    }

    fn tan(&self) -> Self {
        self.unary(Op::Tan, self.value.tan())
    }

    fn sqrt(&self) -> Self {
        self.unary(Op::Sqrt, self.value.sqrt())
    }

    fn tanh(&self) -> Self {
        self.unary(Op::Tanh, self.value.tanh())
    }

    fn abs(&self) -> Self {
        self.unary(Op::Abs, self.value.abs())
    }

    fn powi(&self, n: i32) -> Self {
        let value = self.value.powi(n);
        match self.slot {
            Some((tape, arg)) => Var::tracked(tape, tape.push(Op::Powi(arg, n), value), value),
            None => Var::constant(value),
        }
    }

    fn powf(&self, exponent: f64) -> Self {
        let value = self.value.powf(exponent);
        match self.slot {
            Some((tape, arg)) => {
                Var::tracked(tape, tape.push(Op::Powf(arg, exponent), value), value)
            }
            None => Var::constant(value),
        }
    }
}
