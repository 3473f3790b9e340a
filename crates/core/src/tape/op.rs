/// A recorded elementary operation; operands are node indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Op {
    Input,
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    /// `scale * arg + offset`, covering mixed operations with constants.
    Affine {
        arg: usize,
        scale: f64,
        offset: f64,
    },
    /// `numerator / arg`.
    Recip {
        arg: usize,
        numerator: f64,
    },
    Exp(usize),
    Ln(usize),
    Sin(usize),
    Cos(usize),
    Tan(usize),
    Sqrt(usize),
    Tanh(usize),
    Abs(usize),
    Powi(usize, i32),
    Powf(usize, f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Node {
    pub(super) op: Op,
    pub(super) value: f64,
}

impl Op {
    /// Recomputes the operation's value from already-evaluated operands.
    ///
    /// Returns `None` for inputs, whose values are supplied externally.
    pub(super) fn eval(self, nodes: &[Node]) -> Option<f64> {
        let v = |i: usize| nodes[i].value;
        let value = match self {
            Op::Input => return None,
            Op::Add(a, b) => v(a) + v(b),
            Op::Sub(a, b) => v(a) - v(b),
            Op::Mul(a, b) => v(a) * v(b),
            Op::Div(a, b) => v(a) / v(b),
            Op::Affine { arg, scale, offset } => scale * v(arg) + offset,
            Op::Recip { arg, numerator } => numerator / v(arg),
            Op::Exp(a) => v(a).exp(),
            Op::Ln(a) => v(a).ln(),
            Op::Sin(a) => v(a).sin(),
            Op::Cos(a) => v(a).cos(),
            Op::Tan(a) => v(a).tan(),
            Op::Sqrt(a) => v(a).sqrt(),
            Op::Tanh(a) => v(a).tanh(),
            Op::Abs(a) => v(a).abs(),
            Op::Powi(a, n) => v(a).powi(n),
            Op::Powf(a, e) => v(a).powf(e),
        };
        Some(value)
    }
}
