//! Reverse-mode automatic differentiation on an append-only tape.
//!
//! A [`Tape`] records every elementary operation performed on its [`Var`]
//! handles. A reverse sweep over the record produces the gradient of one
//! output, or the pullback of a cotangent through several outputs.
//!
//! A tape can also be frozen into a [`CompiledTape`]: the operation list is
//! replayed at new input values without tracing the function again. Replay is
//! only valid for functions whose control flow does not depend on the values
//! flowing through them.
//!
//! # Example
//!
//! ```
//! use deriva_core::{Scalar, Tape};
//!
//! let tape = Tape::new();
//! let x = tape.var(2.0);
//! let y = tape.var(3.0);
//!
//! let z = x * y + x.sin();
//! let grads = tape.gradient(&z);
//!
//! assert!((grads.wrt(&x) - (3.0 + 2.0_f64.cos())).abs() < 1e-12);
//! assert!((grads.wrt(&y) - 2.0).abs() < 1e-12);
//! ```

mod compiled;
mod op;
mod var;

pub use compiled::CompiledTape;
pub use var::Var;

use std::cell::RefCell;

use op::{Node, Op};

use crate::Scalar;

/// An append-only record of elementary operations.
#[derive(Debug, Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

impl Tape {
    /// Creates an empty tape.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new independent variable.
    pub fn var(&self, value: f64) -> Var<'_> {
        let index = self.push(Op::Input, value);
        Var::tracked(self, index, value)
    }

    /// Records one independent variable per value.
    pub fn vars(&self, values: &[f64]) -> Vec<Var<'_>> {
        values.iter().map(|&v| self.var(v)).collect()
    }

    /// Returns the number of recorded nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Computes the gradient of `output` with respect to every recorded node.
    pub fn gradient(&self, output: &Var<'_>) -> Adjoints {
        self.pullback(std::slice::from_ref(output), &[1.0])
    }

    /// Propagates `cotangent` backward from `outputs`.
    ///
    /// The result holds `Σ_k cotangent[k] · ∂outputs[k]/∂x` for every node `x`.
    /// Constant outputs contribute nothing.
    ///
    /// # Panics
    ///
    /// Panics if `outputs` and `cotangent` differ in length.
    pub fn pullback(&self, outputs: &[Var<'_>], cotangent: &[f64]) -> Adjoints {
        assert_eq!(
            outputs.len(),
            cotangent.len(),
            "one cotangent entry is required per output"
        );

        let nodes = self.nodes.borrow();
        let mut adjoints = vec![0.0; nodes.len()];
        for (output, weight) in outputs.iter().zip(cotangent) {
            if let Some(index) = output.index() {
                adjoints[index] += weight;
            }
        }
        sweep(&nodes, &mut adjoints);

        Adjoints(adjoints)
    }

    /// Freezes the current record into a replayable program.
    ///
    /// `inputs` become the program's arguments in order; `outputs` are the
    /// values it returns. Inputs recorded on the tape but not listed here are
    /// frozen at their recorded values, and so are constant outputs.
    pub fn compile(&self, inputs: &[Var<'_>], outputs: &[Var<'_>]) -> CompiledTape {
        let inputs = inputs.iter().map(|v| self.slot(v)).collect();
        let outputs = outputs.iter().map(|v| self.slot(v)).collect();
        CompiledTape::new(self.nodes.borrow().clone(), inputs, outputs)
    }

    /// Returns the node index of `var`, recording constants as frozen nodes.
    fn slot(&self, var: &Var<'_>) -> usize {
        var.index()
            .unwrap_or_else(|| self.push(Op::Input, Scalar::value(var)))
    }

    fn push(&self, op: Op, value: f64) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node { op, value });
        nodes.len() - 1
    }
}

/// The result of a reverse sweep.
#[derive(Debug, Clone)]
pub struct Adjoints(Vec<f64>);

impl Adjoints {
    /// Returns the accumulated adjoint of `var`, or zero for constants.
    #[must_use]
    pub fn wrt(&self, var: &Var<'_>) -> f64 {
        var.index().map_or(0.0, |i| self.0[i])
    }

    /// Returns the adjoints of several variables.
    #[must_use]
    pub fn wrt_all(&self, vars: &[Var<'_>]) -> Vec<f64> {
        vars.iter().map(|v| self.wrt(v)).collect()
    }
}

/// Accumulates adjoints from the last node to the first.
fn sweep(nodes: &[Node], adjoints: &mut [f64]) {
    for i in (0..nodes.len()).rev() {
        let bar = adjoints[i];
        if bar == 0.0 {
            continue;
        }
        let node = nodes[i];
        let value = node.value;
        match node.op {
            Op::Input => {}
            Op::Add(a, b) => {
                adjoints[a] += bar;
                adjoints[b] += bar;
            }
            Op::Sub(a, b) => {
                adjoints[a] += bar;
                adjoints[b] -= bar;
            }
            Op::Mul(a, b) => {
                adjoints[a] += bar * nodes[b].value;
                adjoints[b] += bar * nodes[a].value;
            }
            Op::Div(a, b) => {
                let denom = nodes[b].value;
                adjoints[a] += bar / denom;
                adjoints[b] -= bar * value / denom;
            }
            Op::Affine { arg, scale, .. } => adjoints[arg] += bar * scale,
            Op::Recip { arg, numerator: _ } => adjoints[arg] -= bar * value / nodes[arg].value,
            Op::Exp(a) => adjoints[a] += bar * value,
            Op::Ln(a) => adjoints[a] += bar / nodes[a].value,
            Op::Sin(a) => adjoints[a] += bar * nodes[a].value.cos(),
            Op::Cos(a) => adjoints[a] -= bar * nodes[a].value.sin(),
            Op::Tan(a) => adjoints[a] += bar * (1.0 + value * value),
            Op::Sqrt(a) => adjoints[a] += bar * 0.5 / value,
            Op::Tanh(a) => adjoints[a] += bar * (1.0 - value * value),
            Op::Abs(a) => {
                let sign = if nodes[a].value < 0.0 { -1.0 } else { 1.0 };
                adjoints[a] += bar * sign;
            }
            Op::Powi(a, n) => {
                if n != 0 {
                    adjoints[a] += bar * f64::from(n) * nodes[a].value.powi(n - 1);
                }
            }
            Op::Powf(a, exponent) => {
                if exponent != 0.0 {
                    adjoints[a] += bar * exponent * nodes[a].value.powf(exponent - 1.0);
                }
            }
        }
    }
}
