use super::op::Node;
use super::sweep;

/// A frozen tape that can be re-evaluated at new inputs.
///
/// Produced by [`Tape::compile`](super::Tape::compile). [`replay`](Self::replay)
/// recomputes every node in recording order, then [`pullback`](Self::pullback)
/// runs a reverse sweep over the replayed values.
///
/// The recorded operation sequence is reused as-is, so the result is only
/// correct when the traced function takes the same branches at every input.
#[derive(Debug, Clone)]
pub struct CompiledTape {
    nodes: Vec<Node>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

impl CompiledTape {
    pub(super) fn new(nodes: Vec<Node>, inputs: Vec<usize>, outputs: Vec<usize>) -> Self {
        Self {
            nodes,
            inputs,
            outputs,
        }
    }

    /// Returns the number of program arguments.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Returns the number of program results.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Re-evaluates the program at `inputs` and returns its outputs.
    ///
    /// # Panics
    ///
    /// Panics if `inputs` has the wrong length.
    pub fn replay(&mut self, inputs: &[f64]) -> Vec<f64> {
        assert_eq!(inputs.len(), self.inputs.len(), "wrong number of inputs");

        for (&index, &value) in self.inputs.iter().zip(inputs) {
            self.nodes[index].value = value;
        }
        for i in 0..self.nodes.len() {
            if let Some(value) = self.nodes[i].op.eval(&self.nodes[..i]) {
                self.nodes[i].value = value;
            }
        }

        self.outputs.iter().map(|&i| self.nodes[i].value).collect()
    }

    /// Propagates `cotangent` from the outputs back to the inputs.
    ///
    /// Uses the values of the most recent [`replay`](Self::replay), or the
    /// recorded values if the program has not been replayed.
    ///
    /// # Panics
    ///
    /// Panics if `cotangent` has the wrong length.
    #[must_use]
    pub fn pullback(&self, cotangent: &[f64]) -> Vec<f64> {
        assert_eq!(cotangent.len(), self.outputs.len(), "wrong cotangent length");

        let mut adjoints = vec![0.0; self.nodes.len()];
        for (&index, &weight) in self.outputs.iter().zip(cotangent) {
            adjoints[index] += weight;
        }
        sweep(&self.nodes, &mut adjoints);

        self.inputs.iter().map(|&i| adjoints[i]).collect()
    }
}
