//! Reference backend.

use crate::accel::{AccelerationError, EvaluationBackend};
use crate::block::{BlockInputs, BlockOutput, PreparedBlock};

/// Evaluates blocks one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialBackend;

impl SerialBackend {
    /// Infallible evaluation used as the reference result.
    pub fn run(blocks: &[PreparedBlock], inputs: &[BlockInputs]) -> Vec<BlockOutput> {
        blocks
            .iter()
            .zip(inputs)
            .map(|(block, inputs)| block.evaluate(inputs))
            .collect()
    }
}

impl EvaluationBackend for SerialBackend {
    fn name(&self) -> &str {
        "serial"
    }

    fn evaluate(
        &self,
        blocks: &[PreparedBlock],
        inputs: &[BlockInputs],
    ) -> Result<Vec<BlockOutput>, AccelerationError> {
        Ok(Self::run(blocks, inputs))
    }
}
