//! Rayon backend: one task per block.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::accel::{AccelerationError, EvaluationBackend};
use crate::block::{BlockInputs, BlockOutput, PreparedBlock};

/// Evaluates blocks concurrently on a rayon thread pool.
///
/// Each block is still evaluated sample by sample in order, so the
/// per-block values are identical to the serial backend's.
#[derive(Debug, Default)]
pub struct RayonBackend {
    pool: Option<ThreadPool>,
}

impl RayonBackend {
    /// Use rayon's global pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Use a dedicated pool with `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self, AccelerationError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| AccelerationError::Unavailable {
                backend: "rayon".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { pool: Some(pool) })
    }
}

impl EvaluationBackend for RayonBackend {
    fn name(&self) -> &str {
        "rayon"
    }

    fn evaluate(
        &self,
        blocks: &[PreparedBlock],
        inputs: &[BlockInputs],
    ) -> Result<Vec<BlockOutput>, AccelerationError> {
        if blocks.len() != inputs.len() {
            return Err(AccelerationError::Failed {
                backend: self.name().to_string(),
                reason: format!("{} blocks but {} inputs", blocks.len(), inputs.len()),
            });
        }
        let run = || -> Vec<BlockOutput> {
            blocks
                .par_iter()
                .zip(inputs.par_iter())
                .map(|(block, inputs)| block.evaluate(inputs))
                .collect()
        };
        Ok(match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        })
    }
}
