//! # Evaluation Backends
//!
//! The per-block evaluation phase can run on interchangeable backends. The
//! serial backend is the reference: every other backend must produce the
//! same per-block values to within a relative tolerance, and the
//! [`Dispatcher`] checks this on the first call and periodically after.
//! When a backend errors or diverges, the dispatcher logs a warning, uses
//! the serial result and stays serial for the rest of the session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::{BlockInputs, BlockOutput, PreparedBlock};

pub mod dispatcher;
#[cfg(feature = "parallel")]
pub mod parallel;
pub mod serial;

pub use dispatcher::{Dispatcher, VerificationPolicy};
#[cfg(feature = "parallel")]
pub use parallel::RayonBackend;
pub use serial::SerialBackend;

/// Errors reported by evaluation backends
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccelerationError {
    #[error("Backend '{backend}' is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend '{backend}' failed: {reason}")]
    Failed { backend: String, reason: String },

    #[error(
        "Backend '{backend}' diverged from the serial path in block {block}: {accelerated} vs {serial}"
    )]
    Diverged {
        backend: String,
        block: usize,
        accelerated: f64,
        serial: f64,
    },

    #[error(
        "Backend '{backend}' diverged from the serial path in block {block}, residual {index}: {accelerated} vs {serial}"
    )]
    ResidualDiverged {
        backend: String,
        block: usize,
        index: usize,
        accelerated: f64,
        serial: f64,
    },
}

/// Evaluates a set of prepared blocks.
///
/// Outputs must be returned in block order. Implementations may evaluate
/// blocks concurrently; [`PreparedBlock::evaluate`] only reads shared state.
pub trait EvaluationBackend: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        blocks: &[PreparedBlock],
        inputs: &[BlockInputs],
    ) -> Result<Vec<BlockOutput>, AccelerationError>;
}

/// Built-in backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Serial,
    #[default]
    Parallel,
}

/// Instantiate a built-in backend. Without the `parallel` feature the
/// parallel choice degrades to serial.
pub fn backend_for(kind: BackendKind) -> Arc<dyn EvaluationBackend> {
    match kind {
        BackendKind::Serial => Arc::new(SerialBackend),
        #[cfg(feature = "parallel")]
        BackendKind::Parallel => Arc::new(RayonBackend::new()),
        #[cfg(not(feature = "parallel"))]
        BackendKind::Parallel => {
            log::warn!("built without the 'parallel' feature, evaluating serially");
            Arc::new(SerialBackend)
        }
    }
}
