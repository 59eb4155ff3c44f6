//! Backend dispatch with serial verification and fallback.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::accel::{AccelerationError, EvaluationBackend, SerialBackend};
use crate::block::{BlockInputs, BlockOutput, PreparedBlock};

/// When and how strictly accelerated results are checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationPolicy {
    /// Maximum relative difference of a block value
    pub tolerance: f64,
    /// Verify every n-th call after the first; 0 verifies the first call only
    pub verify_every: usize,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            verify_every: 50,
        }
    }
}

/// Routes block evaluation to the selected backend.
///
/// The serial result wins on any disagreement; once that happens, the
/// session stays on the serial path.
pub struct Dispatcher {
    primary: Arc<dyn EvaluationBackend>,
    policy: VerificationPolicy,
    calls: AtomicUsize,
    fallen_back: AtomicBool,
    last_error: Mutex<Option<AccelerationError>>,
}

impl Dispatcher {
    pub fn new(primary: Arc<dyn EvaluationBackend>, policy: VerificationPolicy) -> Self {
        Self {
            primary,
            policy,
            calls: AtomicUsize::new(0),
            fallen_back: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// A dispatcher that only ever evaluates serially.
    pub fn serial() -> Self {
        Self::new(Arc::new(SerialBackend), VerificationPolicy::default())
    }

    /// Name of the backend currently in use.
    pub fn active_backend(&self) -> &str {
        if self.is_serial() {
            "serial"
        } else {
            self.primary.name()
        }
    }

    pub fn has_fallen_back(&self) -> bool {
        self.fallen_back.load(Ordering::Relaxed)
    }

    /// The error that caused the fallback, if any.
    pub fn last_error(&self) -> Option<AccelerationError> {
        match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_serial(&self) -> bool {
        self.has_fallen_back() || self.primary.name() == "serial"
    }

    fn should_verify(&self, call: usize) -> bool {
        call == 0 || (self.policy.verify_every > 0 && call % self.policy.verify_every == 0)
    }

    fn fall_back(&self, error: AccelerationError) {
        warn!("{}; continuing with the serial backend", error);
        self.fallen_back.store(true, Ordering::Relaxed);
        match self.last_error.lock() {
            Ok(mut guard) => *guard = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }

    /// Evaluate all blocks. Never fails: the serial path is always available.
    pub fn evaluate(&self, blocks: &[PreparedBlock], inputs: &[BlockInputs]) -> Vec<BlockOutput> {
        if self.is_serial() {
            return SerialBackend::run(blocks, inputs);
        }

        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let accelerated = match self.primary.evaluate(blocks, inputs) {
            Ok(outputs) if outputs.len() == blocks.len() => outputs,
            Ok(outputs) => {
                self.fall_back(AccelerationError::Failed {
                    backend: self.primary.name().to_string(),
                    reason: format!("returned {} outputs for {} blocks", outputs.len(), blocks.len()),
                });
                return SerialBackend::run(blocks, inputs);
            }
            Err(err) => {
                self.fall_back(err);
                return SerialBackend::run(blocks, inputs);
            }
        };

        if !self.should_verify(call) {
            return accelerated;
        }

        let reference = SerialBackend::run(blocks, inputs);
        match find_divergence(self.primary.name(), &accelerated, &reference, self.policy.tolerance) {
            Some(err) => {
                self.fall_back(err);
                reference
            }
            None => {
                debug!("backend '{}' verified on call {}", self.primary.name(), call);
                accelerated
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("primary", &self.primary.name())
            .field("policy", &self.policy)
            .field("fallen_back", &self.has_fallen_back())
            .finish()
    }
}

/// First disagreement between the accelerated and the serial outputs.
///
/// Block values and every residual must agree to within `tolerance`
/// (relative); point and residual counts must match exactly.
fn find_divergence(
    backend: &str,
    accelerated: &[BlockOutput],
    reference: &[BlockOutput],
    tolerance: f64,
) -> Option<AccelerationError> {
    for (block, (a, s)) in accelerated.iter().zip(reference).enumerate() {
        if a.n_points != s.n_points || a.residuals.len() != s.residuals.len() {
            return Some(AccelerationError::Failed {
                backend: backend.to_string(),
                reason: format!(
                    "block {}: {} points and {} residuals, serial has {} and {}",
                    block,
                    a.n_points,
                    a.residuals.len(),
                    s.n_points,
                    s.residuals.len()
                ),
            });
        }
        if !agree(a.value, s.value, tolerance) {
            return Some(AccelerationError::Diverged {
                backend: backend.to_string(),
                block,
                accelerated: a.value,
                serial: s.value,
            });
        }
        let residual = a
            .residuals
            .iter()
            .zip(&s.residuals)
            .position(|(&ra, &rs)| !agree(ra, rs, tolerance));
        if let Some(index) = residual {
            return Some(AccelerationError::ResidualDiverged {
                backend: backend.to_string(),
                block,
                index,
                accelerated: a.residuals[index],
                serial: s.residuals[index],
            });
        }
    }
    None
}

/// Relative comparison; two non-finite numbers agree, one does not.
fn agree(a: f64, s: f64, tolerance: f64) -> bool {
    match (a.is_finite(), s.is_finite()) {
        (true, true) => {
            let scale = s.abs().max(a.abs()).max(f64::MIN_POSITIVE);
            (a - s).abs() <= tolerance * scale
        }
        (false, false) => true,
        _ => false,
    }
}
