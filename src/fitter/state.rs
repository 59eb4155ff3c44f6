//! Driver state machine, cancellation and timeouts.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{MusrFitError, Result};

/// State of the minimization driver.
///
/// ```text
/// Initialized → Iterating → {Converged, MaxIterationsExceeded, Failed}
/// Converged → ErrorEstimation → Done
/// ```
///
/// A further minimization command re-enters `Iterating` from `Converged`,
/// `MaxIterationsExceeded` or `ErrorEstimation`. A command that fails
/// between minimizations moves those states to `Failed`. `Failed` only
/// leads to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitState {
    Initialized,
    Iterating,
    Converged,
    MaxIterationsExceeded,
    Failed,
    ErrorEstimation,
    Done,
}

impl FitState {
    fn can_move_to(self, next: FitState) -> bool {
        use FitState::*;
        matches!(
            (self, next),
            (Initialized, Iterating)
                | (Initialized, Failed)
                | (Iterating, Converged)
                | (Iterating, MaxIterationsExceeded)
                | (Iterating, Failed)
                | (Converged, ErrorEstimation)
                | (Converged, Iterating)
                | (Converged, Done)
                | (Converged, Failed)
                | (MaxIterationsExceeded, Iterating)
                | (MaxIterationsExceeded, Done)
                | (MaxIterationsExceeded, Failed)
                | (ErrorEstimation, ErrorEstimation)
                | (ErrorEstimation, Iterating)
                | (ErrorEstimation, Done)
                | (ErrorEstimation, Failed)
                | (Failed, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == FitState::Done
    }
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitState::Initialized => "initialized",
            FitState::Iterating => "iterating",
            FitState::Converged => "converged",
            FitState::MaxIterationsExceeded => "max-iterations-exceeded",
            FitState::Failed => "failed",
            FitState::ErrorEstimation => "error-estimation",
            FitState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Final status code of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    MaxIterations,
    Failed,
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStatus::Converged => f.write_str("Converged"),
            FitStatus::MaxIterations => f.write_str("MaxIterations"),
            FitStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// Tracks the driver state and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: FitState,
    /// State the last minimization ended in
    last_outcome: Option<FitState>,
    history: Vec<FitState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: FitState::Initialized,
            last_outcome: None,
            history: vec![FitState::Initialized],
        }
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[FitState] {
        &self.history
    }

    /// Outcome of the most recent minimization, if any ran.
    pub fn last_outcome(&self) -> Option<FitState> {
        self.last_outcome
    }

    pub fn transition(&mut self, next: FitState) -> Result<()> {
        if !self.state.can_move_to(next) {
            return Err(MusrFitError::Other(format!(
                "illegal fit state transition {} -> {}",
                self.state, next
            )));
        }
        if matches!(
            next,
            FitState::Converged | FitState::MaxIterationsExceeded | FitState::Failed
        ) {
            self.last_outcome = Some(next);
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Whether the point estimate is a converged minimum, so curvature
    /// based errors are meaningful.
    pub fn at_minimum(&self) -> bool {
        matches!(self.state, FitState::Converged | FitState::ErrorEstimation)
    }

    /// Status code for the result record.
    pub fn status(&self) -> FitStatus {
        match self.last_outcome {
            Some(FitState::Converged) => FitStatus::Converged,
            Some(FitState::MaxIterationsExceeded) => FitStatus::MaxIterations,
            _ => FitStatus::Failed,
        }
    }
}

/// Shared flag to abort a running fit between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    Cancelled,
    TimedOut,
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abort::Cancelled => f.write_str("fit cancelled"),
            Abort::TimedOut => f.write_str("fit timed out"),
        }
    }
}

/// Cancellation and deadline, checked at the top of every iteration.
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(cancel: CancelToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Never aborts.
    pub fn unlimited() -> Self {
        Self::new(CancelToken::new(), None)
    }

    pub fn check(&self) -> std::result::Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Abort::TimedOut),
            _ => Ok(()),
        }
    }
}
