//! Test execution interface.
//!
//! The search never runs code under test itself. An [`Executor`] turns a
//! test case into an [`ExecutionResult`], honoring the cancellation token it
//! is handed. Timeouts are reported inside the result, not as errors.

mod synthetic;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::schema::{ExceptionKind, ExecutionResult, TestCase};

pub use synthetic::{
    CmpOp, Condition, Guard, SyntheticBranch, SyntheticExecutor, SyntheticMethod, SyntheticUnit,
    SyntheticUnitError,
};

/// Runs single test cases against the unit under test.
pub trait Executor: Send + Sync {
    /// Execute `test`. Implementations check `token` at loop back-edges and
    /// branch points and record a timeout when it fires.
    fn execute(&self, test: &TestCase, token: &CancellationToken) -> ExecutionResult;
}

/// Raised by [`CancellationToken::checkpoint`] once execution must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Execution cancelled")]
pub struct Cancelled;

/// Cooperative cancellation for one execution: an external interrupt flag
/// plus an optional deadline.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    interrupt: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A token that is never cancelled unless [`cancel`](Self::cancel) is
    /// called.
    pub fn new() -> Self {
        Self {
            interrupt: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Share an existing interrupt flag.
    pub fn with_interrupt(interrupt: Arc<AtomicBool>) -> Self {
        Self {
            interrupt,
            deadline: None,
        }
    }

    /// Expire `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn cancel(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// Whether the shared interrupt fired, as opposed to the deadline.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Outcome to report when [`checkpoint`](Self::checkpoint) fails.
    pub fn stop_kind(&self) -> ExceptionKind {
        if self.is_interrupted() {
            ExceptionKind::Cancelled
        } else {
            ExceptionKind::Timeout
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Yield point for executed code.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
