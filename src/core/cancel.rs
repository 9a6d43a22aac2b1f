//! Cooperative cancellation and run deadlines.

use crate::core::error::HarnessError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Clonable cancellation flag shared between a caller and a running simulation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Wall-clock budget for one run plus the caller's cancel token.
#[derive(Debug, Clone)]
pub struct RunBudget {
    started: Instant,
    deadline: Instant,
    cancel: CancelToken,
}

impl RunBudget {
    pub fn new(budget: Duration, cancel: CancelToken) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + budget,
            cancel,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Stage-boundary check.
    pub fn check(&self, stage: &str) -> Result<(), HarnessError> {
        if self.cancel.is_cancelled() {
            return Err(HarnessError::Cancelled(format!("cancelled before {}", stage)));
        }
        if self.expired() {
            return Err(HarnessError::DeadlineExceeded(format!(
                "run budget exhausted before {} ({}s elapsed)",
                stage,
                self.elapsed().as_secs()
            )));
        }
        Ok(())
    }
}
