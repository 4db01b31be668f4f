//! Cancellation for blocking waits
//!
//! A `WaitGuard` bounds how long the pipeline may block on background work.
//! It trips either when its deadline passes or when someone holding a
//! `CancelHandle` cancels it. Waiters poll `check()` between short waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a wait was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("wait cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration },

    #[error("wait exceeded timeout of {timeout:?} (ran for {elapsed:?})")]
    TimedOut { timeout: Duration, elapsed: Duration },
}

/// Deadline plus cooperative cancellation flag for one wait.
#[derive(Clone, Debug)]
pub struct WaitGuard {
    cancelled: Arc<AtomicBool>,
    start_time: Instant,
    timeout: Option<Duration>,
}

impl WaitGuard {
    pub fn new(timeout: Option<Duration>) -> Self {
        WaitGuard {
            cancelled: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
            timeout,
        }
    }

    /// Build from a millisecond setting where 0 means no timeout.
    pub fn from_millis(timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            WaitGuard::unbounded()
        } else {
            WaitGuard::new(Some(Duration::from_millis(timeout_ms)))
        }
    }

    pub fn unbounded() -> Self {
        WaitGuard::new(None)
    }

    /// `Ok(())` while the wait may continue.
    pub fn check(&self) -> Result<(), Interrupted> {
        let elapsed = self.start_time.elapsed();
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(Interrupted::Cancelled { elapsed });
        }
        if let Some(timeout) = self.timeout {
            if elapsed > timeout {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(Interrupted::TimedOut { timeout, elapsed });
            }
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Time left before the deadline, capped at `slice`.
    pub fn next_slice(&self, slice: Duration) -> Duration {
        match self.timeout {
            Some(timeout) => timeout
                .checked_sub(self.start_time.elapsed())
                .unwrap_or(Duration::ZERO)
                .min(slice),
            None => slice,
        }
    }

    /// Handle that can cancel this wait from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl Default for WaitGuard {
    fn default() -> Self {
        WaitGuard::new(Some(Duration::from_secs(30)))
    }
}

/// Cancels the associated `WaitGuard`.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
