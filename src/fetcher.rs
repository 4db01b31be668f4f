//! External Authorization Value Fetcher
//!
//! Resolves the allowed values of authorization variables that no role grant
//! supplies. Every variable is fetched independently on a bounded group of
//! worker threads; the caller blocks until all fetches report back, one
//! fails, or the `WaitGuard` trips. A stalled source never holds the caller
//! past the guard's deadline.
//!
//! ```text
//! resolve() --jobs--> worker 1..N --fetch()--> DashMap<name, values>
//!     ^                    |
//!     +----- done_rx <-----+   (countdown: one message per variable)
//! ```
//!
//! Anything short of a complete resolution is reported so the caller can fail
//! closed: a variable with no answer is authorized for no value at all.

use crate::execution::{Interrupted, WaitGuard};
use crate::model::SqlVariable;
use crossbeam_channel as channel;
use dashmap::DashMap;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default size of the worker group.
pub const DEFAULT_FETCH_WORKERS: usize = 7;

const POLL_SLICE: Duration = Duration::from_millis(50);

/// A fetch that cannot be recovered from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fetching values for '{variable}' failed: {message}")]
pub struct FetchError {
    pub variable: String,
    pub message: String,
}

/// Where allowed values for an authorization variable come from.
pub trait AuthValueSource: Send + Sync {
    /// `Ok(None)` when the source has no answer for the variable.
    fn fetch(&self, variable: &SqlVariable) -> Result<Option<Vec<String>>, FetchError>;
}

/// Source that answers with the variable's declared default values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredDefaults;

impl AuthValueSource for DeclaredDefaults {
    fn fetch(&self, variable: &SqlVariable) -> Result<Option<Vec<String>>, FetchError> {
        if variable.default_values.is_empty() {
            Ok(None)
        } else {
            Ok(Some(variable.default_values.clone()))
        }
    }
}

/// Result of one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Every variable has an entry (possibly empty)
    Complete(HashMap<String, Vec<String>>),
    /// A fetch failed; remaining work was abandoned
    Failed(FetchError),
    /// The wait was cancelled or timed out
    Interrupted(Interrupted),
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, FetchOutcome::Complete(_))
    }

    /// Resolved values, or an empty mapping when resolution did not complete.
    pub fn into_values(self) -> HashMap<String, Vec<String>> {
        match self {
            FetchOutcome::Complete(values) => values,
            FetchOutcome::Failed(e) => {
                tracing::warn!(error = %e, "authorization fetch failed, denying unresolved variables");
                HashMap::new()
            }
            FetchOutcome::Interrupted(e) => {
                tracing::warn!(error = %e, "authorization fetch interrupted, denying unresolved variables");
                HashMap::new()
            }
        }
    }
}

/// Bounded concurrent resolver.
#[derive(Debug, Clone)]
pub struct AuthValueFetcher {
    workers: usize,
}

impl Default for AuthValueFetcher {
    fn default() -> Self {
        AuthValueFetcher::new(DEFAULT_FETCH_WORKERS)
    }
}

impl AuthValueFetcher {
    pub fn new(workers: usize) -> Self {
        AuthValueFetcher {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetch allowed values for `variables` concurrently.
    ///
    /// Returns as soon as every variable has reported, one fetch fails, or
    /// `guard` trips. Workers own their inputs, so a fetch still in flight
    /// after an interruption keeps running in the background and its answer
    /// is discarded.
    pub fn resolve(
        &self,
        variables: &[SqlVariable],
        source: Arc<dyn AuthValueSource>,
        guard: &WaitGuard,
    ) -> FetchOutcome {
        if variables.is_empty() {
            return FetchOutcome::Complete(HashMap::new());
        }

        let values: Arc<DashMap<String, Vec<String>>> = Arc::new(DashMap::new());
        let (job_tx, job_rx) = channel::unbounded::<SqlVariable>();
        for variable in variables {
            // Receiver is held below
            let _ = job_tx.send(variable.clone());
        }
        drop(job_tx);

        let (done_tx, done_rx) = channel::unbounded::<Result<(), FetchError>>();
        let workers = self.workers.min(variables.len());
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let values = Arc::clone(&values);
            let source = Arc::clone(&source);
            let worker_guard = guard.clone();
            let spawned = thread::Builder::new()
                .name(format!("auth-fetch-{id}"))
                .spawn(move || fetch_worker(&job_rx, &done_tx, &values, source.as_ref(), &worker_guard));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    guard.cancel();
                    return FetchOutcome::Failed(FetchError {
                        variable: String::new(),
                        message: format!("failed to spawn fetch worker: {e}"),
                    });
                }
            }
        }
        drop(done_tx);

        let mut remaining = variables.len();
        while remaining > 0 {
            if let Err(e) = guard.check() {
                guard.cancel();
                return FetchOutcome::Interrupted(e);
            }
            match done_rx.recv_timeout(guard.next_slice(POLL_SLICE)) {
                Ok(Ok(())) => remaining -= 1,
                Ok(Err(e)) => {
                    guard.cancel();
                    return FetchOutcome::Failed(e);
                }
                Err(channel::RecvTimeoutError::Timeout) => {}
                Err(channel::RecvTimeoutError::Disconnected) => {
                    guard.cancel();
                    return FetchOutcome::Failed(FetchError {
                        variable: String::new(),
                        message: "fetch workers exited early".to_string(),
                    });
                }
            }
        }

        // Every job has reported, so the job queue is drained and workers exit
        for handle in handles {
            let _ = handle.join();
        }

        let mut resolved: HashMap<String, Vec<String>> = values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for variable in variables {
            resolved.entry(variable.name.trim().to_string()).or_default();
        }
        tracing::debug!(variables = resolved.len(), "authorization values resolved");
        FetchOutcome::Complete(resolved)
    }
}

fn fetch_worker(
    jobs: &channel::Receiver<SqlVariable>,
    done: &channel::Sender<Result<(), FetchError>>,
    values: &DashMap<String, Vec<String>>,
    source: &dyn AuthValueSource,
    guard: &WaitGuard,
) {
    for variable in jobs.iter() {
        if guard.is_cancelled() {
            break;
        }
        let result = fetch_one(source, &variable);
        // Late answers after an interruption are dropped
        if guard.is_cancelled() {
            break;
        }
        let result = result.map(|allowed| {
            let mut slot = values.entry(variable.name.trim().to_string()).or_default();
            for value in allowed {
                if !slot.contains(&value) {
                    slot.push(value);
                }
            }
        });
        if done.send(result).is_err() {
            break;
        }
    }
}

fn fetch_one(source: &dyn AuthValueSource, variable: &SqlVariable) -> Result<Vec<String>, FetchError> {
    match panic::catch_unwind(AssertUnwindSafe(|| source.fetch(variable))) {
        Ok(result) => result.map(Option::unwrap_or_default),
        Err(_) => Err(FetchError {
            variable: variable.name.clone(),
            message: "value source panicked".to_string(),
        }),
    }
}
