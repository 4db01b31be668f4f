//! Grant Writer
//!
//! Role grants for a saved view are written off the request path. A single
//! worker thread owns the store calls; callers get a `GrantJob` they can wait
//! on, or drop.
//!
//! Only roles whose row authorization names at least one declared variable
//! are persisted.

use crate::authorization::row_auth_entries;
use crate::error::{ViewError, ViewResult};
use crate::model::{RoleGrantRequest, RoleViewGrant, SqlVariable, User};
use crate::store::GrantStore;
use crossbeam_channel as channel;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

enum GrantCommand {
    Insert {
        view_id: u64,
        grants: Vec<RoleViewGrant>,
        response: channel::Sender<ViewResult<usize>>,
    },
    Shutdown {
        response: channel::Sender<()>,
    },
}

/// Grants worth persisting for `view_id`, one per qualifying role.
pub fn build_grants(
    view_id: u64,
    declared: &[SqlVariable],
    roles: &[RoleGrantRequest],
    user: &User,
) -> Vec<RoleViewGrant> {
    let names: HashSet<&str> = declared.iter().map(|v| v.name.trim()).collect();
    if names.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    roles
        .iter()
        .filter(|r| r.role_id > 0)
        .map(|r| RoleViewGrant {
            role_id: r.role_id,
            view_id,
            row_auth: r.row_auth.clone(),
            column_auth: r.column_auth.clone(),
            created_by: Some(user.id),
        })
        .filter(|g| {
            row_auth_entries(g)
                .iter()
                .any(|e| names.contains(e.name.trim()))
        })
        .filter(|g| seen.insert(g.role_id))
        .collect()
}

/// Completion signal of one submitted batch.
pub struct GrantJob {
    response: channel::Receiver<ViewResult<usize>>,
}

impl GrantJob {
    fn done(inserted: usize) -> Self {
        let (tx, rx) = channel::bounded(1);
        let _ = tx.send(Ok(inserted));
        GrantJob { response: rx }
    }

    /// Block until the batch is written. Returns the number of rows inserted.
    pub fn wait(self) -> ViewResult<usize> {
        self.response
            .recv()
            .map_err(|_| ViewError::Worker("grant writer stopped before finishing".to_string()))?
    }

    pub fn wait_timeout(self, timeout: Duration) -> ViewResult<usize> {
        match self.response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(channel::RecvTimeoutError::Timeout) => Err(ViewError::Worker(format!(
                "grant batch not written within {}ms",
                timeout.as_millis()
            ))),
            Err(channel::RecvTimeoutError::Disconnected) => Err(ViewError::Worker(
                "grant writer stopped before finishing".to_string(),
            )),
        }
    }
}

/// Handle to the background grant worker.
pub struct GrantWriter {
    command_tx: channel::Sender<GrantCommand>,
    worker_handle: Option<JoinHandle<()>>,
}

impl GrantWriter {
    pub fn new(store: Arc<dyn GrantStore>) -> ViewResult<Self> {
        let (command_tx, command_rx) = channel::unbounded::<GrantCommand>();
        let worker_handle = std::thread::Builder::new()
            .name("grant-writer".to_string())
            .spawn(move || Self::worker_loop(store.as_ref(), &command_rx))
            .map_err(|e| ViewError::Worker(format!("Failed to spawn grant writer: {e}")))?;

        Ok(GrantWriter {
            command_tx,
            worker_handle: Some(worker_handle),
        })
    }

    fn worker_loop(store: &dyn GrantStore, command_rx: &channel::Receiver<GrantCommand>) {
        while let Ok(cmd) = command_rx.recv() {
            match cmd {
                GrantCommand::Insert {
                    view_id,
                    grants,
                    response,
                } => {
                    let result = store.insert_batch(&grants);
                    match &result {
                        Ok(inserted) => {
                            tracing::info!(view_id, inserted, "role grants saved");
                        }
                        Err(e) => {
                            tracing::error!(view_id, error = %e, "saving role grants failed");
                        }
                    }
                    let _ = response.send(result);
                }
                GrantCommand::Shutdown { response } => {
                    let _ = response.send(());
                    return;
                }
            }
        }
    }

    /// Queue `grants` for insertion. An empty batch completes immediately.
    pub fn submit(&self, view_id: u64, grants: Vec<RoleViewGrant>) -> ViewResult<GrantJob> {
        if grants.is_empty() {
            return Ok(GrantJob::done(0));
        }
        let (tx, rx) = channel::bounded(1);
        self.command_tx
            .send(GrantCommand::Insert {
                view_id,
                grants,
                response: tx,
            })
            .map_err(|_| ViewError::Worker("grant writer is not running".to_string()))?;
        Ok(GrantJob { response: rx })
    }

    /// Stop the worker after the queued batches are written.
    pub fn shutdown(mut self) -> ViewResult<()> {
        self.stop();
        Ok(())
    }

    fn stop(&mut self) {
        let (tx, rx) = channel::bounded(1);
        if self
            .command_tx
            .send(GrantCommand::Shutdown { response: tx })
            .is_ok()
        {
            let _ = rx.recv_timeout(Duration::from_secs(5));
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GrantWriter {
    fn drop(&mut self) {
        self.stop();
    }
}
