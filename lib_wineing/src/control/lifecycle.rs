//! Per-worker lifecycle state and the errors workers report.
//!
//! Each worker owns its own [`Lifecycle`]; there is no process-wide running
//! flag. States only ever move forward: `New -> Running -> Stopped`, or
//! straight from `New` to `Stopped` when a worker is shut down before it ran.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use super::channel::ChannelError;

/// Errors raised by the outbound, inbound and market data workers.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `start` was called twice on the same worker.
    #[error("Worker [{0}] has already been started")]
    AlreadyStarted(&'static str),

    /// `try_add_request` found the request queue at capacity.
    #[error("Request queue is full")]
    QueueFull,

    /// The outbound worker no longer accepts requests.
    #[error("Outbound worker is stopped")]
    Stopped,

    /// The worker's channel could not be activated.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The worker task ended before reporting readiness.
    #[error("Worker [{0}] exited before it became ready")]
    StartupAborted(&'static str),

    /// The worker task panicked.
    #[error("Worker [{0}] panicked")]
    Panicked(&'static str),
}

/// Where a worker is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerState {
    /// Constructed, not started.
    New,
    /// Channel activated, loop running.
    Running,
    /// Loop finished; the worker cannot be restarted.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::New => "new",
            WorkerState::Running => "running",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Observable lifecycle of one worker. Clones share the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    name: &'static str,
    state: Arc<watch::Sender<WorkerState>>,
}

impl Lifecycle {
    /// A lifecycle in state [`WorkerState::New`].
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(watch::Sender::new(WorkerState::New)),
        }
    }

    /// The worker name used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The current state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Whether the worker loop is running.
    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Moves to `to` if that is a forward transition. Returns whether the state changed.
    pub(crate) fn transition(&self, to: WorkerState) -> bool {
        let mut from = to;
        let changed = self.state.send_if_modified(|current| {
            if to > *current {
                from = *current;
                *current = to;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(worker = self.name, %from, %to, "Worker state changed");
        }
        changed
    }

    /// Resolves once the worker has reached [`WorkerState::Stopped`].
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the wait cannot fail with a closed channel.
        let _ = rx.wait_for(|state| *state == WorkerState::Stopped).await;
    }
}
