//! # Outbound Worker
//!
//! Serializes every request onto one sending channel, in FIFO order, from a
//! single task. Producers hand requests over through a cloneable
//! [`RequestQueue`]; the queue is bounded, so a producer stalls under
//! backpressure instead of losing requests.
//!
//! A `SHUTDOWN` request is terminal: once it has been sent the loop stops and
//! nothing queued after it goes out. A failed send is logged and the loop
//! moves on; requests are never retried.
//!
//! Requests still queued when the worker stops are discarded. With a
//! [`ResponseRouter`] attached, their callbacks are withdrawn as well, which
//! closes any receiver waiting on them.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channel::{Channel, ChannelError, RetryPolicy};
use super::correlation::ResponseRouter;
use super::lifecycle::{Lifecycle, WorkerError, WorkerState};
use super::message::Request;
use crate::proto;

/// Default number of requests that may wait for the outbound worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

const WORKER_NAME: &str = "outbound";

/// Producer handle for the outbound worker's bounded queue.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<Request>,
}

impl RequestQueue {
    /// Enqueues `request`, waiting for a free slot while the queue is full.
    pub async fn add_request(&self, request: Request) -> Result<(), WorkerError> {
        self.tx.send(request).await.map_err(|_| WorkerError::Stopped)
    }

    /// Enqueues `request` without waiting.
    pub fn try_add_request(&self, request: Request) -> Result<(), WorkerError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WorkerError::Stopped,
        })
    }

    /// Total queue capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Whether the worker has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owns the request channel and the consuming end of the queue.
pub struct OutboundWorker {
    channel: Option<Channel>,
    rx: Option<mpsc::Receiver<Request>>,
    queue: RequestQueue,
    retry: RetryPolicy,
    router: Option<Arc<ResponseRouter>>,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    endpoint: Option<String>,
}

impl OutboundWorker {
    /// Creates a worker with a queue of [`DEFAULT_QUEUE_CAPACITY`].
    pub fn new(channel: Channel) -> Self {
        Self::with_capacity(channel, DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a worker with a queue of `capacity` (at least 1). The queue
    /// accepts requests immediately; they are sent once the worker starts.
    pub fn with_capacity(channel: Channel, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            channel: Some(channel),
            rx: Some(rx),
            queue: RequestQueue { tx },
            retry: RetryPolicy::default(),
            router: None,
            lifecycle: Lifecycle::new(WORKER_NAME),
            cancel: CancellationToken::new(),
            task: None,
            endpoint: None,
        }
    }

    /// Overrides the connect retry schedule.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Withdraws from `router` the callbacks of requests discarded on stop.
    pub fn with_response_router(mut self, router: Arc<ResponseRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// A producer handle for this worker's queue.
    pub fn queue(&self) -> RequestQueue {
        self.queue.clone()
    }

    /// Shorthand for `queue().add_request(request)`.
    pub async fn add_request(&self, request: Request) -> Result<(), WorkerError> {
        self.queue.add_request(request).await
    }

    /// The endpoint the channel bound or connected to, once started.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// A handle observing this worker's lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Resolves once the loop has finished.
    pub async fn wait_stopped(&self) {
        self.lifecycle.wait_stopped().await
    }

    /// Spawns the send loop and returns once its channel is activated.
    pub async fn start(&mut self) -> Result<String, WorkerError> {
        let (Some(mut channel), Some(mut rx)) = (self.channel.take(), self.rx.take()) else {
            return Err(WorkerError::AlreadyStarted(WORKER_NAME));
        };
        let pattern = channel.pattern();
        if !pattern.sends_one_way() {
            discard_pending(&mut rx, self.router.as_deref());
            self.lifecycle.transition(WorkerState::Stopped);
            let operation = if pattern.can_send() { "one-way send" } else { "send" };
            return Err(ChannelError::Unsupported { operation, pattern }.into());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let retry = self.retry.clone();
        let router = self.router.clone();
        let lifecycle = self.lifecycle.clone();
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            channel.open();
            let activated = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = channel.activate(&retry) => Some(result),
            };
            match activated {
                Some(Ok(endpoint)) => {
                    lifecycle.transition(WorkerState::Running);
                    let _ = ready_tx.send(Ok(endpoint));
                    run(&mut channel, &mut rx, &cancel).await;
                }
                Some(Err(e)) => {
                    let _ = ready_tx.send(Err(e));
                }
                None => {}
            }
            // Reject any further producers before the worker is reported stopped.
            discard_pending(&mut rx, router.as_deref());
            channel.close();
            lifecycle.transition(WorkerState::Stopped);
        }));

        match ready_rx.await {
            Ok(Ok(endpoint)) => {
                tracing::info!(endpoint = %endpoint, "Outbound worker ready");
                self.endpoint = Some(endpoint.clone());
                Ok(endpoint)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(WorkerError::StartupAborted(WORKER_NAME)),
        }
    }

    /// Stops the loop and waits for it. Requests still queued are discarded.
    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        self.cancel.cancel();
        let joined = match self.task.take() {
            Some(handle) => handle.await,
            None => {
                if let Some(mut rx) = self.rx.take() {
                    discard_pending(&mut rx, self.router.as_deref());
                }
                Ok(())
            }
        };
        self.lifecycle.transition(WorkerState::Stopped);
        joined.map_err(|_| WorkerError::Panicked(WORKER_NAME))
    }
}

impl Drop for OutboundWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(mut rx) = self.rx.take() {
            discard_pending(&mut rx, self.router.as_deref());
        }
    }
}

async fn run(channel: &mut Channel, rx: &mut mpsc::Receiver<Request>, cancel: &CancellationToken) {
    loop {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        let frame = proto::encode_request(&request);
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = channel.send(frame) => result,
        };
        match sent {
            Ok(()) => tracing::debug!(
                request_id = request.id(),
                command = %request.command(),
                "Request sent"
            ),
            Err(e) => tracing::error!(
                request_id = request.id(),
                command = %request.command(),
                "Failed to send request: {}",
                e
            ),
        }

        if request.command().is_terminal() {
            tracing::info!(request_id = request.id(), "Shutdown request sent, outbound worker stopping");
            break;
        }
    }
}

/// Closes the queue and drops whatever is left in it.
fn discard_pending(rx: &mut mpsc::Receiver<Request>, router: Option<&ResponseRouter>) {
    rx.close();
    let mut dropped = 0usize;
    while let Ok(request) = rx.try_recv() {
        dropped += 1;
        let withdrawn = router.is_some_and(|r| r.table().take_if_present(request.id()).is_some());
        if withdrawn {
            tracing::debug!(request_id = request.id(), "Withdrew callback of a discarded request");
        }
    }
    if dropped > 0 {
        tracing::warn!(dropped, "Discarded queued requests on stop");
    }
}
