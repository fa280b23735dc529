//! # Inbound Worker
//!
//! Listens on the response channel and routes every decoded [`Response`] to
//! the callback waiting for it through a shared [`ResponseRouter`].
//!
//! `start` only returns once the channel is bound (or connected), so the
//! client can wire the outbound side afterwards without losing the first
//! response. A malformed frame is logged and skipped. A failing receive is
//! logged and retried with backoff. Neither ends the loop; only `shutdown` does.
//!
//! [`Response`]: super::message::Response

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::channel::{Channel, ChannelError, RetryPolicy};
use super::correlation::{DefaultResponseCallback, ResponseCallback, ResponseRouter};
use super::lifecycle::{Lifecycle, WorkerError, WorkerState};
use super::message::RequestId;
use crate::proto;

const WORKER_NAME: &str = "inbound";

/// Owns the response channel and dispatches what it receives.
pub struct InboundWorker {
    channel: Option<Channel>,
    router: Arc<ResponseRouter>,
    retry: RetryPolicy,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    endpoint: Option<String>,
}

impl InboundWorker {
    /// Creates a worker dispatching into `router`.
    pub fn new(channel: Channel, router: Arc<ResponseRouter>) -> Self {
        Self {
            channel: Some(channel),
            router,
            retry: RetryPolicy::default(),
            lifecycle: Lifecycle::new(WORKER_NAME),
            cancel: CancellationToken::new(),
            task: None,
            endpoint: None,
        }
    }

    /// Overrides the connect and receive-failure backoff schedule.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The router shared with the façade.
    pub fn router(&self) -> &Arc<ResponseRouter> {
        &self.router
    }

    /// Registers a one-shot callback for `id`.
    pub fn set_response_processor(&self, id: RequestId, cb: ResponseCallback) {
        self.router.set_response_processor(id, cb);
    }

    /// Replaces the fallback callback; `None` clears it.
    pub fn set_default_response_processor(&self, cb: Option<DefaultResponseCallback>) {
        self.router.set_default_response_processor(cb);
    }

    /// The endpoint actually bound or connected, once started.
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

    /// Spawns the listen loop. Resolves with the bound endpoint once the
    /// channel is ready to receive.
    pub async fn start(&mut self) -> Result<String, WorkerError> {
        let Some(mut channel) = self.channel.take() else {
            return Err(WorkerError::AlreadyStarted(WORKER_NAME));
        };
        if !channel.pattern().can_receive() {
            self.lifecycle.transition(WorkerState::Stopped);
            return Err(ChannelError::Unsupported {
                operation: "receive",
                pattern: channel.pattern(),
            }
            .into());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let router = Arc::clone(&self.router);
        let retry = self.retry.clone();
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
                    run(&mut channel, &router, &retry, &cancel).await;
                    channel.close();
                }
                Some(Err(e)) => {
                    let _ = ready_tx.send(Err(e));
                }
                None => {}
            }
            lifecycle.transition(WorkerState::Stopped);
        }));

        match ready_rx.await {
            Ok(Ok(endpoint)) => {
                tracing::info!(endpoint = %endpoint, "Inbound worker listening");
                self.endpoint = Some(endpoint.clone());
                Ok(endpoint)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(WorkerError::StartupAborted(WORKER_NAME)),
        }
    }

    /// Stops the loop, even while it is blocked on receive, and waits for it.
    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        self.cancel.cancel();
        let joined = match self.task.take() {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        self.channel = None;
        self.lifecycle.transition(WorkerState::Stopped);
        joined.map_err(|_| WorkerError::Panicked(WORKER_NAME))
    }
}

impl Drop for InboundWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    channel: &mut Channel,
    router: &ResponseRouter,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) {
    let mut failures = 0u32;
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = channel.receive() => result,
        };

        let frame = match received {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(ChannelError::EmptyFrame(address)) => {
                tracing::warn!("Dropping empty message received on {}", address);
                continue;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = retry.delay_for(failures);
                tracing::error!(
                    "Receive failed: {}. Retrying in {}ms...",
                    e,
                    delay.as_millis()
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => continue,
                }
            }
        };

        match proto::decode_response(&frame) {
            Ok(response) => {
                let request_id = response.id;
                let outcome = router.dispatch(response);
                tracing::debug!(request_id = ?request_id, ?outcome, "Response dispatched");
            }
            Err(e) => {
                tracing::warn!(bytes = frame.len(), "Dropping malformed response: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::correlation::{default_callback, response_channel};
    use crate::control::message::{Response, Status};
    use crate::control::pattern::ChannelPattern;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn started_worker() -> (InboundWorker, Channel) {
        let mut worker = InboundWorker::new(
            Channel::new("tcp://127.0.0.1:0", ChannelPattern::PullServer),
            Arc::new(ResponseRouter::new()),
        );
        let endpoint = worker.start().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Running);

        let mut engine = Channel::new(endpoint, ChannelPattern::PushClient);
        engine.open();
        engine.activate(&RetryPolicy::default()).await.unwrap();
        (worker, engine)
    }

    #[tokio::test]
    async fn registered_callback_receives_its_response() {
        let (mut worker, mut engine) = started_worker().await;
        let (cb, rx) = response_channel();
        worker.set_response_processor(1, cb);

        engine.send(proto::encode_response(&Response::ok(1))).await.unwrap();
        let response = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(response, Response::ok(1));
        assert!(!worker.router().table().contains_key(1));

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_does_not_stop_the_loop() {
        let (mut worker, mut engine) = started_worker().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.set_default_response_processor(Some(default_callback(move |r| {
            let _ = tx.send(r);
        })));

        engine.send(vec![0x0a, 0x7f]).await.unwrap();
        engine.send(Vec::new()).await.unwrap();
        let err = Response::error(5, "Tape not found");
        engine.send(proto::encode_response(&err)).await.unwrap();

        let delivered = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(delivered.status, Status::Error);
        assert_eq!(delivered.text.as_deref(), Some("Tape not found"));
        assert_eq!(worker.state(), WorkerState::Running);

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_while_blocked_on_receive() {
        let (mut worker, _engine) = started_worker().await;
        let lifecycle = worker.lifecycle();
        tokio::time::sleep(Duration::from_millis(20)).await;

        timeout(Duration::from_secs(5), worker.shutdown())
            .await
            .expect("shutdown hung")
            .unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn send_only_pattern_cannot_listen() {
        let mut worker = InboundWorker::new(
            Channel::new("tcp://127.0.0.1:0", ChannelPattern::Publish),
            Arc::new(ResponseRouter::new()),
        );
        assert!(matches!(
            worker.start().await,
            Err(WorkerError::Channel(ChannelError::Unsupported { operation: "receive", .. }))
        ));
        assert!(matches!(worker.start().await, Err(WorkerError::AlreadyStarted(_))));
    }
}
