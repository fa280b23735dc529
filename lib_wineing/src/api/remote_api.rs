//! # Remote API
//!
//! Start, stop and shut down the engine as asynchronous calls. Every call takes
//! a fresh request id, registers the caller's callback under it and only then
//! hands the request to the outbound worker, so a response can never arrive
//! before its callback is in place.
//!
//! Calls return as soon as the request is queued; the outcome is delivered to
//! the callback (or to the default callback). Engine errors arrive the same
//! way, as a [`Response`] with [`Status::Error`](crate::control::Status::Error).
//!
//! Dropping a call future while it waits for queue space withdraws the
//! registration, so a cancelled call leaves nothing behind in the table.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::control::correlation::{
    response_channel, DefaultResponseCallback, ResponseCallback, ResponseRouter,
};
use crate::control::lifecycle::WorkerError;
use crate::control::message::{Command, Request, RequestId, RequestIdGenerator, Response};
use crate::control::outbound::RequestQueue;

/// Façade over the outbound queue and the response router.
#[derive(Debug, Clone)]
pub struct RemoteApi {
    router: Arc<ResponseRouter>,
    queue: RequestQueue,
    ids: Arc<RequestIdGenerator>,
}

impl RemoteApi {
    pub fn new(router: Arc<ResponseRouter>, queue: RequestQueue) -> Self {
        Self {
            router,
            queue,
            ids: Arc::new(RequestIdGenerator::default()),
        }
    }

    /// Shares an id generator with other façades talking to the same engine.
    pub fn with_id_generator(mut self, ids: Arc<RequestIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Starts the data tape `tape`, or real-time data when `None`.
    pub async fn start(
        &self,
        tape: Option<&str>,
        cb: Option<ResponseCallback>,
    ) -> Result<RequestId, WorkerError> {
        self.submit(Command::Start, tape.map(str::to_owned), cb).await
    }

    /// Stops the data tape.
    pub async fn stop(&self, cb: Option<ResponseCallback>) -> Result<RequestId, WorkerError> {
        self.submit(Command::Stop, None, cb).await
    }

    /// Shuts the engine down. Nothing issued through this façade afterwards is
    /// guaranteed to be sent.
    pub async fn shutdown(&self, cb: Option<ResponseCallback>) -> Result<RequestId, WorkerError> {
        self.submit(Command::Shutdown, None, cb).await
    }

    /// Replaces the callback for responses that match no registration.
    pub fn set_default_response_processor(&self, cb: Option<DefaultResponseCallback>) {
        self.router.set_default_response_processor(cb);
    }

    /// Issues `command` and returns a receiver for its response.
    pub async fn request(
        &self,
        command: Command,
        payload: Option<String>,
    ) -> Result<oneshot::Receiver<Response>, WorkerError> {
        let (cb, rx) = response_channel();
        self.submit(command, payload, Some(cb)).await?;
        Ok(rx)
    }

    /// Builds, registers and enqueues one request.
    pub async fn submit(
        &self,
        command: Command,
        payload: Option<String>,
        cb: Option<ResponseCallback>,
    ) -> Result<RequestId, WorkerError> {
        let id = self.ids.next_id();
        let request = Request::new(id, command, payload);

        let registration = cb.map(|cb| {
            self.router.set_response_processor(id, cb);
            Registration {
                router: self.router.as_ref(),
                id,
                committed: false,
            }
        });

        self.queue.add_request(request).await?;
        if let Some(mut registration) = registration {
            registration.committed = true;
        }

        tracing::debug!(request_id = id, %command, "Request queued");
        Ok(id)
    }
}

/// Withdraws a callback registration unless the request was queued.
struct Registration<'a> {
    router: &'a ResponseRouter,
    id: RequestId,
    committed: bool,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.committed && self.router.table().take_if_present(self.id).is_some() {
            tracing::debug!(request_id = self.id, "Withdrew callback of a request that was never queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::correlation::callback;
    use crate::control::message::Status;
    use crate::control::outbound::OutboundWorker;
    use crate::control::{Channel, ChannelPattern};
    use std::time::Duration;
    use tokio::time::timeout;

    fn unstarted(capacity: usize) -> (OutboundWorker, RemoteApi) {
        unstarted_at("tcp://127.0.0.1:1", capacity)
    }

    fn unstarted_at(endpoint: &str, capacity: usize) -> (OutboundWorker, RemoteApi) {
        let router = Arc::new(ResponseRouter::new());
        let worker = OutboundWorker::with_capacity(
            Channel::new(endpoint, ChannelPattern::PushClient),
            capacity,
        )
        .with_response_router(Arc::clone(&router));
        let api = RemoteApi::new(router, worker.queue());
        (worker, api)
    }

    #[tokio::test]
    async fn callback_is_registered_before_the_request_is_queued() {
        let (_worker, api) = unstarted(4);
        let id = api.start(Some("tape-A"), Some(callback(|_| {}))).await.unwrap();
        assert_eq!(id, 1);
        assert!(api.router.table().contains_key(id));

        let id = api.stop(None).await.unwrap();
        assert_eq!(id, 2);
        assert!(!api.router.table().contains_key(id));
    }

    #[tokio::test]
    async fn request_resolves_when_the_response_is_dispatched() {
        let (_worker, api) = unstarted(4);
        let rx = api.request(Command::Stop, None).await.unwrap();
        api.router.dispatch(Response::error(1, "Not running"));
        let response = rx.await.unwrap();
        assert_eq!(response.status, Status::Error);
    }

    #[tokio::test]
    async fn cancelled_call_withdraws_its_callback() {
        let (_worker, api) = unstarted(1);
        api.stop(None).await.unwrap();

        let blocked = timeout(
            Duration::from_millis(100),
            api.start(None, Some(callback(|_| {}))),
        )
        .await;
        assert!(blocked.is_err(), "start must block on a full queue");
        assert!(api.router.table().is_empty());
    }

    #[tokio::test]
    async fn failed_enqueue_withdraws_its_callback() {
        let (mut worker, api) = unstarted(1);
        worker.shutdown().await.unwrap();
        assert!(matches!(
            api.shutdown(Some(callback(|_| {}))).await,
            Err(WorkerError::Stopped)
        ));
        assert!(api.router.table().is_empty());
    }

    #[tokio::test]
    async fn request_queued_behind_shutdown_resolves_when_discarded() {
        let mut server = Channel::new("tcp://127.0.0.1:0", ChannelPattern::PullServer);
        server.open();
        let endpoint = server
            .activate(&crate::control::RetryPolicy::no_retry())
            .await
            .unwrap();
        let (mut worker, api) = unstarted_at(&endpoint, 4);

        api.shutdown(None).await.unwrap();
        let pending = api.request(Command::Start, None).await.unwrap();
        assert!(api.router.table().contains_key(2));

        worker.start().await.unwrap();
        timeout(Duration::from_secs(5), worker.wait_stopped())
            .await
            .expect("worker did not stop after SHUTDOWN");

        assert!(!api.router.table().contains_key(2));
        let resolved = timeout(Duration::from_secs(1), pending)
            .await
            .expect("receiver of a discarded request never resolved");
        assert!(resolved.is_err());
        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_ids_and_router() {
        let (_worker, api) = unstarted(4);
        let other = api.clone();
        assert_eq!(api.stop(None).await.unwrap(), 1);
        assert_eq!(other.stop(None).await.unwrap(), 2);

        let shared = Arc::new(RequestIdGenerator::starting_at(100));
        let api = api.with_id_generator(shared);
        assert_eq!(api.stop(None).await.unwrap(), 100);
    }
}
