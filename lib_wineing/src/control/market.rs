//! Market data reader.
//!
//! Subscribes to the engine's data stream, decodes and counts each event, and
//! optionally forwards it to a consumer. There is no correlation here; the
//! worker only shares the channel lifecycle of the control workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channel::{Channel, ChannelError, RetryPolicy};
use super::lifecycle::{Lifecycle, WorkerError, WorkerState};
use crate::proto;

/// A progress line is logged every this many messages.
pub const LOG_EVERY: u64 = 1000;

const WORKER_NAME: &str = "market";

/// Market data event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketKind {
    Quote,
    Trade,
    Status,
}

/// One decoded market data event.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    pub kind: MarketKind,
    pub symbol: String,
    pub price: f64,
    pub size: i64,
    /// Milliseconds since Unix Epoch.
    pub time: i64,
}

/// Decode-and-count reader on the market data channel.
pub struct MarketDataWorker {
    channel: Option<Channel>,
    sink: Option<mpsc::Sender<MarketData>>,
    received: Arc<AtomicU64>,
    retry: RetryPolicy,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MarketDataWorker {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            sink: None,
            received: Arc::new(AtomicU64::new(0)),
            retry: RetryPolicy::default(),
            lifecycle: Lifecycle::new(WORKER_NAME),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Forwards every decoded event to `sink`. Events are dropped while the
    /// sink is full, so a slow consumer never stalls the reader.
    pub fn with_sink(mut self, sink: mpsc::Sender<MarketData>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Overrides the connect retry schedule.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of events decoded so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Spawns the reader once its channel is subscribed.
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
        let mut sink = self.sink.take();
        let received = Arc::clone(&self.received);
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
                    loop {
                        let frame = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            result = channel.receive() => result,
                        };
                        match frame {
                            Ok(frame) => match proto::decode_market_data(&frame) {
                                Ok(data) => {
                                    let count = received.fetch_add(1, Ordering::Relaxed) + 1;
                                    if count % LOG_EVERY == 0 {
                                        tracing::info!("Received {} market data messages", count);
                                    }
                                    forward(&mut sink, data);
                                }
                                Err(e) => tracing::warn!("Dropping malformed market data: {}", e),
                            },
                            Err(e) => {
                                tracing::error!("Market data receive failed: {}", e);
                                tokio::select! {
                                    biased;
                                    _ = cancel.cancelled() => break,
                                    _ = tokio::time::sleep(retry.base_delay) => {}
                                }
                            }
                        }
                    }
                    channel.close();
                    tracing::info!(
                        "Market data worker stopped after {} messages",
                        received.load(Ordering::Relaxed)
                    );
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
                tracing::info!(endpoint = %endpoint, "Market data worker subscribed");
                Ok(endpoint)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(WorkerError::StartupAborted(WORKER_NAME)),
        }
    }

    /// Stops the reader and returns the total number of events received.
    pub async fn shutdown(&mut self) -> Result<u64, WorkerError> {
        self.cancel.cancel();
        let joined = match self.task.take() {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        self.channel = None;
        self.lifecycle.transition(WorkerState::Stopped);
        joined.map_err(|_| WorkerError::Panicked(WORKER_NAME))?;
        Ok(self.received())
    }
}

impl Drop for MarketDataWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn forward(sink: &mut Option<mpsc::Sender<MarketData>>, data: MarketData) {
    let Some(tx) = sink else {
        return;
    };
    match tx.try_send(data) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::trace!("Market data sink full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("Market data sink closed, no longer forwarding");
            *sink = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::pattern::ChannelPattern;
    use std::time::Duration;
    use tokio::time::timeout;

    fn quote(symbol: &str) -> MarketData {
        MarketData {
            kind: MarketKind::Quote,
            symbol: symbol.into(),
            price: 10.5,
            size: 100,
            time: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn decodes_counts_and_forwards() {
        let mut publisher = Channel::new("tcp://127.0.0.1:0", ChannelPattern::Publish);
        publisher.open();
        let endpoint = publisher.activate(&RetryPolicy::no_retry()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut worker =
            MarketDataWorker::new(Channel::new(endpoint, ChannelPattern::Subscribe)).with_sink(tx);
        worker.start().await.unwrap();

        // Publish until the subscription has propagated and something arrives.
        let first = timeout(Duration::from_secs(5), async {
            loop {
                publisher.send(proto::encode_market_data(&quote("AAPL"))).await.unwrap();
                publisher.send(vec![0x0f]).await.unwrap();
                if let Ok(Some(data)) = timeout(Duration::from_millis(50), rx.recv()).await {
                    break data;
                }
            }
        })
        .await
        .expect("no market data arrived");
        assert_eq!(first, quote("AAPL"));

        let total = worker.shutdown().await.unwrap();
        assert!(total >= 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn closed_sink_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = Some(tx);
        forward(&mut sink, quote("MSFT"));
        assert!(sink.is_none());
    }
}
