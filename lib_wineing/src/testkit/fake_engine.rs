//! # Fake Engine
//!
//! Plays the engine's side of the three channels:
//!
//! - binds a PULL socket for requests,
//! - connects a PUSH socket to the client's response endpoint (with retry),
//! - binds a PUB socket and streams synthetic quotes while a tape is running.
//!
//! Requests are answered like the real engine answers them: `START` fails when
//! already running or when the tape is unknown, `STOP` always succeeds and
//! `SHUTDOWN` is acknowledged before the engine stops. Every decoded request
//! is also handed to the test through [`FakeEngine::next_request`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::control::channel::{Channel, ChannelError, RetryPolicy};
use crate::control::lifecycle::{Lifecycle, WorkerError, WorkerState};
use crate::control::market::{MarketData, MarketKind};
use crate::control::message::{Command, Request, Response};
use crate::control::pattern::ChannelPattern;
use crate::proto;

const WORKER_NAME: &str = "fake-engine";

/// How the fake engine is wired and behaves.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound PULL address for requests.
    pub request_address: String,
    /// The client's response endpoint, connected with PUSH.
    pub response_address: String,
    /// Bound PUB address for market data; `None` disables the stream.
    pub market_address: Option<String>,
    /// Tapes `START` accepts; `None` accepts any tape.
    pub tapes: Option<HashSet<String>>,
    /// Answer requests automatically. When off, tests reply by hand.
    pub auto_reply: bool,
    pub symbols: Vec<String>,
    pub tick_interval: Duration,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Loopback defaults: requests and market data on OS-assigned ports.
    pub fn new(response_address: impl Into<String>) -> Self {
        Self {
            request_address: "tcp://127.0.0.1:0".to_string(),
            response_address: response_address.into(),
            market_address: Some("tcp://127.0.0.1:0".to_string()),
            tapes: None,
            auto_reply: true,
            symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
            tick_interval: Duration::from_millis(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Restricts `START` to the given tapes.
    pub fn with_tapes<I, S>(mut self, tapes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tapes = Some(tapes.into_iter().map(Into::into).collect());
        self
    }
}

/// A running fake engine.
pub struct FakeEngine {
    request_endpoint: String,
    market_endpoint: Option<String>,
    requests: mpsc::UnboundedReceiver<Request>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    streaming: Arc<AtomicBool>,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FakeEngine {
    /// Binds the request and market channels and starts serving. The response
    /// channel is connected in the background, so the client may bind it later.
    pub async fn start(config: EngineConfig) -> Result<Self, WorkerError> {
        let mut request_channel = Channel::new(config.request_address.clone(), ChannelPattern::PullServer);
        request_channel.open();
        let request_endpoint = request_channel.activate(&config.retry).await?;

        let market_channel = match &config.market_address {
            Some(address) => {
                let mut channel = Channel::new(address.clone(), ChannelPattern::Publish);
                channel.open();
                channel.activate(&config.retry).await?;
                Some(channel)
            }
            None => None,
        };
        let market_endpoint = market_channel
            .as_ref()
            .and_then(|c| c.endpoint().map(str::to_owned));

        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let streaming = Arc::new(AtomicBool::new(false));
        let lifecycle = Lifecycle::new(WORKER_NAME);
        let cancel = CancellationToken::new();

        let serve = Serve {
            config,
            request_channel,
            market_channel,
            requests_tx,
            outgoing_rx,
            streaming: Arc::clone(&streaming),
            cancel: cancel.clone(),
        };
        let task_lifecycle = lifecycle.clone();
        let task = tokio::spawn(async move {
            task_lifecycle.transition(WorkerState::Running);
            serve.run().await;
            task_lifecycle.transition(WorkerState::Stopped);
        });

        tracing::info!(
            request = %request_endpoint,
            market = ?market_endpoint,
            "Fake engine started"
        );
        Ok(Self {
            request_endpoint,
            market_endpoint,
            requests,
            outgoing,
            streaming,
            lifecycle,
            cancel,
            task: Some(task),
        })
    }

    /// Where clients send requests.
    pub fn request_endpoint(&self) -> &str {
        &self.request_endpoint
    }

    /// Where clients subscribe to market data.
    pub fn market_endpoint(&self) -> Option<&str> {
        self.market_endpoint.as_deref()
    }

    /// The next request the engine decoded, in arrival order.
    pub async fn next_request(&mut self) -> Option<Request> {
        self.requests.recv().await
    }

    /// Sends `response` on the response channel.
    pub fn send_response(&self, response: &Response) {
        self.send_raw(proto::encode_response(response));
    }

    /// Sends an arbitrary frame on the response channel.
    pub fn send_raw(&self, frame: Vec<u8>) {
        if self.outgoing.send(frame).is_err() {
            tracing::warn!("Fake engine is stopped, frame not sent");
        }
    }

    /// Whether a tape is currently streaming.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Resolves once the engine has stopped, e.g. after `SHUTDOWN`.
    pub async fn wait_stopped(&self) {
        self.lifecycle.wait_stopped().await
    }

    /// Stops the engine.
    pub async fn shutdown(mut self) -> Result<(), WorkerError> {
        self.cancel.cancel();
        let joined = match self.task.take() {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        self.lifecycle.transition(WorkerState::Stopped);
        joined.map_err(|_| WorkerError::Panicked(WORKER_NAME))
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Serve {
    config: EngineConfig,
    request_channel: Channel,
    market_channel: Option<Channel>,
    requests_tx: mpsc::UnboundedSender<Request>,
    outgoing_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    streaming: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Serve {
    async fn run(mut self) {
        let mut response_channel =
            Channel::new(self.config.response_address.clone(), ChannelPattern::PushClient);
        response_channel.open();
        let activated = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = response_channel.activate(&self.config.retry) => result,
        };
        if let Err(e) = activated {
            tracing::error!("Fake engine could not reach the client: {}", e);
            return;
        }
        tracing::debug!(endpoint = %self.config.response_address, "Fake engine connected to the client");

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence = 0i64;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.request_channel.receive() => {
                    let stop = self.on_frame(received, &mut response_channel).await;
                    if stop {
                        break;
                    }
                }
                Some(frame) = self.outgoing_rx.recv() => {
                    if let Err(e) = response_channel.send(frame).await {
                        tracing::error!("Fake engine failed to send a response: {}", e);
                    }
                }
                _ = ticker.tick() => {
                    if self.streaming.load(Ordering::SeqCst) {
                        sequence += 1;
                        self.publish_ticks(sequence).await;
                    }
                }
            }
        }

        self.streaming.store(false, Ordering::SeqCst);
        response_channel.close();
        self.request_channel.close();
        if let Some(channel) = self.market_channel.as_mut() {
            channel.close();
        }
        tracing::info!("Fake engine stopped");
    }

    /// Handles one request frame. Returns whether the engine should stop.
    async fn on_frame(
        &mut self,
        received: Result<bytes::Bytes, ChannelError>,
        response_channel: &mut Channel,
    ) -> bool {
        let frame = match received {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Fake engine receive failed: {}", e);
                return false;
            }
        };
        let request = match proto::decode_request(&frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Fake engine dropped a malformed request: {}", e);
                return false;
            }
        };
        tracing::debug!(request_id = request.id(), command = %request.command(), "Fake engine received request");

        let command = request.command();
        let response = self.answer(&request);
        let _ = self.requests_tx.send(request);

        if self.config.auto_reply {
            if let Err(e) = response_channel.send(proto::encode_response(&response)).await {
                tracing::error!("Fake engine failed to send a response: {}", e);
            }
        }
        command == Command::Shutdown
    }

    fn answer(&self, request: &Request) -> Response {
        let id = request.id();
        match request.command() {
            Command::Start => {
                if self.streaming.load(Ordering::SeqCst) {
                    return Response::error(id, "Already in RUNNING state.");
                }
                if let (Some(tape), Some(tapes)) = (request.payload(), &self.config.tapes) {
                    if !tapes.contains(tape) {
                        return Response::error(id, format!("File '{tape}' not found."));
                    }
                }
                self.streaming.store(true, Ordering::SeqCst);
                Response::ok(id)
            }
            Command::Stop => {
                self.streaming.store(false, Ordering::SeqCst);
                Response::ok(id)
            }
            Command::Shutdown => Response::ok(id),
        }
    }

    async fn publish_ticks(&mut self, sequence: i64) {
        let Some(channel) = self.market_channel.as_mut() else {
            return;
        };
        let time = chrono::Utc::now().timestamp_millis();
        for symbol in &self.config.symbols {
            let data = MarketData {
                kind: if sequence % 5 == 0 { MarketKind::Trade } else { MarketKind::Quote },
                symbol: symbol.clone(),
                price: 100.0 + (sequence % 100) as f64 / 100.0,
                size: 100,
                time,
            };
            if let Err(e) = channel.send(proto::encode_market_data(&data)).await {
                tracing::warn!("Fake engine failed to publish market data: {}", e);
            }
        }
    }
}
