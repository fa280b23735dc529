//! # Wineing Client
//!
//! Assembles the control plane in the order the engine link needs:
//!
//! 1.  The inbound worker binds the response channel first, so no response
//!     can be sent before someone listens.
//! 2.  The outbound worker connects the request channel.
//! 3.  The market data worker subscribes to the data stream.
//!
//! Shutdown runs in reverse: nothing more is sent, pending responses stop
//! being routed, then the data stream is closed.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::remote_api::RemoteApi;
use crate::control::channel::{Channel, RetryPolicy};
use crate::control::correlation::ResponseRouter;
use crate::control::inbound::InboundWorker;
use crate::control::lifecycle::WorkerError;
use crate::control::market::{MarketData, MarketDataWorker};
use crate::control::outbound::{OutboundWorker, DEFAULT_QUEUE_CAPACITY};
use crate::control::pattern::ChannelPattern;

/// Address and pattern of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub address: String,
    pub pattern: ChannelPattern,
}

impl ChannelSpec {
    pub fn new(address: impl Into<String>, pattern: ChannelPattern) -> Self {
        Self {
            address: address.into(),
            pattern,
        }
    }

    fn channel(&self) -> Channel {
        Channel::new(self.address.clone(), self.pattern)
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.pattern)
    }
}

/// Validated settings for a [`WineingClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Commands to the engine.
    pub request: ChannelSpec,
    /// Acknowledgements from the engine.
    pub response: ChannelSpec,
    /// Market data stream; `None` skips the market data worker.
    pub market: Option<ChannelSpec>,
    pub queue_capacity: usize,
    /// Connect retry schedule for client-side patterns.
    pub retry: RetryPolicy,
}

impl ClientSettings {
    /// Settings with the usual roles: push-connect requests, pull-bind
    /// responses, no market data.
    pub fn new(request_address: impl Into<String>, response_address: impl Into<String>) -> Self {
        Self {
            request: ChannelSpec::new(request_address, ChannelPattern::PushClient),
            response: ChannelSpec::new(response_address, ChannelPattern::PullServer),
            market: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }

    /// Adds a subscribed market data channel.
    pub fn with_market(mut self, address: impl Into<String>) -> Self {
        self.market = Some(ChannelSpec::new(address, ChannelPattern::Subscribe));
        self
    }
}

/// A running control plane: the façade plus the workers behind it.
pub struct WineingClient {
    api: RemoteApi,
    inbound: InboundWorker,
    outbound: OutboundWorker,
    market: Option<MarketDataWorker>,
}

impl WineingClient {
    /// Starts all workers. Market data events are counted but not forwarded.
    pub async fn start(settings: &ClientSettings) -> Result<Self, WorkerError> {
        Self::start_with_sink(settings, None).await
    }

    /// Starts all workers, forwarding market data events to `sink`.
    pub async fn start_with_sink(
        settings: &ClientSettings,
        sink: Option<mpsc::Sender<MarketData>>,
    ) -> Result<Self, WorkerError> {
        let router = Arc::new(ResponseRouter::new());

        let mut inbound = InboundWorker::new(settings.response.channel(), Arc::clone(&router))
            .with_retry_policy(settings.retry.clone());
        inbound.start().await?;

        let mut outbound =
            OutboundWorker::with_capacity(settings.request.channel(), settings.queue_capacity)
                .with_retry_policy(settings.retry.clone())
                .with_response_router(Arc::clone(&router));
        if let Err(e) = outbound.start().await {
            let _ = inbound.shutdown().await;
            return Err(e);
        }

        let market = match &settings.market {
            Some(endpoint) => {
                let mut worker = MarketDataWorker::new(endpoint.channel())
                    .with_retry_policy(settings.retry.clone());
                if let Some(sink) = sink {
                    worker = worker.with_sink(sink);
                }
                if let Err(e) = worker.start().await {
                    let _ = outbound.shutdown().await;
                    let _ = inbound.shutdown().await;
                    return Err(e);
                }
                Some(worker)
            }
            None => None,
        };

        tracing::info!(
            request = %settings.request,
            response = %settings.response,
            "Wineing client started"
        );
        Ok(Self {
            api: RemoteApi::new(router, outbound.queue()),
            inbound,
            outbound,
            market,
        })
    }

    /// The façade for issuing commands.
    pub fn api(&self) -> &RemoteApi {
        &self.api
    }

    /// Where the response channel is actually bound.
    pub fn response_endpoint(&self) -> Option<&str> {
        self.inbound.endpoint()
    }

    /// Market data events received so far; 0 without a market channel.
    pub fn market_received(&self) -> u64 {
        self.market.as_ref().map_or(0, MarketDataWorker::received)
    }

    /// Stops every worker. All of them are stopped even if one fails; the first
    /// failure is returned.
    pub async fn shutdown(mut self) -> Result<(), WorkerError> {
        let outbound = self.outbound.shutdown().await;
        let inbound = self.inbound.shutdown().await;
        let market = match self.market.as_mut() {
            Some(worker) => worker.shutdown().await.map(|total| {
                tracing::info!(total, "Market data stream closed");
            }),
            None => Ok(()),
        };
        tracing::info!("Wineing client stopped");
        outbound.and(inbound).and(market)
    }
}
