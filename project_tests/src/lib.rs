//! # End-to-end Test Support
//!
//! Wires the control plane against the fake engine over loopback TCP, in the
//! order a real client uses: the response listener binds first, the engine
//! connects to it, then requests start flowing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lib_wineing::RemoteApi;
use lib_wineing::control::{
    Channel, ChannelPattern, InboundWorker, OutboundWorker, ResponseRouter,
};
use lib_wineing::testkit::{EngineConfig, FakeEngine};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Awaits `future`, panicking if it takes longer than [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for the control plane")
}

/// A fake engine plus a fully started client side.
pub struct Harness {
    pub engine: FakeEngine,
    pub router: Arc<ResponseRouter>,
    pub inbound: InboundWorker,
    pub outbound: OutboundWorker,
    pub api: RemoteApi,
}

impl Harness {
    /// Auto-replying engine without a market data stream.
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_engine(|config| config).await
    }

    /// Lets the test adjust the engine before it starts.
    pub async fn with_engine(
        configure: impl FnOnce(EngineConfig) -> EngineConfig,
    ) -> anyhow::Result<Self> {
        let router = Arc::new(ResponseRouter::new());

        let mut inbound = InboundWorker::new(
            Channel::new("tcp://127.0.0.1:0", ChannelPattern::PullServer),
            Arc::clone(&router),
        );
        let response_endpoint = inbound.start().await?;

        let mut config = EngineConfig::new(response_endpoint);
        config.market_address = None;
        let engine = FakeEngine::start(configure(config)).await?;

        let mut outbound = OutboundWorker::new(Channel::new(
            engine.request_endpoint(),
            ChannelPattern::PushClient,
        ))
        .with_response_router(Arc::clone(&router));
        outbound.start().await?;

        let api = RemoteApi::new(Arc::clone(&router), outbound.queue());
        Ok(Self {
            engine,
            router,
            inbound,
            outbound,
            api,
        })
    }

    /// Stops the client workers, then the engine.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.outbound.shutdown().await?;
        self.inbound.shutdown().await?;
        self.engine.shutdown().await?;
        Ok(())
    }
}
