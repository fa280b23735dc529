//! # Control Plane
//!
//! Channels, the request/response correlation engine and the workers that
//! drive them. Each worker runs on its own tokio task and owns its channel
//! exclusively; the [`correlation::ResponseRouter`] is the only state shared
//! between the caller's context and a worker.

pub mod channel;
pub mod correlation;
pub mod inbound;
pub mod lifecycle;
pub mod market;
pub mod message;
pub mod outbound;
pub mod pattern;

pub use channel::{Channel, ChannelError, RetryPolicy};
pub use correlation::{
    callback, default_callback, response_channel, CorrelationTable, DefaultResponseCallback,
    DispatchOutcome, ResponseCallback, ResponseRouter,
};
pub use inbound::InboundWorker;
pub use lifecycle::{Lifecycle, WorkerError, WorkerState};
pub use market::{MarketData, MarketDataWorker, MarketKind};
pub use message::{Command, Request, RequestId, RequestIdGenerator, Response, Status};
pub use outbound::{OutboundWorker, RequestQueue, DEFAULT_QUEUE_CAPACITY};
pub use pattern::{Activation, ChannelPattern};
