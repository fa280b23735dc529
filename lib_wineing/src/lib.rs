//! # lib_wineing
//!
//! Client-side control plane for the Wineing market-data engine.
//!
//! Commands go out over a request channel, acknowledgements come back over a
//! response channel and are matched to their callers by request id, and
//! market data arrives on a separate subscription. See [`api::WineingClient`]
//! for the assembled client and [`api::RemoteApi`] for the calls it offers.
#![forbid(unsafe_code)]

pub mod api;
pub mod control;
pub mod proto;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "testkit")]
pub mod testkit;

pub use api::{ChannelSpec, ClientSettings, RemoteApi, WineingClient};
pub use control::{
    Channel, ChannelError, ChannelPattern, Command, Request, RequestId, Response, RetryPolicy,
    Status, WorkerError,
};
