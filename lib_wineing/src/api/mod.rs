//! Public entry points: the [`RemoteApi`] façade and the [`WineingClient`]
//! that wires it to the three workers.

pub mod client;
pub mod remote_api;

pub use client::{ChannelSpec, ClientSettings, WineingClient};
pub use remote_api::RemoteApi;
