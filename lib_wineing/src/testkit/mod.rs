//! In-process stand-ins for the remote engine, for integration tests and the
//! `mock_engine` binary. Enabled by the `testkit` feature.

pub mod fake_engine;

pub use fake_engine::{EngineConfig, FakeEngine};

/// A `tcp://127.0.0.1:<port>` endpoint on a port that was free a moment ago.
///
/// Needed when two peers must each know the other's address before either
/// starts; binding to port 0 only works when one side can go first.
pub fn free_tcp_endpoint() -> std::io::Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    Ok(format!("tcp://127.0.0.1:{port}"))
}
