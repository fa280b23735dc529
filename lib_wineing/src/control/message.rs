//! # Control Messages
//!
//! Domain-level requests and responses exchanged with the engine. These are
//! what the façade, the workers and the callbacks see; the protobuf
//! representation lives in [`crate::proto`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier correlating a response with the request that caused it.
pub type RequestId = u64;

/// Commands understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Start the data tape (or real-time data when no tape is given).
    Start,
    /// Stop the data tape.
    Stop,
    /// Shut the engine down. Terminal for the outbound worker.
    Shutdown,
}

impl Command {
    /// Whether the outbound worker stops after sending this command.
    pub fn is_terminal(self) -> bool {
        self == Command::Shutdown
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// An immutable command addressed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    id: RequestId,
    command: Command,
    payload: Option<String>,
}

impl Request {
    /// Builds a request. `payload` carries the tape identifier for `Start`.
    pub fn new(id: RequestId, command: Command, payload: Option<String>) -> Self {
        Self { id, command, payload }
    }

    /// The request identifier.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The command.
    pub fn command(&self) -> Command {
        self.command
    }

    /// The optional payload, e.g. a tape identifier.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

/// Outcome reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The command was carried out.
    Ok,
    /// The command failed; the response text says why.
    Error,
}

/// A response from the engine. `id` is absent for unsolicited messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Identifier of the originating request, if any.
    pub id: Option<RequestId>,
    /// Outcome of the command.
    pub status: Status,
    /// Optional diagnostic text.
    pub text: Option<String>,
}

impl Response {
    /// A successful response to `id`.
    pub fn ok(id: RequestId) -> Self {
        Self {
            id: Some(id),
            status: Status::Ok,
            text: None,
        }
    }

    /// A failed response to `id` with diagnostic text.
    pub fn error(id: RequestId, text: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            status: Status::Error,
            text: Some(text.into()),
        }
    }

    /// Whether the engine reported success.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Hands out request identifiers that are unique for the lifetime of the generator.
///
/// Identifiers start at 1 and increase monotonically; concurrent callers never
/// observe the same value.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl RequestIdGenerator {
    /// A generator whose first identifier is `first`.
    pub fn starting_at(first: RequestId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Returns a fresh identifier.
    pub fn next_id(&self) -> RequestId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ids_start_at_one_and_increase() {
        let ids = RequestIdGenerator::default();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(RequestIdGenerator::starting_at(999).next_id(), 999);
    }

    #[test]
    fn concurrent_callers_get_distinct_ids() {
        let ids = Arc::new(RequestIdGenerator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn only_shutdown_is_terminal() {
        assert!(Command::Shutdown.is_terminal());
        assert!(!Command::Start.is_terminal());
        assert!(!Command::Stop.is_terminal());
        assert_eq!(Command::Shutdown.to_string(), "SHUTDOWN");
    }
}
