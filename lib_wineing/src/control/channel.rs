//! # Channel
//!
//! A `Channel` is one endpoint of a ZeroMQ link: an address, a
//! [`ChannelPattern`], and at most one live socket. It hides socket creation and
//! the pattern-specific bind / connect / subscribe rules behind a uniform
//! `send` / `receive` of opaque byte frames.
//!
//! ## Ownership
//!
//! Every operation takes `&mut self`, so a channel can only be driven from one
//! execution context at a time. Workers create their channel inside their own
//! task and never hand it out.
//!
//! ## Startup
//!
//! Client-side patterns dial a peer that may not be listening yet. `activate`
//! retries the connect with exponential backoff according to a [`RetryPolicy`]
//! instead of relying on a fixed sleep.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::sleep;
use zeromq::{Socket, SocketRecv, SocketSend, ZmqError, ZmqMessage};

use super::pattern::{Activation, ChannelPattern};

/// Errors raised by channel construction and I/O.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A configuration tag that names no known pattern. Fatal at startup.
    #[error("Unknown channel pattern [{0}]")]
    UnknownPattern(String),

    /// The channel was used before `open` or after `close`.
    #[error("Channel [{0}] is not open")]
    NotOpen(String),

    /// The pattern cannot perform the requested operation.
    #[error("Operation '{operation}' is not supported by pattern [{pattern}]")]
    Unsupported {
        /// `send` or `receive`.
        operation: &'static str,
        /// The channel's pattern.
        pattern: ChannelPattern,
    },

    /// A message arrived without any frame.
    #[error("Received an empty message on [{0}]")]
    EmptyFrame(String),

    /// The connect retry budget ran out.
    #[error("Giving up connecting to [{address}] after {attempts} attempts: {source}")]
    ConnectExhausted {
        /// The address that could not be reached.
        address: String,
        /// Number of connect attempts made.
        attempts: u32,
        /// The last transport error.
        #[source]
        source: ZmqError,
    },

    /// Any other error reported by the transport.
    #[error("Transport error: {0}")]
    Transport(#[from] ZmqError),
}

/// Connect retry schedule for client-side patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for the doubling delay.
    pub max_delay: Duration,
    /// Total attempts allowed; `None` retries until the caller gives up.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    /// The pause after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another attempt may follow `attempts_made` failures.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }
}

/// The concrete socket behind a channel, one variant per socket type.
enum ZmqSocket {
    Publish(zeromq::PubSocket),
    Subscribe(zeromq::SubSocket),
    Request(zeromq::ReqSocket),
    Reply(zeromq::RepSocket),
    Push(zeromq::PushSocket),
    Pull(zeromq::PullSocket),
}

impl ZmqSocket {
    fn for_pattern(pattern: ChannelPattern) -> Self {
        match pattern {
            ChannelPattern::Publish => ZmqSocket::Publish(zeromq::PubSocket::new()),
            ChannelPattern::Subscribe => ZmqSocket::Subscribe(zeromq::SubSocket::new()),
            ChannelPattern::Request => ZmqSocket::Request(zeromq::ReqSocket::new()),
            ChannelPattern::Reply => ZmqSocket::Reply(zeromq::RepSocket::new()),
            ChannelPattern::PushServer | ChannelPattern::PushClient => {
                ZmqSocket::Push(zeromq::PushSocket::new())
            }
            ChannelPattern::PullServer | ChannelPattern::PullClient => {
                ZmqSocket::Pull(zeromq::PullSocket::new())
            }
        }
    }

    async fn bind(&mut self, address: &str) -> Result<String, ZmqError> {
        let endpoint = match self {
            ZmqSocket::Publish(s) => s.bind(address).await?,
            ZmqSocket::Subscribe(s) => s.bind(address).await?,
            ZmqSocket::Request(s) => s.bind(address).await?,
            ZmqSocket::Reply(s) => s.bind(address).await?,
            ZmqSocket::Push(s) => s.bind(address).await?,
            ZmqSocket::Pull(s) => s.bind(address).await?,
        };
        Ok(endpoint.to_string())
    }

    async fn connect(&mut self, address: &str) -> Result<(), ZmqError> {
        match self {
            ZmqSocket::Publish(s) => s.connect(address).await,
            ZmqSocket::Subscribe(s) => s.connect(address).await,
            ZmqSocket::Request(s) => s.connect(address).await,
            ZmqSocket::Reply(s) => s.connect(address).await,
            ZmqSocket::Push(s) => s.connect(address).await,
            ZmqSocket::Pull(s) => s.connect(address).await,
        }
    }
}

/// One messaging endpoint: address, pattern and the socket that serves them.
pub struct Channel {
    address: String,
    pattern: ChannelPattern,
    socket: Option<ZmqSocket>,
    endpoint: Option<String>,
}

impl Channel {
    /// Creates a closed channel for `address` (e.g. `tcp://127.0.0.1:5555`,
    /// `ipc:///tmp/wineing/ctrl`).
    pub fn new(address: impl Into<String>, pattern: ChannelPattern) -> Self {
        Self {
            address: address.into(),
            pattern,
            socket: None,
            endpoint: None,
        }
    }

    /// The configured pattern.
    pub fn pattern(&self) -> ChannelPattern {
        self.pattern
    }

    /// The endpoint actually bound or connected, once activated. For a bind to
    /// port 0 this carries the port the OS picked.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Whether a socket is currently allocated.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Allocates the socket for the configured pattern, replacing any previous one.
    pub fn open(&mut self) {
        self.socket = Some(ZmqSocket::for_pattern(self.pattern));
        self.endpoint = None;
    }

    /// Binds or connects according to the pattern and returns the resolved
    /// endpoint. A `Subscribe` channel additionally subscribes to the empty
    /// topic, i.e. receives everything.
    pub async fn activate(&mut self, retry: &RetryPolicy) -> Result<String, ChannelError> {
        let address = self.address.clone();
        let pattern = self.pattern;
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| ChannelError::NotOpen(address.clone()))?;

        let endpoint = match pattern.activation() {
            Activation::Bind => socket.bind(&address).await?,
            Activation::Connect | Activation::ConnectSubscribe => {
                connect_with_retry(socket, &address, retry).await?;
                address.clone()
            }
        };

        if let (Activation::ConnectSubscribe, ZmqSocket::Subscribe(sub)) = (pattern.activation(), &mut *socket) {
            sub.subscribe("").await?;
        }

        tracing::debug!(address = %address, endpoint = %endpoint, %pattern, "Channel activated");
        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Writes one message. Suspends while the transport applies backpressure.
    pub async fn send(&mut self, payload: Vec<u8>) -> Result<(), ChannelError> {
        if !self.pattern.can_send() {
            return Err(ChannelError::Unsupported {
                operation: "send",
                pattern: self.pattern,
            });
        }
        let message = ZmqMessage::from(payload);
        match self.socket.as_mut() {
            Some(ZmqSocket::Publish(s)) => s.send(message).await?,
            Some(ZmqSocket::Request(s)) => s.send(message).await?,
            Some(ZmqSocket::Reply(s)) => s.send(message).await?,
            Some(ZmqSocket::Push(s)) => s.send(message).await?,
            Some(_) => {
                return Err(ChannelError::Unsupported {
                    operation: "send",
                    pattern: self.pattern,
                })
            }
            None => return Err(ChannelError::NotOpen(self.address.clone())),
        }
        Ok(())
    }

    /// Reads exactly one message, waiting until one arrives.
    pub async fn receive(&mut self) -> Result<Bytes, ChannelError> {
        if !self.pattern.can_receive() {
            return Err(ChannelError::Unsupported {
                operation: "receive",
                pattern: self.pattern,
            });
        }
        let message = match self.socket.as_mut() {
            Some(ZmqSocket::Subscribe(s)) => s.recv().await?,
            Some(ZmqSocket::Request(s)) => s.recv().await?,
            Some(ZmqSocket::Reply(s)) => s.recv().await?,
            Some(ZmqSocket::Pull(s)) => s.recv().await?,
            Some(_) => {
                return Err(ChannelError::Unsupported {
                    operation: "receive",
                    pattern: self.pattern,
                })
            }
            None => return Err(ChannelError::NotOpen(self.address.clone())),
        };
        message
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| ChannelError::EmptyFrame(self.address.clone()))
    }

    /// Releases the socket. The channel must be opened and activated again
    /// before further use.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!(address = %self.address, pattern = %self.pattern, "Channel closed");
        }
        self.endpoint = None;
    }
}

async fn connect_with_retry(
    socket: &mut ZmqSocket,
    address: &str,
    retry: &RetryPolicy,
) -> Result<(), ChannelError> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match socket.connect(address).await {
            Ok(()) => return Ok(()),
            Err(e) if retry.allows_retry(attempts) => {
                let delay = retry.delay_for(attempts);
                tracing::warn!(
                    "Failed to connect to {}: {}. Retrying in {}ms...",
                    address,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
            }
            Err(e) => {
                return Err(ChannelError::ConnectExhausted {
                    address: address.to_string(),
                    attempts,
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts: Some(6),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(1000));
        assert!(policy.allows_retry(5));
        assert!(!policy.allows_retry(6));
        assert!(RetryPolicy::default().allows_retry(u32::MAX - 1));
        assert!(!RetryPolicy::no_retry().allows_retry(1));
    }

    #[tokio::test]
    async fn io_before_open_is_rejected() {
        let mut channel = Channel::new("tcp://127.0.0.1:0", ChannelPattern::PushClient);
        assert!(matches!(
            channel.send(b"x".to_vec()).await,
            Err(ChannelError::NotOpen(_))
        ));
        assert!(matches!(
            channel.activate(&RetryPolicy::no_retry()).await,
            Err(ChannelError::NotOpen(_))
        ));
    }

    #[tokio::test]
    async fn direction_is_enforced_by_pattern() {
        let mut subscriber = Channel::new("tcp://127.0.0.1:0", ChannelPattern::Subscribe);
        subscriber.open();
        let err = subscriber.send(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported { operation: "send", .. }));

        let mut pusher = Channel::new("tcp://127.0.0.1:0", ChannelPattern::PushServer);
        pusher.open();
        let err = pusher.receive().await.unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported { operation: "receive", .. }));
    }

    #[tokio::test]
    async fn push_reaches_bound_pull() {
        let mut server = Channel::new("tcp://127.0.0.1:0", ChannelPattern::PullServer);
        server.open();
        let endpoint = server.activate(&RetryPolicy::no_retry()).await.unwrap();
        assert_eq!(server.endpoint(), Some(endpoint.as_str()));

        let mut client = Channel::new(endpoint.clone(), ChannelPattern::PushClient);
        client.open();
        client.activate(&RetryPolicy::default()).await.unwrap();
        client.send(b"hello".to_vec()).await.unwrap();

        let frame = timeout(Duration::from_secs(5), server.receive())
            .await
            .expect("receive timed out")
            .unwrap();
        assert_eq!(&frame[..], b"hello");

        client.close();
        server.close();
        assert!(!server.is_open());
        assert!(server.endpoint().is_none());
    }

    #[tokio::test]
    async fn subscriber_receives_everything_published() {
        let mut publisher = Channel::new("tcp://127.0.0.1:0", ChannelPattern::Publish);
        publisher.open();
        let endpoint = publisher.activate(&RetryPolicy::no_retry()).await.unwrap();

        let mut subscriber = Channel::new(endpoint, ChannelPattern::Subscribe);
        subscriber.open();
        subscriber.activate(&RetryPolicy::default()).await.unwrap();

        // The subscription reaches the publisher asynchronously; keep publishing until it lands.
        let frame = timeout(Duration::from_secs(5), async {
            loop {
                publisher.send(b"tick".to_vec()).await.unwrap();
                if let Ok(received) = timeout(Duration::from_millis(50), subscriber.receive()).await {
                    break received.unwrap();
                }
            }
        })
        .await
        .expect("no message reached the subscriber");
        assert_eq!(&frame[..], b"tick");
    }
}
