//! # Channel Patterns
//!
//! A channel's pattern fixes three things at construction time: which socket
//! type backs it, whether it binds or connects its endpoint, and whether it may
//! send, receive, or both. The decision is resolved once into an
//! [`Activation`] instead of being re-derived on every call.

use std::fmt;
use std::str::FromStr;

use super::channel::ChannelError;

/// How a channel attaches to its endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Server side: the channel owns the address.
    Bind,
    /// Client side: the channel dials a peer that owns the address.
    Connect,
    /// Client side subscriber: connect, then subscribe to the empty topic.
    ConnectSubscribe,
}

/// The directional messaging discipline of a channel.
///
/// Roles must match across the two ends of a link: a `Publish` endpoint is read
/// by a `Subscribe` endpoint, a `PushServer` by a `PullClient`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPattern {
    /// Fan-out publisher (binds).
    Publish,
    /// Subscriber to every topic (connects).
    Subscribe,
    /// Request side of request/reply (connects).
    Request,
    /// Reply side of request/reply (binds).
    Reply,
    /// Push socket that owns its address.
    PushServer,
    /// Push socket that dials its peer.
    PushClient,
    /// Pull socket that owns its address.
    PullServer,
    /// Pull socket that dials its peer.
    PullClient,
}

impl ChannelPattern {
    /// Every supported pattern, in declaration order.
    pub const ALL: [ChannelPattern; 8] = [
        ChannelPattern::Publish,
        ChannelPattern::Subscribe,
        ChannelPattern::Request,
        ChannelPattern::Reply,
        ChannelPattern::PushServer,
        ChannelPattern::PushClient,
        ChannelPattern::PullServer,
        ChannelPattern::PullClient,
    ];

    /// The attach strategy for this pattern.
    pub fn activation(self) -> Activation {
        match self {
            ChannelPattern::Publish
            | ChannelPattern::Reply
            | ChannelPattern::PushServer
            | ChannelPattern::PullServer => Activation::Bind,
            ChannelPattern::Request | ChannelPattern::PushClient | ChannelPattern::PullClient => {
                Activation::Connect
            }
            ChannelPattern::Subscribe => Activation::ConnectSubscribe,
        }
    }

    /// Whether `send` is defined for this pattern.
    pub fn can_send(self) -> bool {
        matches!(
            self,
            ChannelPattern::Publish
                | ChannelPattern::Request
                | ChannelPattern::Reply
                | ChannelPattern::PushServer
                | ChannelPattern::PushClient
        )
    }

    /// Whether `receive` is defined for this pattern.
    pub fn can_receive(self) -> bool {
        matches!(
            self,
            ChannelPattern::Subscribe
                | ChannelPattern::Request
                | ChannelPattern::Reply
                | ChannelPattern::PullServer
                | ChannelPattern::PullClient
        )
    }

    /// Whether consecutive sends may go out without a reply in between.
    /// REQ and REP sockets alternate send and receive.
    pub fn sends_one_way(self) -> bool {
        matches!(
            self,
            ChannelPattern::Publish | ChannelPattern::PushServer | ChannelPattern::PushClient
        )
    }

    /// The configuration tag for this pattern.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelPattern::Publish => "pub",
            ChannelPattern::Subscribe => "sub",
            ChannelPattern::Request => "req",
            ChannelPattern::Reply => "rep",
            ChannelPattern::PushServer => "push-bind",
            ChannelPattern::PushClient => "push-connect",
            ChannelPattern::PullServer => "pull-bind",
            ChannelPattern::PullClient => "pull-connect",
        }
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelPattern {
    type Err = ChannelError;

    /// Parses a configuration tag. Tags are case-insensitive and `_` is accepted
    /// in place of `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        ChannelPattern::ALL
            .into_iter()
            .find(|pattern| pattern.as_str() == normalized)
            .ok_or_else(|| ChannelError::UnknownPattern(s.to_string()))
    }
}
