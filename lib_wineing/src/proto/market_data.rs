//! Market data stream messages.

use prost::Message;

use super::{required_enum, CodecError};
use crate::control::market::{MarketData, MarketKind};

/// One market data event published by the engine.
#[derive(Clone, PartialEq, Message)]
pub struct MarketDataProto {
    /// Maps to [`MarketDataKind`].
    #[prost(enumeration = "MarketDataKind", tag = "1")]
    pub r#type: i32,

    /// Instrument symbol (e.g. "AAPL")
    #[prost(string, tag = "2")]
    pub symbol: String,

    #[prost(double, tag = "3")]
    pub price: f64,

    #[prost(int64, tag = "4")]
    pub size: i64,

    /// Event time in milliseconds since Unix Epoch
    #[prost(sint64, tag = "5")]
    pub time: i64,
}

/// Market data event kinds on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MarketDataKind {
    /// Not set
    Unspecified = 0,
    /// Bid/ask update
    Quote = 1,
    /// Executed trade
    Trade = 2,
    /// Instrument or session status change
    Status = 3,
}

impl From<MarketKind> for MarketDataKind {
    fn from(kind: MarketKind) -> Self {
        match kind {
            MarketKind::Quote => MarketDataKind::Quote,
            MarketKind::Trade => MarketDataKind::Trade,
            MarketKind::Status => MarketDataKind::Status,
        }
    }
}

impl From<&MarketData> for MarketDataProto {
    fn from(data: &MarketData) -> Self {
        Self {
            r#type: MarketDataKind::from(data.kind) as i32,
            symbol: data.symbol.clone(),
            price: data.price,
            size: data.size,
            time: data.time,
        }
    }
}

impl TryFrom<MarketDataProto> for MarketData {
    type Error = CodecError;

    fn try_from(proto: MarketDataProto) -> Result<Self, Self::Error> {
        let kind = match required_enum("MarketData", "type", proto.r#type)? {
            MarketDataKind::Quote => MarketKind::Quote,
            MarketDataKind::Trade => MarketKind::Trade,
            MarketDataKind::Status => MarketKind::Status,
            MarketDataKind::Unspecified => {
                return Err(CodecError::MissingField {
                    message: "MarketData",
                    field: "type",
                })
            }
        };
        Ok(MarketData {
            kind,
            symbol: proto.symbol,
            price: proto.price,
            size: proto.size,
            time: proto.time,
        })
    }
}

/// Serializes a market data event into one frame.
pub fn encode_market_data(data: &MarketData) -> Vec<u8> {
    MarketDataProto::from(data).encode_to_vec()
}

/// Parses one frame into a market data event.
pub fn decode_market_data(frame: &[u8]) -> Result<MarketData, CodecError> {
    let proto = MarketDataProto::decode(frame).map_err(|source| CodecError::Decode {
        message: "MarketData",
        source,
    })?;
    MarketData::try_from(proto)
}
