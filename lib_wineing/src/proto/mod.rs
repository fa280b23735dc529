//! # Wire Format
//!
//! Protocol Buffers messages exchanged with the engine, one message per
//! transport frame. The structs are written by hand with `prost` derives, so no
//! `protoc` is needed at build time. The equivalent schema:
//!
//! ```text
//! message Request  { uint64 request_id = 1; Command type = 2; optional string tape_file = 3; }
//! enum Command     { COMMAND_UNSPECIFIED = 0; START = 1; STOP = 2; SHUTDOWN = 3; }
//! message Response { optional uint64 request_id = 1; Status code = 2; optional string text = 3; }
//! enum Status      { STATUS_UNSPECIFIED = 0; OK = 1; ERR = 2; }
//! message MarketData { Kind type = 1; string symbol = 2; double price = 3; int64 size = 4; sint64 time = 5; }
//! enum Kind        { KIND_UNSPECIFIED = 0; QUOTE = 1; TRADE = 2; STATUS = 3; }
//! ```
//!
//! A frame that fails to decode, or decodes with an unspecified or unknown enum
//! value in a required field, is rejected with a [`CodecError`].

pub mod ctrl;
pub mod market_data;

use thiserror::Error;

pub use ctrl::{
    decode_request, decode_response, encode_request, encode_response, CommandType, RequestProto,
    ResponseProto, StatusCode,
};
pub use market_data::{decode_market_data, encode_market_data, MarketDataKind, MarketDataProto};

/// Errors raised while turning a frame into a domain message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes are not a valid protobuf encoding of the message.
    #[error("Failed to decode {message}: {source}")]
    Decode {
        /// Message type being decoded.
        message: &'static str,
        /// Underlying protobuf error.
        #[source]
        source: prost::DecodeError,
    },

    /// A required enum field was left at its unspecified default.
    #[error("{message} is missing required field '{field}'")]
    MissingField {
        /// Message type being decoded.
        message: &'static str,
        /// Name of the missing field.
        field: &'static str,
    },

    /// An enum field carries a value this client does not know.
    #[error("{message} field '{field}' has unknown value {value}")]
    UnknownEnumValue {
        /// Message type being decoded.
        message: &'static str,
        /// Name of the offending field.
        field: &'static str,
        /// The raw wire value.
        value: i32,
    },
}

/// Resolves a required enum field, treating 0 as absent.
pub(crate) fn required_enum<E>(
    message: &'static str,
    field: &'static str,
    value: i32,
) -> Result<E, CodecError>
where
    E: TryFrom<i32>,
{
    if value == 0 {
        return Err(CodecError::MissingField { message, field });
    }
    E::try_from(value).map_err(|_| CodecError::UnknownEnumValue {
        message,
        field,
        value,
    })
}
