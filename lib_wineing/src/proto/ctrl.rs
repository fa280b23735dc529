//! Control channel messages: commands to the engine and its acknowledgements.

use prost::Message;

use super::{required_enum, CodecError};
use crate::control::message::{Command, Request, Response, Status};

/// A command addressed to the engine.
#[derive(Clone, PartialEq, Message)]
pub struct RequestProto {
    /// Correlation id chosen by the client.
    #[prost(uint64, tag = "1")]
    pub request_id: u64,

    /// The command. Maps to [`CommandType`].
    #[prost(enumeration = "CommandType", tag = "2")]
    pub r#type: i32,

    /// Tape to replay for `START`; absent means real-time data.
    #[prost(string, optional, tag = "3")]
    pub tape_file: Option<String>,
}

/// Commands on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CommandType {
    /// Not set
    Unspecified = 0,
    /// Start the data tape
    Start = 1,
    /// Stop the data tape
    Stop = 2,
    /// Shut the engine down
    Shutdown = 3,
}

/// The engine's answer to a request, or an unsolicited notice when
/// `request_id` is absent.
#[derive(Clone, PartialEq, Message)]
pub struct ResponseProto {
    #[prost(uint64, optional, tag = "1")]
    pub request_id: Option<u64>,

    /// Maps to [`StatusCode`].
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub code: i32,

    /// Diagnostic text, typically set on errors.
    #[prost(string, optional, tag = "3")]
    pub text: Option<String>,
}

/// Response status on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    /// Not set
    Unspecified = 0,
    /// Success
    Ok = 1,
    /// Engine-reported failure
    Err = 2,
}

impl From<Command> for CommandType {
    fn from(command: Command) -> Self {
        match command {
            Command::Start => CommandType::Start,
            Command::Stop => CommandType::Stop,
            Command::Shutdown => CommandType::Shutdown,
        }
    }
}

impl From<Status> for StatusCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => StatusCode::Ok,
            Status::Error => StatusCode::Err,
        }
    }
}

impl From<&Request> for RequestProto {
    fn from(request: &Request) -> Self {
        Self {
            request_id: request.id(),
            r#type: CommandType::from(request.command()) as i32,
            tape_file: request.payload().map(str::to_owned),
        }
    }
}

impl TryFrom<RequestProto> for Request {
    type Error = CodecError;

    fn try_from(proto: RequestProto) -> Result<Self, Self::Error> {
        let command = match required_enum("Request", "type", proto.r#type)? {
            CommandType::Start => Command::Start,
            CommandType::Stop => Command::Stop,
            CommandType::Shutdown => Command::Shutdown,
            CommandType::Unspecified => {
                return Err(CodecError::MissingField {
                    message: "Request",
                    field: "type",
                })
            }
        };
        Ok(Request::new(proto.request_id, command, proto.tape_file))
    }
}

impl From<&Response> for ResponseProto {
    fn from(response: &Response) -> Self {
        Self {
            request_id: response.id,
            code: StatusCode::from(response.status) as i32,
            text: response.text.clone(),
        }
    }
}

impl TryFrom<ResponseProto> for Response {
    type Error = CodecError;

    fn try_from(proto: ResponseProto) -> Result<Self, Self::Error> {
        let status = match required_enum("Response", "code", proto.code)? {
            StatusCode::Ok => Status::Ok,
            StatusCode::Err => Status::Error,
            StatusCode::Unspecified => {
                return Err(CodecError::MissingField {
                    message: "Response",
                    field: "code",
                })
            }
        };
        Ok(Response {
            id: proto.request_id,
            status,
            text: proto.text,
        })
    }
}

/// Serializes a request into one frame.
pub fn encode_request(request: &Request) -> Vec<u8> {
    RequestProto::from(request).encode_to_vec()
}

/// Parses one frame into a request.
pub fn decode_request(frame: &[u8]) -> Result<Request, CodecError> {
    let proto = RequestProto::decode(frame).map_err(|source| CodecError::Decode {
        message: "Request",
        source,
    })?;
    Request::try_from(proto)
}

/// Serializes a response into one frame.
pub fn encode_response(response: &Response) -> Vec<u8> {
    ResponseProto::from(response).encode_to_vec()
}

/// Parses one frame into a response.
pub fn decode_response(frame: &[u8]) -> Result<Response, CodecError> {
    let proto = ResponseProto::decode(frame).map_err(|source| CodecError::Decode {
        message: "Response",
        source,
    })?;
    Response::try_from(proto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_carries_tape_on_the_wire() {
        let request = Request::new(17, Command::Start, Some("tape-A".into()));
        let proto = RequestProto::decode(encode_request(&request).as_slice()).unwrap();
        assert_eq!(proto.request_id, 17);
        assert_eq!(proto.r#type, CommandType::Start as i32);
        assert_eq!(proto.tape_file.as_deref(), Some("tape-A"));

        assert_eq!(decode_request(&encode_request(&request)).unwrap(), request);
    }

    #[test]
    fn unsolicited_response_has_no_id() {
        let response = Response {
            id: None,
            status: Status::Error,
            text: Some("Tape not found".into()),
        };
        let frame = encode_response(&response);
        let proto = ResponseProto::decode(frame.as_slice()).unwrap();
        assert_eq!(proto.request_id, None);
        assert_eq!(decode_response(&frame).unwrap(), response);
    }

    #[test]
    fn id_zero_is_distinct_from_absent() {
        let frame = encode_response(&Response::ok(0));
        assert_eq!(decode_response(&frame).unwrap().id, Some(0));
    }

    #[test]
    fn truncated_frame_is_a_decode_error() {
        let err = decode_response(&[0x0a, 0x7f]).unwrap_err();
        assert!(matches!(err, CodecError::Decode { message: "Response", .. }));
        let err = decode_request(&[0x0f]).unwrap_err();
        assert!(matches!(err, CodecError::Decode { message: "Request", .. }));
    }

    #[test]
    fn missing_status_is_rejected() {
        let frame = ResponseProto {
            request_id: Some(3),
            code: 0,
            text: None,
        }
        .encode_to_vec();
        assert!(matches!(
            decode_response(&frame),
            Err(CodecError::MissingField { field: "code", .. })
        ));
        // An empty frame decodes to all defaults, so it is missing the status too.
        assert!(matches!(
            decode_response(&[]),
            Err(CodecError::MissingField { .. })
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let frame = RequestProto {
            request_id: 1,
            r#type: 42,
            tape_file: None,
        }
        .encode_to_vec();
        assert!(matches!(
            decode_request(&frame),
            Err(CodecError::UnknownEnumValue { value: 42, .. })
        ));
    }
}
