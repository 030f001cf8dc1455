// ABOUTME: Unified protocol error taxonomy spanning wire, object, dispatch, and connection layers
// ABOUTME: Mirrors the error code a `Display.error` event reports on the wire

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io;
use thiserror::Error;

use crate::object::ObjectError;
use crate::wire::WireError;

/// Errors raised while routing a decoded frame to its handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("object {0} does not declare a request at opcode {1}")]
    InvalidMethod(u32, u16),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A handler reported a fatal, interface-specific protocol error; the
    /// connection must be torn down and (server-side) the peer told why.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Numeric error codes carried by a `Display.error` event, matching the
/// taxonomy in the wire protocol's built-in error enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidObject = 0,
    InvalidMethod = 1,
    NoMemory = 2,
    Implementation = 3,
}

/// The taxonomy row a fatal protocol failure belongs to, used to decide
/// whether (and with what code) to emit a `Display.error` event before
/// tearing the connection down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] WireError),

    #[error("unknown object: {0}")]
    UnknownObject(u32),

    #[error("invalid method on object {object}, opcode {opcode}")]
    InvalidMethod { object: u32, opcode: u16 },

    #[error("interface-specific error on object {object}: code {code}, {message}")]
    InterfaceSpecific {
        object: u32,
        code: u32,
        message: String,
    },

    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ProtocolError {
    pub fn transport_lost(reason: impl Into<String>) -> ProtocolError {
        ProtocolError::TransportLost(reason.into())
    }

    /// The `(object, code, message)` triple to encode into a `Display.error`
    /// event, or `None` for errors that never get an on-wire representation
    /// because the connection is already gone.
    pub fn as_display_error(&self, offending_object: u32) -> Option<(u32, ErrorCode, String)> {
        match self {
            ProtocolError::MalformedFrame(e) => {
                Some((offending_object, ErrorCode::InvalidMethod, e.to_string()))
            }
            ProtocolError::UnknownObject(id) => {
                Some((*id, ErrorCode::InvalidObject, self.to_string()))
            }
            ProtocolError::InvalidMethod { object, .. } => {
                Some((*object, ErrorCode::InvalidMethod, self.to_string()))
            }
            ProtocolError::InterfaceSpecific { object, code, message } => {
                let error_code = ErrorCode::try_from(*code).unwrap_or(ErrorCode::Implementation);
                Some((*object, error_code, message.clone()))
            }
            ProtocolError::ResourceExhausted(msg) => {
                Some((offending_object, ErrorCode::NoMemory, msg.clone()))
            }
            ProtocolError::TransportLost(_) => None,
        }
    }
}

impl From<DispatchError> for ProtocolError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidMethod(object, opcode) => {
                ProtocolError::InvalidMethod { object, opcode }
            }
            DispatchError::Object(ObjectError::Unknown(id)) => ProtocolError::UnknownObject(id),
            DispatchError::Object(other) => ProtocolError::ResourceExhausted(other.to_string()),
            DispatchError::Wire(e) => ProtocolError::MalformedFrame(e),
        }
    }
}
