//! Common error types.

use std::{error, fmt};

use crate::wire::{ContextId, Opcode};

/// Protocol-level failure produced while handling a client request.
///
/// Every variant maps to a typed error reply on the wire; none of them is
/// fatal to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The request's declared length does not match the fixed size of its
    /// minor opcode.
    Length(Opcode),
    /// Unknown minor opcode.
    BadRequest(u8),
    /// A byte-swapped (non-local) client attempted a restricted operation.
    NotLocal,
    /// The request named a context handle that is not in the store.
    UnknownContext(ContextId),
    /// A request field carried a value outside its defined domain.
    Value(u32),
    /// get-composition-string for a sub-field with no stored value.
    ///
    /// Distinct from an empty string: nothing has been composed yet.
    NoValue,
    /// Registering a context or subscription failed due to resource
    /// exhaustion; the store is unchanged.
    Alloc,
    /// The operation is defined by the protocol but not offered by this
    /// server.
    NotSupported,
    /// The extension is present but disabled.
    Disabled,
}

impl ProtocolError {
    /// Error code on the wire, given the extension's error base.
    ///
    /// Extension-specific errors live at `error_base + n`; the remaining
    /// variants reuse the transport's core error codes.
    pub fn error_code(&self, error_base: u8) -> u8 {
        match self {
            ProtocolError::NotLocal => error_base,
            ProtocolError::NotSupported => error_base + 1,
            ProtocolError::Disabled => error_base + 2,
            ProtocolError::BadRequest(_) => 1,
            ProtocolError::Value(_) | ProtocolError::UnknownContext(_) | ProtocolError::NoValue => {
                2
            },
            ProtocolError::Alloc => 11,
            ProtocolError::Length(_) => 16,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Length(opcode) => {
                write!(f, "request length does not match the fixed size of {opcode:?}")
            },
            ProtocolError::BadRequest(minor) => write!(f, "unknown minor opcode {minor}"),
            ProtocolError::NotLocal => write!(f, "operation is restricted to local clients"),
            ProtocolError::UnknownContext(context) => {
                write!(f, "context {} is not in the store", context.raw())
            },
            ProtocolError::Value(value) => write!(f, "value {value} is outside its domain"),
            ProtocolError::NoValue => write!(f, "no value stored for the requested sub-field"),
            ProtocolError::Alloc => write!(f, "resource exhaustion while registering"),
            ProtocolError::NotSupported => write!(f, "operation not supported"),
            ProtocolError::Disabled => write!(f, "extension is disabled"),
        }
    }
}

impl error::Error for ProtocolError {}

/// Failure of a client-stub call.
#[derive(Debug)]
pub enum ClientError {
    /// The underlying transport failed; no reply will arrive.
    Transport(Box<dyn error::Error + Send + Sync>),
    /// The server answered with an error instead of a reply.
    ErrorReply(u8),
    /// The reply was shorter than its fixed layout or otherwise malformed.
    MalformedReply,
}

impl ClientError {
    pub(crate) fn transport<E: error::Error + Send + Sync + 'static>(err: E) -> Self {
        ClientError::Transport(Box::new(err))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(err) => write!(f, "transport failure: {err}"),
            ClientError::ErrorReply(code) => write!(f, "server returned error code {code}"),
            ClientError::MalformedReply => write!(f, "malformed reply"),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ClientError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Fault that terminates the bridge worker.
///
/// These are fatal to the worker only; the protocol server keeps running and
/// existing contexts simply stop receiving native-IME-driven notifications.
#[derive(Debug)]
pub enum BridgeError {
    /// Could not reach the server over the worker's own connection.
    Connect(ClientError),
    /// The server does not advertise the extension.
    ExtensionMissing,
    /// Registering as an input-method server failed.
    Register(Box<dyn error::Error + Send + Sync>),
    /// The connection died while the worker was serving.
    Transport(ClientError),
    /// The worker's message channel was torn down while serving.
    ChannelClosed,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Connect(err) => write!(f, "could not connect to the server: {err}"),
            BridgeError::ExtensionMissing => write!(f, "server lacks the IME extension"),
            BridgeError::Register(err) => {
                write!(f, "input method server registration failed: {err}")
            },
            BridgeError::Transport(err) => write!(f, "connection lost while serving: {err}"),
            BridgeError::ChannelClosed => write!(f, "worker message channel closed"),
        }
    }
}

impl error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            BridgeError::Connect(err) | BridgeError::Transport(err) => Some(err),
            BridgeError::Register(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<ClientError> for BridgeError {
    fn from(err: ClientError) -> Self {
        BridgeError::Transport(err)
    }
}
