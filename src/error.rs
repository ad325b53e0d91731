use std::fmt;

use thiserror::Error;
use tonic::{Code, Status};

use crate::handle::CallHandle;
use crate::registry::error::UnknownHandle;
use crate::transport::error::{EmptyServiceName, ServiceNotRegistered};

/// Error classification handed across the C boundary.
///
/// `0` is success; every other value is a bridge-defined failure. Transport status codes never
/// cross the boundary directly, they are folded into [`TransportError`](ErrorCode::TransportError)
/// or [`RemoteError`](ErrorCode::RemoteError) by [`ErrorCode::from_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InitError = 1,
    UnknownHandle = 2,
    SendAfterClose = 3,
    AlreadyClosed = 4,
    DecodeError = 5,
    TransportError = 6,
    RemoteError = 7,
    InvalidArgument = 8,
    AlreadyInitialized = 9,
    InternalError = 10,
}

impl ErrorCode {
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Parse a raw code, returning `None` for values outside the bridge's range.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Ok,
            1 => Self::InitError,
            2 => Self::UnknownHandle,
            3 => Self::SendAfterClose,
            4 => Self::AlreadyClosed,
            5 => Self::DecodeError,
            6 => Self::TransportError,
            7 => Self::RemoteError,
            8 => Self::InvalidArgument,
            9 => Self::AlreadyInitialized,
            10 => Self::InternalError,
            _ => return None,
        })
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Map a terminal transport status into the bridge's error space.
    ///
    /// Connection-level codes become `TransportError`; anything the remote application chose to
    /// return becomes `RemoteError`.
    pub fn from_status(status: &Status) -> Self {
        match status.code() {
            Code::Ok => Self::Ok,
            Code::Unavailable
            | Code::Cancelled
            | Code::DeadlineExceeded
            | Code::Aborted
            | Code::Unknown
            | Code::Internal
            | Code::DataLoss => Self::TransportError,
            _ => Self::RemoteError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::InitError => "INIT_ERROR",
            Self::UnknownHandle => "UNKNOWN_HANDLE",
            Self::SendAfterClose => "SEND_AFTER_CLOSE",
            Self::AlreadyClosed => "ALREADY_CLOSED",
            Self::DecodeError => "DECODE_ERROR",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::RemoteError => "REMOTE_ERROR",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{name} ({})", self.as_raw())
    }
}

/// Errors that can occur while driving a call through the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The underlying stream session could not be established.
    #[error("failed to establish stream session: {0}")]
    Init(String),

    /// No handler is registered for the requested service.
    #[error(transparent)]
    ServiceNotRegistered(#[from] ServiceNotRegistered),

    /// A handler registration named no service.
    #[error(transparent)]
    EmptyServiceName(#[from] EmptyServiceName),

    /// Timed out waiting for the session to open.
    #[error("timeout establishing stream session")]
    OpenTimeout(#[from] tokio::time::error::Elapsed),

    /// The handle was never issued, or its call has already completed.
    #[error(transparent)]
    UnknownHandle(#[from] UnknownHandle),

    /// A send was attempted after the outbound half was closed.
    #[error("call {handle} has already closed its outbound half")]
    SendAfterClose { handle: CallHandle },

    /// Close-send was requested more than once.
    #[error("close-send already requested for call {handle}")]
    AlreadyClosed { handle: CallHandle },

    /// The payload did not decode as a stream record.
    #[error("stream record decode error")]
    Decode(#[from] prost::DecodeError),

    /// The connection failed or the outbound half was torn down.
    #[error("transport error: {0}")]
    Transport(Status),

    /// The remote application ended the call with an error status.
    #[error("remote error: {0}")]
    Remote(Status),

    /// An argument was rejected before reaching the call.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The process-wide bridge has already been initialized.
    #[error("bridge already initialized")]
    AlreadyInitialized,

    /// The process-wide bridge has not been initialized yet.
    #[error("bridge not initialized")]
    NotInitialized,

    /// A callback panicked while being dispatched.
    #[error("callback panicked")]
    CallbackPanic,
}

impl BridgeError {
    /// Wrap a transport status, classifying it by [`ErrorCode::from_status`].
    pub fn from_status(status: Status) -> Self {
        match ErrorCode::from_status(&status) {
            ErrorCode::RemoteError => Self::Remote(status),
            _ => Self::Transport(status),
        }
    }

    /// The error code reported across the C boundary for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Init(_)
            | Self::ServiceNotRegistered(_)
            | Self::OpenTimeout(_)
            | Self::NotInitialized => ErrorCode::InitError,
            Self::EmptyServiceName(_) | Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::UnknownHandle(_) => ErrorCode::UnknownHandle,
            Self::SendAfterClose { .. } => ErrorCode::SendAfterClose,
            Self::AlreadyClosed { .. } => ErrorCode::AlreadyClosed,
            Self::Decode(_) => ErrorCode::DecodeError,
            Self::Transport(_) => ErrorCode::TransportError,
            Self::Remote(_) => ErrorCode::RemoteError,
            Self::AlreadyInitialized => ErrorCode::AlreadyInitialized,
            Self::CallbackPanic => ErrorCode::InternalError,
        }
    }
}
