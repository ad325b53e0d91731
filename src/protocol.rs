use std::fmt;

use crate::error::BridgeError;

/// Raw protocol selector values accepted at the C boundary.
pub const PROTOCOL_UNSET: i32 = 0;
pub const PROTOCOL_GRPC: i32 = 1;
pub const PROTOCOL_CONNECT: i32 = 2;

/// An RPC protocol a service handler can be registered under.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    Connect,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Connect => "connectrpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which handler slots a call may be routed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolSelection {
    /// No protocol was chosen: gRPC is tried first, then Connect.
    #[default]
    Unset,
    /// Only this protocol's handler is used; there is no fallback.
    Only(Protocol),
}

impl ProtocolSelection {
    pub fn from_raw(raw: i32) -> Result<Self, BridgeError> {
        match raw {
            PROTOCOL_UNSET => Ok(Self::Unset),
            PROTOCOL_GRPC => Ok(Self::Only(Protocol::Grpc)),
            PROTOCOL_CONNECT => Ok(Self::Only(Protocol::Connect)),
            _ => Err(BridgeError::InvalidArgument("unknown protocol selector")),
        }
    }

    /// The protocols to try, in order.
    pub fn candidates(self) -> &'static [Protocol] {
        match self {
            Self::Unset => &[Protocol::Grpc, Protocol::Connect],
            Self::Only(Protocol::Grpc) => &[Protocol::Grpc],
            Self::Only(Protocol::Connect) => &[Protocol::Connect],
        }
    }
}
