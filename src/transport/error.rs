use crate::protocol::ProtocolSelection;

/// Indicates that no handler is registered for a service under any allowed protocol.
#[derive(Debug, thiserror::Error)]
#[error("no handler registered for service '{service}' ({protocol:?})")]
pub struct ServiceNotRegistered {
    pub service: String,
    pub protocol: ProtocolSelection,
}

/// Indicates that a handler registration was attempted with an empty service name.
#[derive(Debug, thiserror::Error)]
#[error("service name cannot be empty")]
pub struct EmptyServiceName;
