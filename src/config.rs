use std::time::Duration;

use bon::Builder;

use crate::protocol::ProtocolSelection;
use crate::transport::Route;

/// Configuration for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, Builder)]
pub struct BridgeConfig {
    /// Which handler protocols calls may be routed to. Fixed for the lifetime of the bridge.
    #[builder(default)]
    pub protocol: ProtocolSelection,

    /// Fully qualified service name (e.g., "bidi.StreamService").
    #[builder(default = "bidi.StreamService".to_string())]
    pub service: String,

    /// Bidirectional-streaming method on the service.
    #[builder(default = "BidiStreamCall".to_string())]
    pub method: String,

    /// Worker threads for the runtime built by the C boundary. Callbacks run on these.
    #[builder(default = 2)]
    pub worker_threads: usize,

    /// Timeout for establishing a call's session.
    #[builder(default = Duration::from_secs(10))]
    pub open_timeout: Duration,
}

impl BridgeConfig {
    /// The route every call started through this bridge takes.
    pub(crate) fn route(&self) -> Route {
        Route {
            service: self.service.clone(),
            method: self.method.clone(),
            protocol: self.protocol,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
