//! # bidi-bridge
//!
//! A call bridge that lets native (C ABI) code drive bidirectional-streaming RPC calls hosted by
//! a Rust RPC client.
//!
//! Each call is named by an opaque [`CallHandle`]. The caller issues sends and a single
//! close-send synchronously; responses and exactly one terminal completion are delivered
//! asynchronously through callbacks running on bridge-owned runtime threads.
//!
//! ## Rust usage
//!
//! ```ignore
//! use bidi_bridge::{Bridge, BridgeConfig, Variant};
//! use bidi_bridge::transport::{EchoService, HandlerRegistry, LocalTransport};
//! use bidi_bridge::protocol::Protocol;
//!
//! let handlers = Arc::new(HandlerRegistry::new());
//! handlers.register(Protocol::Grpc, "bidi.StreamService", EchoService)?;
//!
//! let bridge = Bridge::new(
//!     BridgeConfig::builder().build(),
//!     Arc::new(LocalTransport::new(handlers)),
//!     tokio::runtime::Handle::current(),
//! );
//!
//! let handle = bridge.start(Variant::Native, observer).await?;
//! bridge.send_native(handle, b"X", 0)?;
//! bridge.close_send(handle)?;
//! ```
//!
//! ## C usage
//!
//! See [`ffi`] for the exported entry points. A native caller initializes the bridge once with
//! `bidi_bridge_init`, then uses `bidi_stream_start` / `bidi_stream_send` /
//! `bidi_stream_close_send` and releases every delivered buffer with the release function
//! handed to its read callback.

pub mod bridge;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod protocol;
pub mod registry;
pub mod state_machine;
pub mod transport;

pub use bridge::Bridge;
pub use buffer::OwnedBuffer;
pub use codec::Variant;
pub use config::BridgeConfig;
pub use dispatch::CallObserver;
pub use error::{BridgeError, ErrorCode};
pub use handle::CallHandle;
