//! FDMS: Federated Device Messaging Substrate
//!
//! A routing and proxying engine that lets application code call
//! operations on, and receive notifications from, devices regardless
//! of whether each device is attached to the local node or to a
//! remote node reachable over a bidirectional message link. Nodes are
//! peer-capable: for any device id exactly one node in a federation
//! is authoritative, and every request for that id passes through the
//! authoritative node's middleware pipeline before reaching the
//! device implementation.

pub mod authority;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod node;
pub mod protocol;
pub mod proxy;
pub mod request;
pub mod session;
pub mod transport;

// Re-export authority types
pub use authority::{normalize, Authority, WILDCARD_DOMAIN};

// Re-export config types
pub use config::{ConfigError, NodeConfig, DEFAULT_DOMAIN};

// Re-export device types
pub use device::{Device, ListenerId, NotificationHub, NotifyListener, PutListener};

// Re-export the error type
pub use error::Error;

// Re-export gateway types
pub use gateway::{Gateway, LinkGateway};

// Re-export node types
pub use node::{Layer, LayerFuture, LayerOutcome, Next, Node};

// Re-export protocol types
pub use protocol::{ConnId, Frame, PeerReply, ProtocolError, ReqId, Verb};

// Re-export proxy types
pub use proxy::{LocalProxy, Proxy, RemoteProxy};

// Re-export the request type
pub use request::Request;

// Re-export session types
pub use session::{Session, SessionConfig};

// Re-export transport types
pub use transport::{
    frame_channel, memory_pair, ChannelSink, FrameRx, FrameSink, FrameTx, LinkFrame, LinkHandle,
    TransportError,
};
