//! Gateway seam between a node and the authoritative peer.
//!
//! From the container's viewpoint a gateway is the link adapter
//! pointing at the authoritative node; the node's registry and
//! `connect` delegate non-authoritative ids here. Each adapter method
//! sends the corresponding peer verb and returns the reply.

use crate::error::Error;
use crate::proxy::{LocalProxy, RemoteProxy};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Peer-facing operations a gateway slot must provide.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Register a local device with the authoritative node. The local
    /// proxy is bound to the link so that the peer's operations reach
    /// it and its notifications reach the peer.
    async fn register(&self, deviceid: &str, proxy: Arc<LocalProxy>) -> Result<Value, Error>;

    /// Tear down a prior `register`.
    async fn deregister(&self, deviceid: &str) -> Result<Value, Error>;

    /// Obtain a remote proxy for a device the peer is authoritative
    /// for.
    async fn connect(&self, deviceid: &str) -> Result<Arc<RemoteProxy>, Error>;

    /// Release a proxy obtained from `connect`.
    async fn disconnect(&self, proxy: Arc<RemoteProxy>) -> Result<(), Error>;
}

/// Gateway slot backed by a peer link session.
pub struct LinkGateway {
    session: Session,
}

impl LinkGateway {
    /// Bind a session into a gateway slot.
    pub fn new(session: Session) -> Arc<Self> {
        Arc::new(Self { session })
    }
}

#[async_trait]
impl Gateway for LinkGateway {
    async fn register(&self, deviceid: &str, proxy: Arc<LocalProxy>) -> Result<Value, Error> {
        self.session.register_upstream(deviceid, proxy).await
    }

    async fn deregister(&self, deviceid: &str) -> Result<Value, Error> {
        self.session.deregister_upstream(deviceid).await
    }

    async fn connect(&self, deviceid: &str) -> Result<Arc<RemoteProxy>, Error> {
        self.session.connect_remote(deviceid).await
    }

    async fn disconnect(&self, proxy: Arc<RemoteProxy>) -> Result<(), Error> {
        self.session.disconnect_remote(proxy).await
    }
}
