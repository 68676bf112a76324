//! Caller-facing device proxies.
//!
//! A [`LocalProxy`] re-enters the owning node's dispatcher on every
//! call; a [`RemoteProxy`] ships every call over a peer link as a
//! protocol frame. [`Proxy`] unifies the two so `connect` callers
//! never need to distinguish the paths.

use crate::device::{Device, NotificationHub};
use crate::error::Error;
use crate::node::Node;
use crate::protocol::{ConnId, Verb};
use crate::request::Request;
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

fn emit_upstream(hub: &NotificationHub, req: &Request) {
    match req.method {
        Verb::Put => {
            let value = req.value.clone().unwrap_or(Value::Null);
            hub.put(&req.identifier, &value);
        }
        Verb::Notify => {
            let params = req.params.clone().unwrap_or_default();
            hub.notify(&req.identifier, &params);
        }
        _ => {}
    }
}

/// Proxy whose calls feed back into the local node's dispatcher.
///
/// Lives in the proxy registry of the authoritative node; its hub
/// receives the upstream notifications fanned out by the dispatcher.
pub struct LocalProxy {
    deviceid: String,
    node: Node,
    hub: NotificationHub,
}

impl LocalProxy {
    pub(crate) fn new(deviceid: String, node: Node) -> Arc<Self> {
        Arc::new(Self {
            deviceid,
            node,
            hub: NotificationHub::new(),
        })
    }

    /// Normalized id of the device this proxy fronts.
    pub fn deviceid(&self) -> &str {
        &self.deviceid
    }

    /// Observable channel carrying fanned-out `put`/`notify`
    /// notifications.
    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Emit an upstream notification on this proxy's hub.
    pub(crate) fn deliver(&self, req: &Request) {
        emit_upstream(&self.hub, req);
    }
}

#[async_trait]
impl Device for LocalProxy {
    async fn get(&self, property: &str) -> Result<Value, Error> {
        self.node
            .dispatch(Request::get(&self.deviceid, property))
            .await
    }

    async fn set(&self, property: &str, value: Value) -> Result<Value, Error> {
        self.node
            .dispatch(Request::set(&self.deviceid, property, value))
            .await
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value, Error> {
        self.node
            .dispatch(Request::invoke(&self.deviceid, method, params))
            .await
    }

    async fn subscribe(&self, event: &str) -> Result<Value, Error> {
        self.node
            .dispatch(Request::subscribe(&self.deviceid, event))
            .await
    }

    async fn describe(&self, property: &str) -> Result<Value, Error> {
        self.node
            .dispatch(Request::describe(&self.deviceid, property))
            .await
    }

    async fn configure(&self, property: &str, value: Value) -> Result<Value, Error> {
        self.node
            .dispatch(Request::config(&self.deviceid, property, value))
            .await
    }

    fn notifications(&self) -> Option<&NotificationHub> {
        Some(&self.hub)
    }
}

impl fmt::Debug for LocalProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProxy")
            .field("deviceid", &self.deviceid)
            .finish()
    }
}

/// Proxy whose calls cross a peer link as protocol frames.
///
/// Created either when a peer REGISTERs a device with us (we become
/// the device's registry entry) or when our `connect` resolves to a
/// gateway (we become the caller's handle).
pub struct RemoteProxy {
    deviceid: String,
    connid: ConnId,
    session: Session,
    hub: NotificationHub,
}

impl RemoteProxy {
    pub(crate) fn new(deviceid: String, connid: ConnId, session: Session) -> Arc<Self> {
        Arc::new(Self {
            deviceid,
            connid,
            session,
            hub: NotificationHub::new(),
        })
    }

    /// Normalized id of the device this proxy fronts.
    pub fn deviceid(&self) -> &str {
        &self.deviceid
    }

    /// Link-scoped binding token for this proxy.
    pub fn connid(&self) -> &ConnId {
        &self.connid
    }

    /// Observable channel carrying the peer's PUT/NOTIFY frames.
    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Emit an upstream notification on this proxy's hub.
    pub(crate) fn deliver(&self, req: &Request) {
        emit_upstream(&self.hub, req);
    }

    async fn operation(
        &self,
        method: Verb,
        identifier: &str,
        value: Option<Value>,
    ) -> Result<Value, Error> {
        self.session
            .operation(method, &self.deviceid, &self.connid, identifier, value)
            .await
    }
}

#[async_trait]
impl Device for RemoteProxy {
    async fn get(&self, property: &str) -> Result<Value, Error> {
        self.operation(Verb::Get, property, None).await
    }

    async fn set(&self, property: &str, value: Value) -> Result<Value, Error> {
        self.operation(Verb::Set, property, Some(value)).await
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value, Error> {
        self.operation(Verb::Invoke, method, Some(params)).await
    }

    async fn subscribe(&self, event: &str) -> Result<Value, Error> {
        self.operation(Verb::Subscribe, event, None).await
    }

    async fn describe(&self, property: &str) -> Result<Value, Error> {
        self.operation(Verb::Describe, property, None).await
    }

    async fn configure(&self, property: &str, value: Value) -> Result<Value, Error> {
        self.operation(Verb::Config, property, Some(value)).await
    }

    fn notifications(&self) -> Option<&NotificationHub> {
        Some(&self.hub)
    }
}

impl fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("deviceid", &self.deviceid)
            .field("connid", &self.connid)
            .finish()
    }
}

/// A connected device handle, local or remote.
#[derive(Clone)]
pub enum Proxy {
    Local(Arc<LocalProxy>),
    Remote(Arc<RemoteProxy>),
}

impl Proxy {
    /// Normalized id of the device this proxy fronts.
    pub fn deviceid(&self) -> &str {
        match self {
            Proxy::Local(p) => p.deviceid(),
            Proxy::Remote(p) => p.deviceid(),
        }
    }

    /// Observable channel for upstream notifications.
    pub fn hub(&self) -> &NotificationHub {
        match self {
            Proxy::Local(p) => p.hub(),
            Proxy::Remote(p) => p.hub(),
        }
    }

    /// Emit an upstream notification on this proxy's hub.
    pub(crate) fn deliver(&self, req: &Request) {
        match self {
            Proxy::Local(p) => p.deliver(req),
            Proxy::Remote(p) => p.deliver(req),
        }
    }
}

#[async_trait]
impl Device for Proxy {
    async fn get(&self, property: &str) -> Result<Value, Error> {
        match self {
            Proxy::Local(p) => p.get(property).await,
            Proxy::Remote(p) => p.get(property).await,
        }
    }

    async fn set(&self, property: &str, value: Value) -> Result<Value, Error> {
        match self {
            Proxy::Local(p) => p.set(property, value).await,
            Proxy::Remote(p) => p.set(property, value).await,
        }
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value, Error> {
        match self {
            Proxy::Local(p) => p.invoke(method, params).await,
            Proxy::Remote(p) => p.invoke(method, params).await,
        }
    }

    async fn subscribe(&self, event: &str) -> Result<Value, Error> {
        match self {
            Proxy::Local(p) => p.subscribe(event).await,
            Proxy::Remote(p) => p.subscribe(event).await,
        }
    }

    async fn describe(&self, property: &str) -> Result<Value, Error> {
        match self {
            Proxy::Local(p) => p.describe(property).await,
            Proxy::Remote(p) => p.describe(property).await,
        }
    }

    async fn configure(&self, property: &str, value: Value) -> Result<Value, Error> {
        match self {
            Proxy::Local(p) => p.configure(property, value).await,
            Proxy::Remote(p) => p.configure(property, value).await,
        }
    }

    fn notifications(&self) -> Option<&NotificationHub> {
        Some(self.hub())
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proxy::Local(p) => p.fmt(f),
            Proxy::Remote(p) => p.fmt(f),
        }
    }
}
