//! Peer link sessions.
//!
//! One session owns one peer connection: it encodes and decodes wire
//! frames, multiplexes in-flight requests by `reqid`, tracks the
//! device registrations and connections made through the link, and
//! implements the four-verb peer protocol on top of the device
//! operation verbs.
//!
//! The reader task decodes frames in arrival order. RESPONSE frames
//! resolve their pending entry inline; every other verb is handled on
//! its own task, so a request chain that re-enters the same link (a
//! container calling a device it registered upstream) cannot wedge
//! the reader.

mod handlers;

use crate::device::ListenerId;
use crate::error::Error;
use crate::gateway::LinkGateway;
use crate::node::Node;
use crate::protocol::{ConnId, Frame, PeerReply, ReqId, Verb};
use crate::proxy::{LocalProxy, Proxy, RemoteProxy};
use crate::transport::{FrameRx, FrameSink, LinkFrame, LinkHandle};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How a session participates in the node's routing.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Register this session as the node's gateway at open.
    pub gateway: bool,
    /// Domain the gateway slot covers; `*` matches any domain.
    pub domain: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gateway: false,
            domain: crate::authority::WILDCARD_DOMAIN.to_string(),
        }
    }
}

impl SessionConfig {
    /// Configuration for a gateway-mode session covering `domain`.
    pub fn gateway(domain: &str) -> Self {
        Self {
            gateway: true,
            domain: domain.to_lowercase(),
        }
    }
}

/// A local device endpoint bound to a `connid`.
///
/// Holds the proxy the peer addresses through the token plus the two
/// hub listeners that translate its notifications into outgoing
/// PUT/NOTIFY frames.
struct BoundDevice {
    deviceid: String,
    proxy: Proxy,
    put_listener: Option<ListenerId>,
    notify_listener: Option<ListenerId>,
}

struct SessionState {
    /// Local device endpoints the peer has connected or registered.
    devices_by_connid: HashMap<ConnId, BoundDevice>,
    /// Remote proxies created for the peer's REGISTERs (we are
    /// authoritative for these ids).
    proxies_by_deviceid: HashMap<String, Arc<RemoteProxy>>,
    /// Remote proxies handed to local `connect` callers (the peer is
    /// authoritative for these ids).
    proxy_connections: HashMap<String, Arc<RemoteProxy>>,
    /// deviceid → connid for REGISTERs we sent upstream.
    registrations: HashMap<String, ConnId>,
    /// In-flight outgoing requests awaiting a RESPONSE.
    pending: HashMap<ReqId, oneshot::Sender<Result<PeerReply, Error>>>,
    next_reqid: u64,
    next_connid: u64,
    closed: bool,
}

struct SessionInner {
    node: Node,
    sink: Arc<dyn FrameSink>,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

/// One peer link session.
///
/// Cheap to clone; all clones share the link state. Created with
/// [`Session::open`], which also spawns the reader task.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open a session over a link and spawn its reader task.
    ///
    /// In gateway mode the session claims the node's gateway slot for
    /// its domain first; a taken slot fails the open.
    pub fn open(node: Node, link: LinkHandle, config: SessionConfig) -> Result<Session, Error> {
        let LinkHandle { sink, rx } = link;
        let session = Session {
            inner: Arc::new(SessionInner {
                node: node.clone(),
                sink,
                config: config.clone(),
                state: Mutex::new(SessionState {
                    devices_by_connid: HashMap::new(),
                    proxies_by_deviceid: HashMap::new(),
                    proxy_connections: HashMap::new(),
                    registrations: HashMap::new(),
                    pending: HashMap::new(),
                    next_reqid: 1,
                    next_connid: 1,
                    closed: false,
                }),
            }),
        };

        if config.gateway {
            node.register_gateway(&config.domain, LinkGateway::new(session.clone()))?;
        }

        let reader = session.clone();
        tokio::spawn(reader.run_reader(rx));
        info!(gateway = config.gateway, domain = %config.domain, "session opened");
        Ok(session)
    }

    /// The node this session serves.
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    /// Whether teardown has run.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Number of in-flight outgoing requests.
    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Close the session, releasing everything it owns.
    pub async fn close(&self) {
        self.teardown().await;
    }

    // === Reader ===

    async fn run_reader(self, mut rx: FrameRx) {
        while let Some(message) = rx.recv().await {
            match message {
                LinkFrame::Text(text) => self.handle_text(&text),
                LinkFrame::Binary(bytes) => {
                    // Text-only protocol; the frame is rejected, the
                    // session stays open.
                    warn!(len = bytes.len(), "binary frame rejected");
                }
            }
        }
        debug!("link closed");
        self.teardown().await;
    }

    fn handle_text(&self, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping invalid frame");
                return;
            }
        };

        if frame.method == Verb::Response {
            self.resolve_pending(frame);
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            session.handle_request(frame).await;
        });
    }

    fn resolve_pending(&self, frame: Frame) {
        let sender = self.lock_state().pending.remove(&frame.reqid);
        let Some(sender) = sender else {
            debug!(reqid = %frame.reqid, "response for unknown reqid");
            return;
        };

        let outcome = if frame.success.unwrap_or(false) {
            Ok(PeerReply {
                res: frame.res.unwrap_or(Value::Null),
                connid: frame.connid,
            })
        } else {
            Err(Error::Remote(
                frame.err.unwrap_or_else(|| "request failed".to_string()),
            ))
        };
        let _ = sender.send(outcome);
    }

    // === Outgoing Requests ===

    /// Send a request frame and await its RESPONSE.
    ///
    /// A synchronous send failure removes the pending entry and fails
    /// immediately.
    pub(crate) async fn request(&self, mut frame: Frame) -> Result<PeerReply, Error> {
        let (reqid, rx) = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(Error::SessionClosed);
            }
            let reqid = ReqId::Num(state.next_reqid);
            state.next_reqid += 1;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(reqid.clone(), tx);
            (reqid, rx)
        };

        frame.reqid = reqid.clone();
        let text = frame.encode()?;
        if let Err(e) = self.inner.sink.send(text).await {
            self.lock_state().pending.remove(&reqid);
            return Err(e.into());
        }

        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Downstream device operation over the link (proxy side).
    pub(crate) async fn operation(
        &self,
        method: Verb,
        deviceid: &str,
        connid: &ConnId,
        identifier: &str,
        value: Option<Value>,
    ) -> Result<Value, Error> {
        let mut frame = Frame::new(method, ReqId::Num(0));
        frame.deviceid = Some(deviceid.to_string());
        frame.connid = Some(connid.clone());
        frame.identifier = Some(identifier.to_string());
        frame.value = value;
        Ok(self.request(frame).await?.res)
    }

    // === Peer Verbs (sending side) ===

    /// REGISTER a local device with the authoritative peer.
    ///
    /// Binds the proxy to a fresh `connid` first so the peer can
    /// address operations at it, then sends the frame; a failed
    /// exchange releases the binding.
    pub(crate) async fn register_upstream(
        &self,
        deviceid: &str,
        proxy: Arc<LocalProxy>,
    ) -> Result<Value, Error> {
        let connid = self.bind_local_device(deviceid, Proxy::Local(proxy));

        let mut frame = Frame::new(Verb::Register, ReqId::Num(0));
        frame.deviceid = Some(deviceid.to_string());
        frame.connid = Some(connid.clone());

        match self.request(frame).await {
            Ok(reply) => {
                self.lock_state()
                    .registrations
                    .insert(deviceid.to_string(), connid);
                Ok(reply.res)
            }
            Err(e) => {
                self.unbind(&connid);
                Err(e)
            }
        }
    }

    /// DEREGISTER a prior upstream registration.
    ///
    /// The connid binding stays live while the exchange is in flight;
    /// it is released only once the peer acknowledges, so a failed
    /// exchange leaves the registration intact on both sides.
    pub(crate) async fn deregister_upstream(&self, deviceid: &str) -> Result<Value, Error> {
        let mut frame = Frame::new(Verb::Deregister, ReqId::Num(0));
        frame.deviceid = Some(deviceid.to_string());

        let reply = self.request(frame).await?;

        let connid = self.lock_state().registrations.remove(deviceid);
        if let Some(connid) = connid {
            self.unbind(&connid);
        }
        Ok(reply.res)
    }

    /// CONNECT to a device the peer is authoritative for.
    pub(crate) async fn connect_remote(&self, deviceid: &str) -> Result<Arc<RemoteProxy>, Error> {
        let mut frame = Frame::new(Verb::Connect, ReqId::Num(0));
        frame.deviceid = Some(deviceid.to_string());

        let reply = self.request(frame).await?;
        let connid = match reply.connid {
            Some(connid) => connid,
            None => match reply.res {
                Value::String(raw) => ConnId::new(raw),
                _ => return Err(crate::protocol::ProtocolError::MissingField("connid").into()),
            },
        };

        let proxy = RemoteProxy::new(deviceid.to_string(), connid, self.clone());
        self.lock_state()
            .proxy_connections
            .insert(deviceid.to_string(), proxy.clone());
        Ok(proxy)
    }

    /// DISCONNECT a proxy obtained from [`connect_remote`].
    pub(crate) async fn disconnect_remote(&self, proxy: Arc<RemoteProxy>) -> Result<(), Error> {
        {
            let mut state = self.lock_state();
            let matches = state
                .proxy_connections
                .get(proxy.deviceid())
                .is_some_and(|p| Arc::ptr_eq(p, &proxy));
            if matches {
                state.proxy_connections.remove(proxy.deviceid());
            }
        }

        let mut frame = Frame::new(Verb::Disconnect, ReqId::Num(0));
        frame.deviceid = Some(proxy.deviceid().to_string());
        frame.connid = Some(proxy.connid().clone());
        self.request(frame).await?;
        Ok(())
    }

    // === Connid Bindings ===

    /// Bind a local device endpoint to a fresh `connid`, attaching
    /// listeners that translate its notifications into outgoing
    /// PUT/NOTIFY frames (fire-and-forget; send failures are logged).
    pub(crate) fn bind_local_device(&self, deviceid: &str, proxy: Proxy) -> ConnId {
        let connid = {
            let mut state = self.lock_state();
            let connid = ConnId::mint(state.next_connid);
            state.next_connid += 1;
            connid
        };

        let hub = proxy.hub();

        let session = self.clone();
        let id = deviceid.to_string();
        let conn = connid.clone();
        let put_listener = hub.on_put(Arc::new(move |metric, value| {
            let mut frame = Frame::new(Verb::Put, ReqId::Num(0));
            frame.deviceid = Some(id.clone());
            frame.connid = Some(conn.clone());
            frame.identifier = Some(metric.to_string());
            frame.value = Some(value.clone());
            session.send_notification(frame);
        }));

        let session = self.clone();
        let id = deviceid.to_string();
        let conn = connid.clone();
        let notify_listener = hub.on_notify(Arc::new(move |event, params| {
            let mut frame = Frame::new(Verb::Notify, ReqId::Num(0));
            frame.deviceid = Some(id.clone());
            frame.connid = Some(conn.clone());
            frame.identifier = Some(event.to_string());
            frame.params = Some(params.to_vec());
            session.send_notification(frame);
        }));

        self.lock_state().devices_by_connid.insert(
            connid.clone(),
            BoundDevice {
                deviceid: deviceid.to_string(),
                proxy,
                put_listener: Some(put_listener),
                notify_listener: Some(notify_listener),
            },
        );
        debug!(deviceid = %deviceid, connid = %connid, "local device bound");
        connid
    }

    /// Release a `connid` binding, detaching its listeners.
    pub(crate) fn unbind(&self, connid: &ConnId) -> Option<Proxy> {
        let bound = self.lock_state().devices_by_connid.remove(connid)?;
        detach_bound_listeners(&bound);
        debug!(deviceid = %bound.deviceid, connid = %connid, "local device unbound");
        Some(bound.proxy)
    }

    fn send_notification(&self, frame: Frame) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.request(frame).await {
                debug!(error = %e, "upstream notification send failed");
            }
        });
    }

    // === Teardown ===

    /// Release everything this session owns: deregister every device
    /// the peer registered, free the gateway slot, fail all pending
    /// requests, unbind all connids. Idempotent.
    async fn teardown(&self) {
        let (registered, bound, pending) = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;

            let registered: Vec<String> = state.proxies_by_deviceid.drain().map(|(id, _)| id).collect();
            let bound: Vec<BoundDevice> =
                state.devices_by_connid.drain().map(|(_, b)| b).collect();
            let pending: Vec<_> = state.pending.drain().map(|(_, tx)| tx).collect();
            state.proxy_connections.clear();
            state.registrations.clear();
            (registered, bound, pending)
        };

        for deviceid in registered {
            if let Err(e) = self.inner.node.deregister(&deviceid).await {
                warn!(deviceid = %deviceid, error = %e, "teardown deregister failed");
            }
        }

        if self.inner.config.gateway {
            if let Err(e) = self.inner.node.deregister_gateway(&self.inner.config.domain) {
                debug!(error = %e, "gateway slot already released");
            }
        }

        for sender in pending {
            let _ = sender.send(Err(Error::SessionClosed));
        }

        for device in bound {
            detach_bound_listeners(&device);
            if let Err(e) = self.inner.node.disconnect(&device.proxy).await {
                debug!(deviceid = %device.deviceid, error = %e, "teardown disconnect failed");
            }
        }

        info!("session closed");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.inner.state.lock().expect("session state poisoned")
    }

    // === Response Helpers ===

    pub(crate) async fn respond_ok(&self, reqid: ReqId, res: Value) {
        self.send_response(Frame::response_ok(reqid, res)).await;
    }

    pub(crate) async fn respond_connected(&self, reqid: ReqId, connid: ConnId) {
        let mut frame = Frame::response_ok(reqid, Value::String(connid.as_str().to_string()));
        frame.connid = Some(connid);
        self.send_response(frame).await;
    }

    pub(crate) async fn respond_err(&self, reqid: ReqId, err: String) {
        self.send_response(Frame::response_err(reqid, err)).await;
    }

    async fn send_response(&self, frame: Frame) {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "response frame encode failed");
                return;
            }
        };
        if let Err(e) = self.inner.sink.send(text).await {
            debug!(error = %e, "response send failed");
        }
    }

    pub(crate) fn lookup_bound(&self, connid: &ConnId) -> Option<Proxy> {
        self.lock_state()
            .devices_by_connid
            .get(connid)
            .map(|b| b.proxy.clone())
    }

    pub(crate) fn upstream_targets(&self, deviceid: &str) -> Vec<Arc<RemoteProxy>> {
        let state = self.lock_state();
        state
            .proxies_by_deviceid
            .get(deviceid)
            .into_iter()
            .chain(state.proxy_connections.get(deviceid))
            .cloned()
            .collect()
    }

    pub(crate) fn has_registered_proxy(&self, deviceid: &str) -> bool {
        self.lock_state().proxies_by_deviceid.contains_key(deviceid)
    }

    pub(crate) fn record_registered_proxy(&self, deviceid: String, proxy: Arc<RemoteProxy>) {
        self.lock_state().proxies_by_deviceid.insert(deviceid, proxy);
    }

    pub(crate) fn take_registered_proxy(&self, deviceid: &str) -> Option<Arc<RemoteProxy>> {
        self.lock_state().proxies_by_deviceid.remove(deviceid)
    }
}

fn detach_bound_listeners(device: &BoundDevice) {
    let hub = device.proxy.hub();
    if let Some(id) = device.put_listener {
        hub.detach(id);
    }
    if let Some(id) = device.notify_listener {
        hub.detach(id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Session")
            .field("gateway", &self.inner.config.gateway)
            .field("domain", &self.inner.config.domain)
            .field("bound", &state.devices_by_connid.len())
            .field("registered", &state.proxies_by_deviceid.len())
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}
