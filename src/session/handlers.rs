//! Incoming frame handlers.
//!
//! Every handler replies exactly once per frame. Failures travel back
//! as RESPONSE frames carrying the error's message text.

use super::Session;
use crate::device::Device;
use crate::error::Error;
use crate::protocol::{Frame, ProtocolError, Verb};
use crate::proxy::RemoteProxy;
use crate::request::Request;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

impl Session {
    /// Handle one non-RESPONSE frame. Runs on its own task.
    pub(crate) async fn handle_request(&self, frame: Frame) {
        debug!(method = %frame.method, reqid = %frame.reqid, "frame received");
        match frame.method {
            Verb::Register => self.handle_register(frame).await,
            Verb::Deregister => self.handle_deregister(frame).await,
            Verb::Connect => self.handle_connect(frame).await,
            Verb::Disconnect => self.handle_disconnect(frame).await,
            Verb::Put | Verb::Notify => self.handle_upstream(frame).await,
            Verb::Get
            | Verb::Set
            | Verb::Invoke
            | Verb::Subscribe
            | Verb::Describe
            | Verb::Config => self.handle_operation(frame).await,
            // RESPONSE is resolved inline by the reader.
            Verb::Response => {}
        }
    }

    /// REGISTER: the peer offers a device it hosts; we become its
    /// registry entry through a remote proxy bound to the frame's
    /// connid.
    async fn handle_register(&self, frame: Frame) {
        let reqid = frame.reqid.clone();
        let (deviceid, connid) = match require_register_fields(&frame) {
            Ok(fields) => fields,
            Err(e) => return self.respond_err(reqid, e.to_string()).await,
        };

        if self.has_registered_proxy(&deviceid) {
            let err = Error::AlreadyRegistered(deviceid);
            return self.respond_err(reqid, err.wire_message()).await;
        }

        let proxy = RemoteProxy::new(deviceid.clone(), connid, self.clone());
        match self
            .node()
            .register(&deviceid, proxy.clone() as Arc<dyn Device>)
            .await
        {
            Ok(normalized) => {
                self.record_registered_proxy(normalized.clone(), proxy);
                self.respond_ok(reqid, Value::String(normalized)).await;
            }
            Err(e) => self.respond_err(reqid, e.wire_message()).await,
        }
    }

    /// DEREGISTER: tear down a prior REGISTER from this peer.
    async fn handle_deregister(&self, frame: Frame) {
        let reqid = frame.reqid.clone();
        let deviceid = match frame.require_deviceid() {
            Ok(deviceid) => deviceid.to_string(),
            Err(e) => return self.respond_err(reqid, e.to_string()).await,
        };

        if self.take_registered_proxy(&deviceid).is_none() {
            let err = Error::UnknownDevice(deviceid);
            return self.respond_err(reqid, err.wire_message()).await;
        }

        match self.node().deregister(&deviceid).await {
            Ok(_) => self.respond_ok(reqid, Value::Bool(true)).await,
            Err(e) => self.respond_err(reqid, e.wire_message()).await,
        }
    }

    /// CONNECT: hand the peer a connid addressing a device this node
    /// can reach.
    async fn handle_connect(&self, frame: Frame) {
        let reqid = frame.reqid.clone();
        let deviceid = match frame.require_deviceid() {
            Ok(deviceid) => deviceid.to_string(),
            Err(e) => return self.respond_err(reqid, e.to_string()).await,
        };

        match self.node().connect(&deviceid).await {
            Ok(proxy) => {
                let connid = self.bind_local_device(proxy.deviceid(), proxy.clone());
                self.respond_connected(reqid, connid).await;
            }
            Err(e) => self.respond_err(reqid, e.wire_message()).await,
        }
    }

    /// DISCONNECT: release a CONNECT binding.
    async fn handle_disconnect(&self, frame: Frame) {
        let reqid = frame.reqid.clone();
        let connid = match frame.require_connid() {
            Ok(connid) => connid.clone(),
            Err(e) => return self.respond_err(reqid, e.to_string()).await,
        };

        match self.unbind(&connid) {
            None => {
                let err = Error::UnknownConnection(connid);
                self.respond_err(reqid, err.wire_message()).await;
            }
            Some(proxy) => {
                if let Err(e) = self.node().disconnect(&proxy).await {
                    debug!(error = %e, "disconnect cleanup failed");
                }
                self.respond_ok(reqid, Value::Bool(true)).await;
            }
        }
    }

    /// Downstream device operation addressed by connid.
    async fn handle_operation(&self, frame: Frame) {
        let reqid = frame.reqid.clone();
        let (connid, identifier) = match require_operation_fields(&frame) {
            Ok(fields) => fields,
            Err(e) => return self.respond_err(reqid, e.to_string()).await,
        };

        let Some(proxy) = self.lookup_bound(&connid) else {
            let err = Error::UnknownConnection(connid);
            return self.respond_err(reqid, err.wire_message()).await;
        };

        let value = frame.value.clone().unwrap_or(Value::Null);
        let result = match frame.method {
            Verb::Get => proxy.get(&identifier).await,
            Verb::Set => proxy.set(&identifier, value).await,
            Verb::Invoke => proxy.invoke(&identifier, value).await,
            Verb::Subscribe => proxy.subscribe(&identifier).await,
            Verb::Describe => proxy.describe(&identifier).await,
            Verb::Config => proxy.configure(&identifier, value).await,
            _ => Err(Error::Unsupported("operation")),
        };

        match result {
            Ok(res) => self.respond_ok(reqid, res).await,
            Err(e) => self.respond_err(reqid, e.wire_message()).await,
        }
    }

    /// Upstream PUT/NOTIFY addressed by deviceid. Reaches both the
    /// proxies registered by this peer (we fan out through our own
    /// pipeline) and the proxies our callers connected. Replies
    /// success once, without waiting for subscribers.
    async fn handle_upstream(&self, frame: Frame) {
        let reqid = frame.reqid.clone();
        let (deviceid, identifier) = match require_upstream_fields(&frame) {
            Ok(fields) => fields,
            Err(e) => return self.respond_err(reqid, e.to_string()).await,
        };

        let req = match frame.method {
            Verb::Put => Request::put(
                &deviceid,
                &identifier,
                frame.value.clone().unwrap_or(Value::Null),
            ),
            _ => Request::notify(&deviceid, &identifier, notify_params(&frame)),
        };

        for proxy in self.upstream_targets(&deviceid) {
            if catch_unwind(AssertUnwindSafe(|| proxy.deliver(&req))).is_err() {
                warn!(deviceid = %deviceid, "upstream subscriber panicked");
            }
        }

        self.respond_ok(reqid, Value::Bool(true)).await;
    }
}

fn require_register_fields(frame: &Frame) -> Result<(String, crate::protocol::ConnId), ProtocolError> {
    let deviceid = frame.require_deviceid()?.to_string();
    let connid = frame.require_connid()?.clone();
    Ok((deviceid, connid))
}

fn require_operation_fields(
    frame: &Frame,
) -> Result<(crate::protocol::ConnId, String), ProtocolError> {
    let connid = frame.require_connid()?.clone();
    let identifier = frame.require_identifier()?.to_string();
    Ok((connid, identifier))
}

fn require_upstream_fields(frame: &Frame) -> Result<(String, String), ProtocolError> {
    let deviceid = frame.require_deviceid()?.to_string();
    let identifier = frame.require_identifier()?.to_string();
    Ok((deviceid, identifier))
}

/// NOTIFY argument list: `params` as sent, or `value` wrapped in a
/// one-element list when it is not already one.
fn notify_params(frame: &Frame) -> Vec<Value> {
    if let Some(params) = &frame.params {
        return params.clone();
    }
    match &frame.value {
        Some(Value::Array(items)) => items.clone(),
        Some(value) => vec![value.clone()],
        None => Vec::new(),
    }
}
