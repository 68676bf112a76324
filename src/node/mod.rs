//! Node engine.
//!
//! A node is the unit of deployment: it owns the device registry, the
//! proxy registry, the gateway table, and the middleware pipeline.
//! For any device id exactly one node in a federation is
//! authoritative; all requests for that id pass through its pipeline
//! before reaching the device implementation.

mod dispatch;
mod registry;
#[cfg(test)]
pub(crate) mod tests;

pub use dispatch::{Layer, LayerFuture, LayerOutcome, Next};

use crate::authority::{self, Authority, WILDCARD_DOMAIN};
use crate::config::NodeConfig;
use crate::device::{Device, ListenerId};
use crate::error::Error;
use crate::gateway::Gateway;
use crate::proxy::{LocalProxy, Proxy};
use crate::request::Request;
use registry::{DeviceEntry, DeviceRegistry, ProxyRegistry};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

struct NodeInner {
    config: NodeConfig,
    devices: Mutex<DeviceRegistry>,
    proxies: Mutex<ProxyRegistry>,
    gateways: Mutex<HashMap<String, Arc<dyn Gateway>>>,
    layers: Mutex<Vec<Layer>>,
}

/// A running node instance.
///
/// Cheap to clone; all clones share the same registries. Registry
/// mutexes are never held across suspension points, so any session
/// reader task may read or write them.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node from configuration.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                config,
                devices: Mutex::new(DeviceRegistry::new()),
                proxies: Mutex::new(ProxyRegistry::new()),
                gateways: Mutex::new(HashMap::new()),
                layers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a node with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(NodeConfig::default())
    }

    /// Get the configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    // === Authority Resolution ===

    /// Decide where requests for a raw device id must go.
    ///
    /// Empty-domain ids are always local and non-routable. Otherwise
    /// the domain is looked up in the gateway table, falling back to
    /// the `*` wildcard entry; with no gateway and `claim_unowned`
    /// set, this node is authoritative.
    pub fn resolve(&self, raw: &str) -> Result<Authority, Error> {
        let (deviceid, domain) = authority::normalize(raw, &self.inner.config.default_domain)?;
        if domain.is_empty() {
            return Ok(Authority::local_unrouted(deviceid));
        }

        let gateway = {
            let gateways = self.inner.gateways.lock().expect("gateway table poisoned");
            gateways
                .get(&domain)
                .or_else(|| gateways.get(WILDCARD_DOMAIN))
                .cloned()
        };

        match gateway {
            Some(gateway) => Ok(Authority::routed(deviceid, domain, Some(gateway))),
            None if self.inner.config.claim_unowned => Ok(Authority::claimed(deviceid, domain)),
            None => Ok(Authority::routed(deviceid, domain, None)),
        }
    }

    // === Device Registry ===

    /// Register a device implementation under a device id.
    ///
    /// Rejects duplicates. Devices exposing a notification hub get
    /// `put`/`notify` listeners attached that feed synthesized
    /// requests into the dispatcher (emissions must happen inside the
    /// tokio runtime). On a non-authoritative id the registration is
    /// additionally forwarded through the gateway, with a local proxy
    /// attached for the upstream binding; a forward failure rolls the
    /// whole registration back.
    pub async fn register(&self, raw: &str, device: Arc<dyn Device>) -> Result<String, Error> {
        let auth = self.resolve(raw)?;
        let deviceid = auth.deviceid.clone();

        {
            let mut devices = self.inner.devices.lock().expect("device registry poisoned");
            if devices.has(&deviceid) {
                return Err(Error::AlreadyRegistered(deviceid));
            }
            devices.insert(deviceid.clone(), DeviceEntry::new(device.clone()));
        }

        let (put_listener, notify_listener) = self.attach_upstream_listeners(&deviceid, &device);
        {
            let mut devices = self.inner.devices.lock().expect("device registry poisoned");
            devices.set_listeners(&deviceid, put_listener, notify_listener);
        }

        if !auth.is_authoritative {
            let Some(gateway) = auth.gateway.clone() else {
                self.remove_device_entry(&deviceid);
                return Err(Error::NoGateway(auth.domain.clone()));
            };

            let proxy = LocalProxy::new(deviceid.clone(), self.clone());
            {
                let mut proxies = self.inner.proxies.lock().expect("proxy registry poisoned");
                proxies.attach(&deviceid, proxy.clone());
            }

            if let Err(e) = gateway.register(&deviceid, proxy.clone()).await {
                let mut proxies = self.inner.proxies.lock().expect("proxy registry poisoned");
                proxies.detach(&deviceid, &proxy);
                drop(proxies);
                self.remove_device_entry(&deviceid);
                return Err(e);
            }
            info!(deviceid = %deviceid, domain = %auth.domain, "device registered via gateway");
        } else {
            info!(deviceid = %deviceid, "device registered");
        }

        Ok(deviceid)
    }

    /// Remove a device registration.
    ///
    /// Rejects unknown ids without mutating state. Detaches the
    /// listeners attached at register time; on the non-authoritative
    /// path also drops the proxy-registry entry and forwards the
    /// deregistration through the gateway.
    pub async fn deregister(&self, raw: &str) -> Result<Arc<dyn Device>, Error> {
        let auth = self.resolve(raw)?;
        let deviceid = auth.deviceid.clone();

        let entry = {
            let mut devices = self.inner.devices.lock().expect("device registry poisoned");
            devices
                .remove(&deviceid)
                .ok_or_else(|| Error::NotRegistered(deviceid.clone()))?
        };

        detach_listeners(&entry);

        if !auth.is_authoritative {
            {
                let mut proxies = self.inner.proxies.lock().expect("proxy registry poisoned");
                proxies.remove_all(&deviceid);
            }
            if let Some(gateway) = auth.gateway.clone() {
                if let Err(e) = gateway.deregister(&deviceid).await {
                    warn!(deviceid = %deviceid, error = %e, "gateway deregister failed");
                }
            }
        }

        info!(deviceid = %deviceid, "device deregistered");
        Ok(entry.device)
    }

    /// Whether a device id is currently registered here.
    pub fn has(&self, raw: &str) -> bool {
        match self.resolve(raw) {
            Ok(auth) => {
                let devices = self.inner.devices.lock().expect("device registry poisoned");
                devices.has(&auth.deviceid)
            }
            Err(_) => false,
        }
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.inner
            .devices
            .lock()
            .expect("device registry poisoned")
            .len()
    }

    // === Connections ===

    /// Obtain a proxy for a device id.
    ///
    /// On the authoritative path this yields a fresh [`LocalProxy`]
    /// attached to the proxy registry; on the gateway path it awaits
    /// the peer's CONNECT reply and yields a remote proxy. Callers
    /// need not distinguish.
    pub async fn connect(&self, raw: &str) -> Result<Proxy, Error> {
        let auth = self.resolve(raw)?;
        let deviceid = auth.deviceid.clone();

        if auth.is_authoritative {
            {
                let devices = self.inner.devices.lock().expect("device registry poisoned");
                if !devices.has(&deviceid) {
                    return Err(Error::NotConnected(deviceid));
                }
            }
            let proxy = LocalProxy::new(deviceid.clone(), self.clone());
            let mut proxies = self.inner.proxies.lock().expect("proxy registry poisoned");
            proxies.attach(&deviceid, proxy.clone());
            debug!(deviceid = %deviceid, "local proxy connected");
            Ok(Proxy::Local(proxy))
        } else {
            let gateway = auth
                .gateway
                .clone()
                .ok_or_else(|| Error::NoGateway(auth.domain.clone()))?;
            let remote = gateway.connect(&deviceid).await?;
            debug!(deviceid = %deviceid, connid = %remote.connid(), "remote proxy connected");
            Ok(Proxy::Remote(remote))
        }
    }

    /// Release a proxy obtained from [`connect`](Node::connect).
    pub async fn disconnect(&self, proxy: &Proxy) -> Result<(), Error> {
        match proxy {
            Proxy::Local(local) => {
                let mut proxies = self.inner.proxies.lock().expect("proxy registry poisoned");
                if proxies.detach(local.deviceid(), local) {
                    debug!(deviceid = %local.deviceid(), "local proxy disconnected");
                    Ok(())
                } else {
                    Err(Error::UnknownProxy(local.deviceid().to_string()))
                }
            }
            Proxy::Remote(remote) => {
                let auth = self.resolve(remote.deviceid())?;
                let gateway = auth
                    .gateway
                    .clone()
                    .ok_or_else(|| Error::NoGateway(auth.domain.clone()))?;
                gateway.disconnect(remote.clone()).await
            }
        }
    }

    /// Number of proxies currently attached for an id.
    pub fn proxy_count(&self, raw: &str) -> usize {
        match self.resolve(raw) {
            Ok(auth) => self
                .inner
                .proxies
                .lock()
                .expect("proxy registry poisoned")
                .count(&auth.deviceid),
            Err(_) => 0,
        }
    }

    // === Gateway Table ===

    /// Register a gateway for a domain (`*` matches any). At most one
    /// entry per domain.
    pub fn register_gateway(&self, domain: &str, gateway: Arc<dyn Gateway>) -> Result<(), Error> {
        let domain = domain.to_lowercase();
        let mut gateways = self.inner.gateways.lock().expect("gateway table poisoned");
        if gateways.contains_key(&domain) {
            return Err(Error::GatewayExists(domain));
        }
        info!(domain = %domain, "gateway registered");
        gateways.insert(domain, gateway);
        Ok(())
    }

    /// Release a gateway slot.
    pub fn deregister_gateway(&self, domain: &str) -> Result<(), Error> {
        let domain = domain.to_lowercase();
        let mut gateways = self.inner.gateways.lock().expect("gateway table poisoned");
        match gateways.remove(&domain) {
            Some(_) => {
                info!(domain = %domain, "gateway deregistered");
                Ok(())
            }
            None => Err(Error::NoGateway(domain)),
        }
    }

    /// Number of registered gateways.
    pub fn gateway_count(&self) -> usize {
        self.inner
            .gateways
            .lock()
            .expect("gateway table poisoned")
            .len()
    }

    // === Internals ===

    pub(crate) fn installed_layers(&self) -> Vec<Layer> {
        self.inner
            .layers
            .lock()
            .expect("middleware list poisoned")
            .clone()
    }

    pub(crate) fn push_layer(&self, layer: Layer) {
        self.inner
            .layers
            .lock()
            .expect("middleware list poisoned")
            .push(layer);
    }

    pub(crate) fn lookup_device(&self, deviceid: &str) -> Option<Arc<dyn Device>> {
        self.inner
            .devices
            .lock()
            .expect("device registry poisoned")
            .get(deviceid)
    }

    pub(crate) fn snapshot_proxies(&self, deviceid: &str) -> Vec<Arc<LocalProxy>> {
        self.inner
            .proxies
            .lock()
            .expect("proxy registry poisoned")
            .list(deviceid)
    }

    fn remove_device_entry(&self, deviceid: &str) {
        let entry = {
            let mut devices = self.inner.devices.lock().expect("device registry poisoned");
            devices.remove(deviceid)
        };
        if let Some(entry) = entry {
            detach_listeners(&entry);
        }
    }

    /// Attach the two upstream listeners a registration carries. Each
    /// synthesizes a PUT/NOTIFY request and feeds it into the
    /// dispatcher on its own task (fire-and-forget).
    fn attach_upstream_listeners(
        &self,
        deviceid: &str,
        device: &Arc<dyn Device>,
    ) -> (Option<ListenerId>, Option<ListenerId>) {
        let Some(hub) = device.notifications() else {
            return (None, None);
        };

        let node = self.clone();
        let id = deviceid.to_string();
        let put_listener = hub.on_put(Arc::new(move |metric, value| {
            let req = Request::put(&id, metric, value.clone());
            let node = node.clone();
            tokio::spawn(async move {
                if let Err(e) = node.dispatch(req).await {
                    debug!(error = %e, "upstream put dispatch failed");
                }
            });
        }));

        let node = self.clone();
        let id = deviceid.to_string();
        let notify_listener = hub.on_notify(Arc::new(move |event, params| {
            let req = Request::notify(&id, event, params.to_vec());
            let node = node.clone();
            tokio::spawn(async move {
                if let Err(e) = node.dispatch(req).await {
                    debug!(error = %e, "upstream notify dispatch failed");
                }
            });
        }));

        (Some(put_listener), Some(notify_listener))
    }
}

fn detach_listeners(entry: &DeviceEntry) {
    if let Some(hub) = entry.device.notifications() {
        if let Some(id) = entry.put_listener {
            hub.detach(id);
        }
        if let Some(id) = entry.notify_listener {
            hub.detach(id);
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("devices", &self.device_count())
            .field("gateways", &self.gateway_count())
            .finish()
    }
}
