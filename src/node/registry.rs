//! Device and proxy registries.
//!
//! Node-scoped maps guarded by the node's mutexes. The device
//! registry holds at most one implementation per normalized id; the
//! proxy registry holds the ordered list of local proxies currently
//! connected to each id (upstream fan-out uses that order).

use crate::device::{Device, ListenerId};
use crate::proxy::LocalProxy;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered device plus the listeners attached at register time.
pub(crate) struct DeviceEntry {
    pub device: Arc<dyn Device>,
    pub put_listener: Option<ListenerId>,
    pub notify_listener: Option<ListenerId>,
}

impl DeviceEntry {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            put_listener: None,
            notify_listener: None,
        }
    }
}

/// Normalized device id → implementation.
#[derive(Default)]
pub(crate) struct DeviceRegistry {
    devices: HashMap<String, DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, deviceid: &str) -> bool {
        self.devices.contains_key(deviceid)
    }

    /// Insert an entry. The caller has already checked for duplicates
    /// under the same lock.
    pub fn insert(&mut self, deviceid: String, entry: DeviceEntry) {
        self.devices.insert(deviceid, entry);
    }

    pub fn remove(&mut self, deviceid: &str) -> Option<DeviceEntry> {
        self.devices.remove(deviceid)
    }

    pub fn get(&self, deviceid: &str) -> Option<Arc<dyn Device>> {
        self.devices.get(deviceid).map(|e| e.device.clone())
    }

    /// Record the listener ids attached after insertion.
    pub fn set_listeners(
        &mut self,
        deviceid: &str,
        put_listener: Option<ListenerId>,
        notify_listener: Option<ListenerId>,
    ) {
        if let Some(entry) = self.devices.get_mut(deviceid) {
            entry.put_listener = put_listener;
            entry.notify_listener = notify_listener;
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Normalized device id → ordered local proxies.
#[derive(Default)]
pub(crate) struct ProxyRegistry {
    proxies: HashMap<String, Vec<Arc<LocalProxy>>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a proxy, creating the list on first insert.
    pub fn attach(&mut self, deviceid: &str, proxy: Arc<LocalProxy>) {
        self.proxies
            .entry(deviceid.to_string())
            .or_default()
            .push(proxy);
    }

    /// Remove the first pointer-equal entry; drop the list when it
    /// becomes empty. Returns false if the proxy was not attached.
    pub fn detach(&mut self, deviceid: &str, proxy: &Arc<LocalProxy>) -> bool {
        let Some(list) = self.proxies.get_mut(deviceid) else {
            return false;
        };
        let Some(pos) = list.iter().position(|p| Arc::ptr_eq(p, proxy)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.proxies.remove(deviceid);
        }
        true
    }

    /// Snapshot of the current proxies in attachment order.
    pub fn list(&self, deviceid: &str) -> Vec<Arc<LocalProxy>> {
        self.proxies.get(deviceid).cloned().unwrap_or_default()
    }

    /// Drop every proxy for an id.
    pub fn remove_all(&mut self, deviceid: &str) -> Vec<Arc<LocalProxy>> {
        self.proxies.remove(deviceid).unwrap_or_default()
    }

    pub fn count(&self, deviceid: &str) -> usize {
        self.proxies.get(deviceid).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
