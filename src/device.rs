//! Device capabilities and the notification channel.
//!
//! A device answers six capability calls and produces two named
//! notifications, `put` (metric samples) and `notify` (events). The
//! notifications surface through a [`NotificationHub`]: a small
//! callback registry the node attaches exactly two listeners to at
//! register time and detaches at deregister time.

use crate::error::Error;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Handle for a listener attached to a [`NotificationHub`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// Callback for `put` notifications: `(metric, value)`.
pub type PutListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Callback for `notify` notifications: `(event, params)`.
pub type NotifyListener = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

struct HubInner {
    next_id: u64,
    put: Vec<(ListenerId, PutListener)>,
    notify: Vec<(ListenerId, NotifyListener)>,
}

/// Two-name observable channel for device-originated notifications.
///
/// Listeners fire in attachment order. Emission is fire-and-forget;
/// a listener that needs to do async work spawns it.
pub struct NotificationHub {
    inner: Mutex<HubInner>,
}

impl NotificationHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                next_id: 1,
                put: Vec::new(),
                notify: Vec::new(),
            }),
        }
    }

    /// Attach a `put` listener.
    pub fn on_put(&self, listener: PutListener) -> ListenerId {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.put.push((id, listener));
        id
    }

    /// Attach a `notify` listener.
    pub fn on_notify(&self, listener: NotifyListener) -> ListenerId {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.notify.push((id, listener));
        id
    }

    /// Detach a listener. Returns false if the id is unknown.
    pub fn detach(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let before = inner.put.len() + inner.notify.len();
        inner.put.retain(|(lid, _)| *lid != id);
        inner.notify.retain(|(lid, _)| *lid != id);
        inner.put.len() + inner.notify.len() != before
    }

    /// Emit a `put` notification to every attached listener.
    pub fn put(&self, metric: &str, value: &Value) {
        let listeners: Vec<PutListener> = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            inner.put.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(metric, value);
        }
    }

    /// Emit a `notify` notification to every attached listener.
    pub fn notify(&self, event: &str, params: &[Value]) {
        let listeners: Vec<NotifyListener> = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            inner.notify.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(event, params);
        }
    }

    /// Number of attached listeners (both names).
    pub fn listener_count(&self) -> usize {
        let inner = self.inner.lock().expect("hub lock poisoned");
        inner.put.len() + inner.notify.len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// A device implementation, native or proxy-for-remote.
///
/// All capabilities are async and must be awaited; each has a default
/// body rejecting the operation, so implementations override only what
/// they support.
#[async_trait]
pub trait Device: Send + Sync {
    /// Read a property.
    async fn get(&self, property: &str) -> Result<Value, Error> {
        let _ = property;
        Err(Error::Unsupported("get"))
    }

    /// Write a property.
    async fn set(&self, property: &str, value: Value) -> Result<Value, Error> {
        let _ = (property, value);
        Err(Error::Unsupported("set"))
    }

    /// Invoke a method.
    async fn invoke(&self, method: &str, params: Value) -> Result<Value, Error> {
        let _ = (method, params);
        Err(Error::Unsupported("invoke"))
    }

    /// Subscribe to an event stream.
    async fn subscribe(&self, event: &str) -> Result<Value, Error> {
        let _ = event;
        Err(Error::Unsupported("subscribe"))
    }

    /// Describe a property's schema.
    async fn describe(&self, property: &str) -> Result<Value, Error> {
        let _ = property;
        Err(Error::Unsupported("describe"))
    }

    /// Change a configuration property.
    async fn configure(&self, property: &str, value: Value) -> Result<Value, Error> {
        let _ = (property, value);
        Err(Error::Unsupported("config"))
    }

    /// The device's notification channel, when it produces any.
    ///
    /// Devices returning `Some` get `put`/`notify` listeners attached
    /// at register time and detached at deregister time.
    fn notifications(&self) -> Option<&NotificationHub> {
        None
    }
}

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn Device")
    }
}
