//! Node engine tests: registries, authority resolution, dispatch,
//! and local round trips.

mod dispatch;
mod local;

use crate::device::{Device, NotificationHub};
use crate::error::Error;
use crate::gateway::Gateway;
use crate::node::Node;
use crate::proxy::{LocalProxy, RemoteProxy};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub(crate) fn make_node() -> Node {
    Node::with_defaults()
}

/// Native device with a property store and a notification hub.
pub(crate) struct TestDevice {
    hub: NotificationHub,
    properties: Mutex<HashMap<String, Value>>,
}

impl TestDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hub: NotificationHub::new(),
            properties: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_property(name: &str, value: Value) -> Arc<Self> {
        let device = Self::new();
        device
            .properties
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
        device
    }

    pub fn emit_put(&self, metric: &str, value: Value) {
        self.hub.put(metric, &value);
    }

    pub fn emit_notify(&self, event: &str, params: Vec<Value>) {
        self.hub.notify(event, &params);
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl Device for TestDevice {
    async fn get(&self, property: &str) -> Result<Value, Error> {
        self.properties
            .lock()
            .unwrap()
            .get(property)
            .cloned()
            .ok_or(Error::Unsupported("get"))
    }

    async fn set(&self, property: &str, value: Value) -> Result<Value, Error> {
        self.properties
            .lock()
            .unwrap()
            .insert(property.to_string(), value);
        // Empty result: the dispatcher substitutes true.
        Ok(Value::Null)
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value, Error> {
        if method == "noop" {
            return Ok(Value::Null);
        }
        Ok(json!({ "invoked": method, "params": params }))
    }

    async fn subscribe(&self, _event: &str) -> Result<Value, Error> {
        Ok(Value::Bool(true))
    }

    async fn describe(&self, property: &str) -> Result<Value, Error> {
        Ok(json!({ "name": property, "type": "object" }))
    }

    async fn configure(&self, property: &str, value: Value) -> Result<Value, Error> {
        self.properties
            .lock()
            .unwrap()
            .insert(format!("cfg:{property}"), value);
        Ok(json!("configured"))
    }

    fn notifications(&self) -> Option<&NotificationHub> {
        Some(&self.hub)
    }
}

/// Gateway double recording forwarded calls.
pub(crate) struct MockGateway {
    pub fail_register: bool,
    pub registers: Mutex<Vec<String>>,
    pub deregisters: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_register: false,
            registers: Mutex::new(Vec::new()),
            deregisters: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_register: true,
            registers: Mutex::new(Vec::new()),
            deregisters: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn register(&self, deviceid: &str, _proxy: Arc<LocalProxy>) -> Result<Value, Error> {
        if self.fail_register {
            return Err(Error::Remote("gateway refused".to_string()));
        }
        self.registers.lock().unwrap().push(deviceid.to_string());
        Ok(json!(deviceid))
    }

    async fn deregister(&self, deviceid: &str) -> Result<Value, Error> {
        self.deregisters.lock().unwrap().push(deviceid.to_string());
        Ok(Value::Bool(true))
    }

    async fn connect(&self, deviceid: &str) -> Result<Arc<RemoteProxy>, Error> {
        Err(Error::NotConnected(deviceid.to_string()))
    }

    async fn disconnect(&self, _proxy: Arc<RemoteProxy>) -> Result<(), Error> {
        Ok(())
    }
}
