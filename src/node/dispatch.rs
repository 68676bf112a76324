//! Bidirectional middleware dispatch pipeline.
//!
//! Each request passes through the user-installed layer chain before
//! reaching a final handler: application-originated requests run the
//! layers first-to-last and end at local device delivery;
//! device-originated requests run last-to-first and end at proxy
//! fan-out.
//!
//! Two semantics here are deliberate and observable:
//! - a layer that invokes `next` but resolves to `None` gets the most
//!   recently produced deeper result substituted;
//! - a failure propagates backward, visible only to layers *earlier*
//!   than the one that raised it.

use crate::error::Error;
use crate::node::Node;
use crate::protocol::Verb;
use crate::request::Request;
use futures::future::BoxFuture;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// What a layer resolves to: a value, nothing (substitute the deepest
/// result), or a failure.
pub type LayerOutcome = Result<Option<Value>, Error>;

/// Boxed future returned by layers and by [`Next::invoke`].
pub type LayerFuture = BoxFuture<'static, LayerOutcome>;

/// One middleware layer.
pub type Layer = Arc<dyn Fn(Request, Next) -> LayerFuture + Send + Sync>;

/// Continuation handed to each layer.
///
/// Invoking it runs the remaining layers and the final handler;
/// dropping it without invoking short-circuits the chain.
#[derive(Clone)]
pub struct Next {
    node: Node,
    layers: Arc<Vec<Layer>>,
    index: usize,
    produced: Arc<Mutex<Option<Value>>>,
}

impl Next {
    /// Run the rest of the chain with the given request.
    pub fn invoke(self, req: Request) -> LayerFuture {
        run_at(self.node, self.layers, self.index, self.produced, req)
    }
}

fn run_at(
    node: Node,
    layers: Arc<Vec<Layer>>,
    index: usize,
    produced: Arc<Mutex<Option<Value>>>,
    req: Request,
) -> LayerFuture {
    Box::pin(async move {
        if index == layers.len() {
            let value = node.finish(req).await?;
            *produced.lock().expect("dispatch result cell poisoned") = Some(value.clone());
            return Ok(Some(value));
        }

        let layer = layers[index].clone();
        let next = Next {
            node,
            layers,
            index: index + 1,
            produced: produced.clone(),
        };

        match layer(req, next).await? {
            Some(value) => {
                *produced.lock().expect("dispatch result cell poisoned") = Some(value.clone());
                Ok(Some(value))
            }
            // Layer invoked next but resolved to nothing: hand back
            // the deepest result produced so far.
            None => Ok(produced
                .lock()
                .expect("dispatch result cell poisoned")
                .clone()),
        }
    })
}

impl Node {
    /// Install a middleware layer at the end of the chain.
    pub fn use_middleware<F>(&self, layer: F)
    where
        F: Fn(Request, Next) -> LayerFuture + Send + Sync + 'static,
    {
        self.push_layer(Arc::new(layer));
    }

    /// Pass a request through the middleware pipeline.
    ///
    /// Fails with [`Error::LayerMustRespond`] when the chain unwinds
    /// without any layer or final handler producing a value.
    pub async fn dispatch(&self, req: Request) -> Result<Value, Error> {
        let installed = self.installed_layers();
        let ordered: Vec<Layer> = if req.is_application_originated() {
            installed
        } else {
            installed.into_iter().rev().collect()
        };

        debug!(deviceid = %req.deviceid, method = %req.method, "dispatch");
        let produced = Arc::new(Mutex::new(None));
        let outcome = run_at(self.clone(), Arc::new(ordered), 0, produced, req).await?;
        outcome.ok_or(Error::LayerMustRespond)
    }

    async fn finish(&self, req: Request) -> Result<Value, Error> {
        if req.is_application_originated() {
            self.deliver_downstream(req).await
        } else {
            self.fan_out_upstream(req).await
        }
    }

    /// Final downstream handler: hand the request to the registered
    /// device implementation.
    async fn deliver_downstream(&self, req: Request) -> Result<Value, Error> {
        let device = self
            .lookup_device(&req.deviceid)
            .ok_or_else(|| Error::NotConnected(req.deviceid.clone()))?;

        let value = req.value.clone().unwrap_or(Value::Null);
        match req.method {
            Verb::Get => device.get(&req.identifier).await,
            // SET and INVOKE substitute true for an empty result, so
            // callers never see "no result" for those.
            Verb::Set => Ok(non_empty(device.set(&req.identifier, value).await?)),
            Verb::Invoke => Ok(non_empty(device.invoke(&req.identifier, value).await?)),
            Verb::Subscribe => device.subscribe(&req.identifier).await,
            Verb::Describe => device.describe(&req.identifier).await,
            Verb::Config => device.configure(&req.identifier, value).await,
            _ => Err(Error::Unsupported("downstream delivery")),
        }
    }

    /// Final upstream handler: emit the notification on every proxy
    /// currently attached for the id, in attachment order. A failing
    /// subscriber is logged and never starves the others.
    async fn fan_out_upstream(&self, req: Request) -> Result<Value, Error> {
        let proxies = self.snapshot_proxies(&req.deviceid);
        debug!(
            deviceid = %req.deviceid,
            method = %req.method,
            proxies = proxies.len(),
            "upstream fan-out"
        );
        for proxy in proxies {
            if catch_unwind(AssertUnwindSafe(|| proxy.deliver(&req))).is_err() {
                warn!(deviceid = %req.deviceid, "upstream subscriber panicked");
            }
        }
        Ok(Value::Bool(true))
    }
}

fn non_empty(value: Value) -> Value {
    if value.is_null() {
        Value::Bool(true)
    } else {
        value
    }
}
