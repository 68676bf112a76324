//! Requests flowing through the middleware dispatcher.

use crate::protocol::Verb;
use serde_json::Value;

/// One device operation addressed to a device id.
///
/// `value` carries the payload for SET/CONFIG/INVOKE/PUT; `params`
/// carries the argument list for NOTIFY.
#[derive(Clone, Debug)]
pub struct Request {
    pub deviceid: String,
    pub method: Verb,
    /// Property, method, event, or metric name.
    pub identifier: String,
    pub value: Option<Value>,
    pub params: Option<Vec<Value>>,
}

impl Request {
    fn new(deviceid: &str, method: Verb, identifier: &str) -> Self {
        Self {
            deviceid: deviceid.to_string(),
            method,
            identifier: identifier.to_string(),
            value: None,
            params: None,
        }
    }

    /// GET a property.
    pub fn get(deviceid: &str, property: &str) -> Self {
        Self::new(deviceid, Verb::Get, property)
    }

    /// SET a property.
    pub fn set(deviceid: &str, property: &str, value: Value) -> Self {
        let mut req = Self::new(deviceid, Verb::Set, property);
        req.value = Some(value);
        req
    }

    /// INVOKE a method.
    pub fn invoke(deviceid: &str, method: &str, params: Value) -> Self {
        let mut req = Self::new(deviceid, Verb::Invoke, method);
        req.value = Some(params);
        req
    }

    /// SUBSCRIBE to an event.
    pub fn subscribe(deviceid: &str, event: &str) -> Self {
        Self::new(deviceid, Verb::Subscribe, event)
    }

    /// DESCRIBE a property.
    pub fn describe(deviceid: &str, property: &str) -> Self {
        Self::new(deviceid, Verb::Describe, property)
    }

    /// CONFIG a property.
    pub fn config(deviceid: &str, property: &str, value: Value) -> Self {
        let mut req = Self::new(deviceid, Verb::Config, property);
        req.value = Some(value);
        req
    }

    /// Device-originated PUT (metric sample).
    pub fn put(deviceid: &str, metric: &str, value: Value) -> Self {
        let mut req = Self::new(deviceid, Verb::Put, metric);
        req.value = Some(value);
        req
    }

    /// Device-originated NOTIFY (event).
    pub fn notify(deviceid: &str, event: &str, params: Vec<Value>) -> Self {
        let mut req = Self::new(deviceid, Verb::Notify, event);
        req.params = Some(params);
        req
    }

    /// True for the six application-originated verbs, false for
    /// PUT/NOTIFY. Decides the dispatch direction.
    pub fn is_application_originated(&self) -> bool {
        self.method.is_application_originated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direction_predicate() {
        assert!(Request::get(".:d", "p").is_application_originated());
        assert!(Request::config(".:d", "p", json!(1)).is_application_originated());
        assert!(!Request::put(".:d", "m", json!(1)).is_application_originated());
        assert!(!Request::notify(".:d", "e", vec![]).is_application_originated());
    }

    #[test]
    fn test_payload_slots() {
        let set = Request::set(".:d", "p", json!(5));
        assert_eq!(set.value, Some(json!(5)));
        assert!(set.params.is_none());

        let notify = Request::notify(".:d", "e", vec![json!("a")]);
        assert!(notify.value.is_none());
        assert_eq!(notify.params, Some(vec![json!("a")]));
    }
}
