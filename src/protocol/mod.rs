//! Peer wire protocol.
//!
//! Frames are UTF-8 JSON objects, one per text message of the
//! underlying bidirectional transport. Every frame carries `method`
//! and `reqid`; the remaining fields are verb-dependent:
//!
//! | Field | Present for |
//! |---|---|
//! | `deviceid` | all device and peer verbs |
//! | `connid` | REGISTER, CONNECT reply, downstream/upstream verbs |
//! | `identifier` | device verbs (property/method/event/metric) |
//! | `value` | SET, CONFIG, INVOKE, PUT |
//! | `params` | NOTIFY |
//! | `success`, `res`, `err` | RESPONSE |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding or interpreting wire frames.
///
/// Frame errors are fatal to the frame, never to the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("binary frame rejected ({0} bytes)")]
    BinaryFrame(usize),

    #[error("frame is missing field '{0}'")]
    MissingField(&'static str),
}

/// The thirteen wire methods.
///
/// GET through CONFIG are application-originated device operations;
/// PUT and NOTIFY are device-originated notifications; the remaining
/// four verbs plus RESPONSE manage the peer link itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Set,
    Invoke,
    Subscribe,
    Describe,
    Config,
    Put,
    Notify,
    Register,
    Deregister,
    Connect,
    Disconnect,
    Response,
}

impl Verb {
    /// True for GET/SET/INVOKE/SUBSCRIBE/DESCRIBE/CONFIG, false for
    /// PUT/NOTIFY. Peer verbs are neither.
    pub fn is_application_originated(&self) -> bool {
        matches!(
            self,
            Verb::Get | Verb::Set | Verb::Invoke | Verb::Subscribe | Verb::Describe | Verb::Config
        )
    }

    /// True for the two device-originated notification verbs.
    pub fn is_device_originated(&self) -> bool {
        matches!(self, Verb::Put | Verb::Notify)
    }

    /// True for any of the eight device operation verbs.
    pub fn is_device_operation(&self) -> bool {
        self.is_application_originated() || self.is_device_originated()
    }

    /// True for the four link-management verbs.
    pub fn is_peer_verb(&self) -> bool {
        matches!(
            self,
            Verb::Register | Verb::Deregister | Verb::Connect | Verb::Disconnect
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Get => "GET",
            Verb::Set => "SET",
            Verb::Invoke => "INVOKE",
            Verb::Subscribe => "SUBSCRIBE",
            Verb::Describe => "DESCRIBE",
            Verb::Config => "CONFIG",
            Verb::Put => "PUT",
            Verb::Notify => "NOTIFY",
            Verb::Register => "REGISTER",
            Verb::Deregister => "DEREGISTER",
            Verb::Connect => "CONNECT",
            Verb::Disconnect => "DISCONNECT",
            Verb::Response => "RESPONSE",
        };
        write!(f, "{}", s)
    }
}

/// Request id: a session-local monotone counter echoed in the matching
/// RESPONSE. Integer on the wire for frames we mint; peers may use
/// strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReqId {
    Num(u64),
    Str(String),
}

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReqId::Num(n) => write!(f, "{}", n),
            ReqId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for ReqId {
    fn from(n: u64) -> Self {
        ReqId::Num(n)
    }
}

/// Opaque token addressing one local-device↔remote-endpoint binding,
/// unique within a link's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(String);

impl ConnId {
    /// Wrap a raw token received from a peer.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mint a connection id from a session-local counter value.
    pub(crate) fn mint(counter: u64) -> Self {
        Self(format!("c{}", counter))
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One wire frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub method: Verb,
    pub reqid: ReqId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviceid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connid: Option<ConnId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Frame {
    /// Bare frame with only the mandatory fields.
    pub fn new(method: Verb, reqid: ReqId) -> Self {
        Self {
            method,
            reqid,
            deviceid: None,
            connid: None,
            identifier: None,
            value: None,
            params: None,
            success: None,
            res: None,
            err: None,
        }
    }

    /// Successful RESPONSE carrying `res`.
    pub fn response_ok(reqid: ReqId, res: Value) -> Self {
        let mut frame = Self::new(Verb::Response, reqid);
        frame.success = Some(true);
        frame.res = Some(res);
        frame
    }

    /// Failed RESPONSE carrying `err` message text.
    pub fn response_err(reqid: ReqId, err: String) -> Self {
        let mut frame = Self::new(Verb::Response, reqid);
        frame.success = Some(false);
        frame.err = Some(err);
        frame
    }

    /// Decode a frame from a text message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode this frame as a text message.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `deviceid` field, or a missing-field error.
    pub fn require_deviceid(&self) -> Result<&str, ProtocolError> {
        self.deviceid
            .as_deref()
            .ok_or(ProtocolError::MissingField("deviceid"))
    }

    /// The `connid` field, or a missing-field error.
    pub fn require_connid(&self) -> Result<&ConnId, ProtocolError> {
        self.connid
            .as_ref()
            .ok_or(ProtocolError::MissingField("connid"))
    }

    /// The `identifier` field, or a missing-field error.
    pub fn require_identifier(&self) -> Result<&str, ProtocolError> {
        self.identifier
            .as_deref()
            .ok_or(ProtocolError::MissingField("identifier"))
    }
}

/// Decoded RESPONSE payload handed to the awaiting requester.
#[derive(Clone, Debug)]
pub struct PeerReply {
    /// The `res` field (`Null` when absent).
    pub res: Value,
    /// The `connid` field; present on CONNECT replies.
    pub connid: Option<ConnId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_round_trip() {
        let mut frame = Frame::new(Verb::Set, ReqId::Num(7));
        frame.deviceid = Some(".:dev".to_string());
        frame.identifier = Some("prop".to_string());
        frame.value = Some(json!({"a": 1}));

        let text = frame.encode().unwrap();
        let back = Frame::decode(&text).unwrap();
        assert_eq!(back.method, Verb::Set);
        assert_eq!(back.reqid, ReqId::Num(7));
        assert_eq!(back.deviceid.as_deref(), Some(".:dev"));
        assert_eq!(back.value, Some(json!({"a": 1})));
        assert!(back.params.is_none());
    }

    #[test]
    fn test_methods_serialize_uppercase() {
        let frame = Frame::new(Verb::Deregister, ReqId::Num(1));
        let text = frame.encode().unwrap();
        assert!(text.contains("\"method\":\"DEREGISTER\""));
    }

    #[test]
    fn test_unknown_method_is_malformed() {
        let err = Frame::decode(r#"{"method":"EXPLODE","reqid":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_reqid_accepts_strings() {
        let frame = Frame::decode(r#"{"method":"GET","reqid":"abc-1","deviceid":".:d"}"#).unwrap();
        assert_eq!(frame.reqid, ReqId::Str("abc-1".to_string()));
    }

    #[test]
    fn test_response_err_shape() {
        let frame = Frame::response_err(ReqId::Num(3), "boom".to_string());
        let text = frame.encode().unwrap();
        assert!(text.contains("\"success\":false"));
        assert!(text.contains("\"err\":\"boom\""));
        assert!(!text.contains("\"res\""));
    }

    #[test]
    fn test_missing_field_accessors() {
        let frame = Frame::new(Verb::Get, ReqId::Num(1));
        assert!(matches!(
            frame.require_deviceid(),
            Err(ProtocolError::MissingField("deviceid"))
        ));
        assert!(matches!(
            frame.require_connid(),
            Err(ProtocolError::MissingField("connid"))
        ));
    }

    #[test]
    fn test_verb_classification() {
        assert!(Verb::Get.is_application_originated());
        assert!(Verb::Config.is_application_originated());
        assert!(!Verb::Put.is_application_originated());
        assert!(Verb::Put.is_device_originated());
        assert!(Verb::Notify.is_device_operation());
        assert!(Verb::Register.is_peer_verb());
        assert!(!Verb::Response.is_peer_verb());
        assert!(!Verb::Response.is_device_operation());
    }
}
