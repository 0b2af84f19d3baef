//! Envelope and body types.
//!
//! Every message on the wire is a single JSON object:
//!
//! ```text
//! {"src": "n1", "dest": "n2", "body": {"type": "broadcast", "msg_id": 7, "message": 42}}
//! ```
//!
//! The body always carries a `type`. `msg_id` and `in_reply_to` are filled in by
//! the runtime; everything else is type-specific and lives in [`Body::fields`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorCode, Result};

/// Opaque identifier of a cluster member or client.
pub type NodeId = String;

/// A single message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

impl Message {
    /// Parse one line of input into an envelope.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Serialize the envelope as a single line (without the trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,

    /// Type-specific payload fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Body {
    /// Create an empty body of the given type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            msg_id: None,
            in_reply_to: None,
            fields: Map::new(),
        }
    }

    /// Build a body from a serializable payload struct.
    ///
    /// The payload must serialize to a JSON object.
    pub fn from_payload<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(fields) => Ok(Self {
                fields,
                ..Self::new(kind)
            }),
            other => Err(Error::MalformedRequest(format!(
                "payload must be an object, got {other}"
            ))),
        }
    }

    /// Set a payload field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a payload field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Decode the payload fields into a typed request.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| Error::MalformedRequest(format!("{} body: {e}", self.kind)))
    }

    /// Build an `error` body describing `err`.
    #[must_use]
    pub fn error(err: &Error) -> Self {
        Self::new("error")
            .with("code", err.code().as_u16())
            .with("text", err.to_string())
    }

    /// Whether this is an `error` reply.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    /// The error code of an `error` reply, if it has a known one.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        if !self.is_error() {
            return None;
        }
        self.field("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .and_then(ErrorCode::from_u16)
    }
}

/// Payload of the `init` handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct InitRequest {
    pub node_id: NodeId,
    #[serde(default)]
    pub node_ids: Vec<NodeId>,
}
