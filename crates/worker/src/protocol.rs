use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Headers = HashMap<String, String>;

/// A decoded RPC call, whether it arrived bare (legacy) or inside a
/// `{type: "request", payload: ...}` envelope (§3, §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

/// A decoded cancellation notification. Always enveloped; there is no
/// legacy bare form (§6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancellationMessage {
    pub id: u64,
    pub reason: String,
}

/// The reply dispatch writes back for every [`Request`] it services.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

impl Response {
    pub fn ok(id: u64, body: Value, headers: Option<Headers>) -> Self {
        Self {
            id,
            ok: true,
            body: Some(body),
            error: None,
            headers,
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            body: None,
            error: Some(message.into()),
            headers: None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Response always serializes")
    }
}

/// The outcome of classifying one decoded frame per §4.5 step 3.
pub enum Inbound {
    Request(Request),
    Cancellation(CancellationMessage),
    /// `type` was present but not one of the recognised envelope kinds.
    UnknownEnvelope(String),
}

/// Classifies a decoded value as a request, a cancellation, or an unknown
/// envelope, accepting both the enveloped and legacy bare-request forms.
pub fn classify(value: Value) -> Result<Inbound, serde_json::Error> {
    if let Value::Object(ref map) = value {
        if let Some(Value::String(kind)) = map.get("type") {
            let kind = kind.clone();
            let payload = map.get("payload").cloned().unwrap_or(Value::Null);
            return match kind.as_str() {
                "request" => Ok(Inbound::Request(serde_json::from_value(payload)?)),
                "cancellation" => Ok(Inbound::Cancellation(serde_json::from_value(payload)?)),
                _ => Ok(Inbound::UnknownEnvelope(kind)),
            };
        }
    }
    Ok(Inbound::Request(serde_json::from_value(value)?))
}
