//! Envelopes - the reserved-field payload shapes on the wire.
//!
//! ```text
//! request:  {correlationId, data}
//! reply:    {correlationId, success, data, message}
//! watcher:  {success, data, message}
//! ```
//!
//! Everything else in a payload is opaque. Decoding is lenient: a reserved
//! field with an unexpected type is treated as absent.

use crate::correlation::CorrelationId;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Reserved field carrying the correlation id.
pub const CORRELATION_ID_FIELD: &str = "correlationId";

/// Reserved tri-state success flag.
pub const SUCCESS_FIELD: &str = "success";

/// Reserved failure reason.
pub const MESSAGE_FIELD: &str = "message";

/// Reserved application payload.
pub const DATA_FIELD: &str = "data";

/// Which path an inbound payload takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `success` absent, `true`, or anything but the boolean `false`.
    Success,
    /// `success` is exactly the boolean `false`.
    Failure,
}

impl Outcome {
    /// Classify a payload. Only an explicit `success: false` is a failure.
    #[must_use]
    pub fn classify(payload: &Value) -> Self {
        match payload.get(SUCCESS_FIELD) {
            Some(Value::Bool(false)) => Self::Failure,
            _ => Self::Success,
        }
    }
}

fn correlation_id_of(payload: &Value) -> Option<CorrelationId> {
    match payload.get(CORRELATION_ID_FIELD)? {
        Value::String(id) => Some(CorrelationId::from(id.as_str())),
        Value::Number(id) => Some(CorrelationId::from(id.to_string())),
        _ => None,
    }
}

/// Outgoing request: `{correlationId, data}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub correlation_id: CorrelationId,
    pub data: Value,
}

impl RequestEnvelope {
    pub fn new(correlation_id: CorrelationId, data: Value) -> Self {
        Self {
            correlation_id,
            data,
        }
    }

    /// Wire representation.
    #[must_use]
    pub fn into_payload(self) -> Value {
        let mut body = Map::new();
        body.insert(
            CORRELATION_ID_FIELD.to_string(),
            Value::String(self.correlation_id.to_string()),
        );
        body.insert(DATA_FIELD.to_string(), self.data);
        Value::Object(body)
    }
}

/// Reply (or watcher) envelope: `{correlationId?, success?, data?, message?}`.
///
/// Members that are not reserved, or reserved members with an unexpected
/// type, are kept in `extra` so callbacks see the whole reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyEnvelope {
    /// Echo of the request's id. Absent on watcher traffic.
    pub correlation_id: Option<CorrelationId>,
    /// `None` when the field is absent or not a boolean.
    pub success: Option<bool>,
    /// Application payload.
    pub data: Option<Value>,
    /// Failure reason.
    pub message: Option<String>,
    /// Remaining members of the payload, as received.
    pub extra: Map<String, Value>,
}

impl ReplyEnvelope {
    /// `{correlationId?, success: true, data}`
    pub fn succeeded(correlation_id: Option<CorrelationId>, data: Value) -> Self {
        Self {
            correlation_id,
            success: Some(true),
            data: Some(data),
            message: None,
            extra: Map::new(),
        }
    }

    /// `{correlationId?, success: false, message}`
    pub fn failed(correlation_id: Option<CorrelationId>, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: Some(false),
            data: None,
            message: Some(message.into()),
            extra: Map::new(),
        }
    }

    /// Decode the reserved fields of an inbound payload.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let mut extra = payload.as_object().cloned().unwrap_or_default();

        let correlation_id = correlation_id_of(payload);
        if correlation_id.is_some() {
            extra.remove(CORRELATION_ID_FIELD);
        }
        let success = payload.get(SUCCESS_FIELD).and_then(Value::as_bool);
        if success.is_some() {
            extra.remove(SUCCESS_FIELD);
        }
        let message = payload
            .get(MESSAGE_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        if message.is_some() {
            extra.remove(MESSAGE_FIELD);
        }
        let data = extra.remove(DATA_FIELD);

        Self {
            correlation_id,
            success,
            data,
            message,
            extra,
        }
    }

    /// Wire representation, omitting absent fields. Typed fields win over
    /// members of `extra` with the same key.
    #[must_use]
    pub fn into_payload(self) -> Value {
        let mut body = self.extra;
        if let Some(id) = self.correlation_id {
            body.insert(CORRELATION_ID_FIELD.to_string(), Value::String(id.to_string()));
        }
        if let Some(success) = self.success {
            body.insert(SUCCESS_FIELD.to_string(), Value::Bool(success));
        }
        if let Some(data) = self.data {
            body.insert(DATA_FIELD.to_string(), data);
        }
        if let Some(message) = self.message {
            body.insert(MESSAGE_FIELD.to_string(), Value::String(message));
        }
        Value::Object(body)
    }

    /// Path this reply takes: failure only on an explicit `success: false`.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self.success {
            Some(false) => Outcome::Failure,
            _ => Outcome::Success,
        }
    }

    /// Deserialize `data` into `T`. An absent `data` decodes as `null`.
    ///
    /// # Errors
    ///
    /// `RelayError::Serialization` if `data` does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.data.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// A request as seen by the answering side.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    /// Subject the request arrived on.
    pub subject: String,
    /// Id to echo in the reply.
    pub correlation_id: CorrelationId,
    /// Request payload (`null` if absent).
    pub data: Value,
}

impl IncomingRequest {
    /// Decode a request payload received on `subject`.
    ///
    /// Returns `None` if the payload carries no correlation id.
    pub fn from_payload(subject: &str, payload: &Value) -> Option<Self> {
        Some(Self {
            subject: subject.to_string(),
            correlation_id: correlation_id_of(payload)?,
            data: payload.get(DATA_FIELD).cloned().unwrap_or(Value::Null),
        })
    }

    /// Deserialize `data` into `T`.
    ///
    /// # Errors
    ///
    /// `RelayError::Serialization` if `data` does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}
