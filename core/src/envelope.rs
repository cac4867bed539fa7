//! The wire envelope and its checked decoding.
//!
//! Every request/reply message is a JSON object. The only field common to all
//! topics is `correlation_id` (a string); the rest depends on the topic. Nothing
//! is trusted: every field a consumer reads goes through a typed accessor that
//! returns [`DecodeError`] naming the offending field when it is missing or has
//! the wrong JSON type.
//!
//! Per-topic message types implement [`FromEnvelope`] on top of those accessors,
//! which gives every topic an explicit, structured decode step.
//!
//! # Example
//!
//! ```
//! use relay_core::envelope::{DecodeError, Envelope, FromEnvelope};
//!
//! struct StoreCheck {
//!     store_id: u64,
//!     user_id: u64,
//! }
//!
//! impl FromEnvelope for StoreCheck {
//!     fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
//!         Ok(Self {
//!             store_id: envelope.u64_field("store_id")?,
//!             user_id: envelope.u64_field("user_id")?,
//!         })
//!     }
//! }
//!
//! let envelope = Envelope::from_slice(br#"{"correlation_id":"c-1","store_id":5,"user_id":"nine"}"#)?;
//! assert_eq!(envelope.correlation_id().as_str(), "c-1");
//!
//! let err = envelope.decode::<StoreCheck>().err();
//! assert_eq!(
//!     err,
//!     Some(DecodeError::WrongType { field: "user_id".to_string(), expected: "unsigned integer" })
//! );
//! # Ok::<(), DecodeError>(())
//! ```

use crate::correlation::CorrelationId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the field carrying the correlation identifier.
pub const CORRELATION_ID_FIELD: &str = "correlation_id";

/// Errors raised while decoding an envelope or a stored answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload bytes are not valid JSON
    #[error("Malformed JSON payload: {0}")]
    MalformedJson(String),

    /// Payload is valid JSON but not an object
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// A required field is absent
    #[error("Missing field `{field}`")]
    MissingField {
        /// Name of the missing field
        field: String,
    },

    /// A field is present with the wrong JSON type
    #[error("Field `{field}` has the wrong type (expected {expected})")]
    WrongType {
        /// Name of the offending field
        field: String,
        /// Human-readable expected type
        expected: &'static str,
    },

    /// A rendezvous answer does not match the shape the caller expects
    #[error("Answer could not be decoded: {0}")]
    InvalidAnswer(String),
}

impl DecodeError {
    fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.to_string(),
            expected,
        }
    }
}

/// Error raised when an outbound message body cannot become an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Envelope encoding failed: {0}")]
pub struct EncodeError(pub String);

/// Structured decode step for a topic's message type.
pub trait FromEnvelope: Sized {
    /// Decode `Self` from an envelope, checking every field it reads.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] naming the first missing or mistyped field.
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError>;
}

/// A decoded wire payload: a JSON object with a checked `correlation_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    correlation_id: CorrelationId,
    fields: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope holding only the correlation identifier.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            fields: Map::new(),
        }
    }

    /// Build an envelope from a serializable message body.
    ///
    /// The body must serialize to a JSON object; its fields are merged next to
    /// `correlation_id`. A body field named `correlation_id` is overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the body fails to serialize or is not an object.
    pub fn wrap<T: Serialize>(correlation_id: &CorrelationId, body: &T) -> Result<Self, EncodeError> {
        match serde_json::to_value(body) {
            Ok(Value::Object(mut fields)) => {
                fields.remove(CORRELATION_ID_FIELD);
                Ok(Self {
                    correlation_id: correlation_id.clone(),
                    fields,
                })
            }
            Ok(other) => Err(EncodeError(format!(
                "message body must serialize to an object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(EncodeError(e.to_string())),
        }
    }

    /// Parse and check raw payload bytes.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::MalformedJson`] if the bytes are not JSON
    /// - [`DecodeError::NotAnObject`] if the JSON is not an object
    /// - [`DecodeError::MissingField`] / [`DecodeError::WrongType`] if
    ///   `correlation_id` is absent, not a string, or empty
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| DecodeError::MalformedJson(e.to_string()))?;

        let Value::Object(mut fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let correlation_id = match fields.remove(CORRELATION_ID_FIELD) {
            None | Some(Value::Null) => return Err(DecodeError::missing(CORRELATION_ID_FIELD)),
            Some(Value::String(id)) if !id.is_empty() => CorrelationId::from_wire(id),
            Some(_) => {
                return Err(DecodeError::wrong_type(
                    CORRELATION_ID_FIELD,
                    "non-empty string",
                ));
            }
        };

        Ok(Self {
            correlation_id,
            fields,
        })
    }

    /// Serialize to wire bytes, `correlation_id` included.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut object = self.fields.clone();
        object.insert(
            CORRELATION_ID_FIELD.to_string(),
            Value::String(self.correlation_id.as_str().to_string()),
        );
        Value::Object(object).to_string().into_bytes()
    }

    /// Add or replace a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name != CORRELATION_ID_FIELD {
            self.fields.insert(name, value.into());
        }
        self
    }

    /// The correlation identifier.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// All fields except `correlation_id`.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Raw access to an optional field. `null` counts as absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|value| !value.is_null())
    }

    /// Raw access to a required field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MissingField`] if absent or `null`.
    pub fn require(&self, field: &str) -> Result<&Value, DecodeError> {
        self.get(field).ok_or_else(|| DecodeError::missing(field))
    }

    /// Required string field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if missing or not a string.
    pub fn string_field(&self, field: &str) -> Result<&str, DecodeError> {
        self.require(field)?
            .as_str()
            .ok_or_else(|| DecodeError::wrong_type(field, "string"))
    }

    /// Required boolean field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if missing or not a boolean.
    pub fn bool_field(&self, field: &str) -> Result<bool, DecodeError> {
        self.require(field)?
            .as_bool()
            .ok_or_else(|| DecodeError::wrong_type(field, "boolean"))
    }

    /// Required non-negative integer field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if missing, negative, fractional or not a number.
    pub fn u64_field(&self, field: &str) -> Result<u64, DecodeError> {
        self.require(field)?
            .as_u64()
            .ok_or_else(|| DecodeError::wrong_type(field, "unsigned integer"))
    }

    /// Required signed integer field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if missing, fractional or not a number.
    pub fn i64_field(&self, field: &str) -> Result<i64, DecodeError> {
        self.require(field)?
            .as_i64()
            .ok_or_else(|| DecodeError::wrong_type(field, "integer"))
    }

    /// Required array field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if missing or not an array.
    pub fn array_field(&self, field: &str) -> Result<&Vec<Value>, DecodeError> {
        self.require(field)?
            .as_array()
            .ok_or_else(|| DecodeError::wrong_type(field, "array"))
    }

    /// Required field deserialized into any serde type.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if missing or not deserializable as `T`.
    pub fn field_as<T: DeserializeOwned>(&self, field: &str) -> Result<T, DecodeError> {
        let value = self.require(field)?;
        serde_json::from_value(value.clone())
            .map_err(|_| DecodeError::wrong_type(field, std::any::type_name::<T>()))
    }

    /// Run the structured decode step of a message type.
    ///
    /// # Errors
    ///
    /// Propagates the [`DecodeError`] returned by `T::from_envelope`.
    pub fn decode<T: FromEnvelope>(&self) -> Result<T, DecodeError> {
        T::from_envelope(self)
    }
}

/// Decode a rendezvous answer into the caller's expected shape.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidAnswer`] if the bytes do not deserialize as `T`.
pub fn decode_answer<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidAnswer(e.to_string()))
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
