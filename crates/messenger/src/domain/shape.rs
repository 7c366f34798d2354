//! Payload shapes.
//!
//! A shape is anything that can look at a decoded payload and say whether it
//! is acceptable. The messenger never inspects concrete shape types; it only
//! calls [`Shape::validate`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::sync::Arc;

/// Why a payload was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// Payload is of the wrong JSON type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    /// A required field is absent.
    #[error("missing field '{0}'")]
    MissingField(String),

    /// A field is present but unacceptable.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// The payload was refused as a whole.
    #[error("{0}")]
    Rejected(String),
}

/// Validation capability for payloads.
pub trait Shape: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Accept or refuse a candidate payload.
    fn validate(&self, candidate: &Value) -> Result<(), ShapeError>;
}

/// Shared handle to a shape.
pub type ShapeRef = Arc<dyn Shape>;

impl fmt::Debug for dyn Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({})", self.name())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expect_object(candidate: &Value) -> Result<&serde_json::Map<String, Value>, ShapeError> {
    candidate.as_object().ok_or_else(|| ShapeError::TypeMismatch {
        expected: "object",
        found: json_type(candidate).to_string(),
    })
}

/// `{ "value": "<ip address>" }`, an IPv4 or IPv6 address wrapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpAddressShape;

impl Shape for IpAddressShape {
    fn name(&self) -> &str {
        "IpAddress"
    }

    fn validate(&self, candidate: &Value) -> Result<(), ShapeError> {
        let object = expect_object(candidate)?;
        let value = object
            .get("value")
            .ok_or_else(|| ShapeError::MissingField("value".into()))?;
        let text = value.as_str().ok_or_else(|| ShapeError::InvalidField {
            field: "value".into(),
            reason: format!("expected string, found {}", json_type(value)),
        })?;
        text.parse::<IpAddr>()
            .map(|_| ())
            .map_err(|e| ShapeError::InvalidField {
                field: "value".into(),
                reason: e.to_string(),
            })
    }
}

/// An object that carries every listed field.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    name: String,
    fields: Vec<String>,
}

impl RequiredFields {
    /// Shape requiring `fields`.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Shape for RequiredFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, candidate: &Value) -> Result<(), ShapeError> {
        let object = expect_object(candidate)?;
        match self.fields.iter().find(|f| !object.contains_key(f.as_str())) {
            Some(missing) => Err(ShapeError::MissingField(missing.clone())),
            None => Ok(()),
        }
    }
}

/// Accepts any payload that deserializes into `T`.
pub struct Typed<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Typed<T> {
    /// Shape backed by `T`'s `Deserialize` impl.
    pub fn new() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Typed").field("name", &self.name).finish()
    }
}

impl<T: DeserializeOwned> Shape for Typed<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn validate(&self, candidate: &Value) -> Result<(), ShapeError> {
        T::deserialize(candidate)
            .map(|_| ())
            .map_err(|e| ShapeError::Rejected(e.to_string()))
    }
}
