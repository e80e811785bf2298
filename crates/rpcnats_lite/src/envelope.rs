use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

/// The response envelope published back to a caller.
///
/// Exactly one of `data` / `error_message` is populated. The fields are
/// private so the only way to build an envelope is through [`Response::ok`]
/// and [`Response::err`].
///
/// Wire form:
///
/// ```text
/// {"Success":true,"Data":{"x":1}}
/// {"Success":false,"ErrorMessage":"bad method"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Success")]
    success: bool,

    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,

    #[serde(
        rename = "ErrorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    error_message: Option<String>,
}

impl Response {
    /// A success envelope carrying the handler's result.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
        }
    }

    /// A failure envelope carrying a human-readable cause.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
        }
    }

    /// Build the envelope for a handler outcome.
    pub fn from_outcome(outcome: Result<Value, DispatchError>) -> Self {
        match outcome {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Serialize for the wire.
    ///
    /// A serialization failure degrades to an empty payload so that a publish
    /// is still attempted.
    pub fn to_bytes(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(buf) => Bytes::from(buf),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize response envelope");
                Bytes::new()
            }
        }
    }

    /// Parse an envelope received from the wire.
    ///
    /// A success envelope without a `Data` key is read as carrying `null`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut response: Response = serde_json::from_slice(bytes)?;
        if response.success {
            response.data.get_or_insert(Value::Null);
            response.error_message = None;
        } else {
            response.data = None;
            response.error_message.get_or_insert_with(String::new);
        }
        Ok(response)
    }

    /// Convert into a plain `Result` for client code.
    pub fn into_result(self) -> Result<Value, String> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self.error_message.unwrap_or_default())
        }
    }
}
