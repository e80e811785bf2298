//! The example service: routes requests by their HTTP-style `method` field.

use rpcnats_lite::HandlerError;
use rpcnats_lite::transport::InboundMessage;
use serde::Deserialize;
use serde_json::{Map, Value, json};

const METHODS: [&str; 6] = ["OPTIONS", "GET", "POST", "PATCH", "PUT", "DELETE"];

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    method: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Handle one request.
///
/// The payload must be a JSON object with a string `method`. Recognized
/// methods are acknowledged; anything else is an `invalid http method` error.
pub async fn route_method(msg: InboundMessage) -> Result<Value, HandlerError> {
    let request: Request = msg.json()?;

    let method = match request.method {
        Some(Value::String(method)) => method.to_uppercase(),
        _ => return Err("missing method".into()),
    };

    if !METHODS.contains(&method.as_str()) {
        return Err("invalid http method".into());
    }

    tracing::debug!(method = %method, subject = %msg.subject, "Handling request");

    Ok(json!({
        "method": method,
        "handled": true,
        "params": request.rest,
    }))
}
