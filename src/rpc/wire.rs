//! JSON-RPC 2.0 wire types
//!
//! The daemon speaks newline-delimited JSON-RPC 2.0 text:
//! ```text
//! {"jsonrpc":"2.0","method":"send","params":{...},"id":"<uuid>"}
//! {"jsonrpc":"2.0","id":"<uuid>","result":{...}}
//! {"jsonrpc":"2.0","method":"receive","params":{...}}
//! ```
//! One message per line. A message with an `id` and a `result` or
//! `error` is a response; a message with a `method` and no `id` is a
//! notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Protocol version sent with every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC request
#[derive(Debug, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: String,
}

impl Request {
    pub fn new(method: &str, params: Option<Value>, id: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
            id,
        }
    }

    /// Serialize to a single wire line (no trailing newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Response {
    /// Correlation token as a string, if the daemon echoed one back
    pub fn id_str(&self) -> Option<&str> {
        self.id.as_str()
    }

    /// Convert into the call outcome, enforcing the result-xor-error
    /// contract
    pub fn into_outcome(self) -> Result<Value> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error.into_error()),
            (Some(_), Some(_)) => Err(Error::Protocol(
                "response carries both result and error".to_string(),
            )),
            // A bare acknowledgement; treat as null result
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Structured error object reported by the daemon
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Error code the daemon uses to signal throttling
const RATE_LIMIT_CODE: i64 = -429;

impl RpcError {
    /// Map a daemon error object to our error taxonomy
    ///
    /// Rate-limit signals become [`Error::RateLimited`] with the
    /// retry-after hint when the error data carries one; everything
    /// else preserves the daemon's code and message.
    pub fn into_error(self) -> Error {
        let retry_after = self
            .data
            .as_ref()
            .and_then(|d| d.get("retryAfter"))
            .and_then(|v| v.as_u64())
            .map(std::time::Duration::from_secs);

        if self.code == RATE_LIMIT_CODE || retry_after.is_some() {
            Error::RateLimited { retry_after }
        } else {
            Error::Daemon {
                code: self.code,
                message: self.message,
            }
        }
    }
}

/// Inbound JSON-RPC notification (no id)
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// One classified inbound wire line
#[derive(Debug)]
pub enum Inbound {
    Response(Response),
    Notification(Notification),
}

/// Parse and classify a single wire line
///
/// A line with an `id` is a response to one of our requests; a line
/// with a `method` but no `id` is a daemon-initiated notification.
pub fn parse_line(line: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| Error::Parse(format!("{e}: {line}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::Parse(format!("not a JSON object: {line}")))?;

    if obj.contains_key("id") && !obj["id"].is_null() {
        let response: Response = serde_json::from_value(value.clone())
            .map_err(|e| Error::Parse(format!("malformed response: {e}")))?;
        Ok(Inbound::Response(response))
    } else if obj.contains_key("method") {
        let notification: Notification = serde_json::from_value(value.clone())
            .map_err(|e| Error::Parse(format!("malformed notification: {e}")))?;
        Ok(Inbound::Notification(notification))
    } else {
        Err(Error::Parse(format!(
            "message is neither response nor notification: {line}"
        )))
    }
}
