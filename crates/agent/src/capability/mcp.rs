use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use supportline_core::domain::tool::{
    FailureKind, Operation, Params, ToolFailure, ToolPayload, ToolResult,
};
use tracing::debug;

use super::transport::CapabilityTransport;

/// JSON-RPC 2.0 `tools/call` transport over HTTP.
pub struct JsonRpcTransport {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()?;
        Ok(Self { http, endpoint: endpoint.into(), next_id: AtomicU64::new(1) })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Names of the tools the provider advertises through `tools/list`.
    pub async fn list_tools(&self) -> Result<Vec<String>, ToolFailure> {
        let payload = self.post("tools/list", json!({})).await?;
        if let Some(error) = payload.get("error") {
            return Err(rpc_error_failure(error));
        }

        let tools = payload
            .pointer("/result/tools")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ToolFailure::new(FailureKind::Rejected, "tools/list reply had no tool list")
            })?;

        Ok(tools
            .iter()
            .filter_map(|tool| tool.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn post(&self, method: &str, params: Value) -> Result<Value, ToolFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": id });

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| send_failure(&error))?;

        let status = response.status();
        debug!(method, rpc_id = id, status = status.as_u16(), "capability provider replied");
        if !status.is_success() {
            return Err(ToolFailure::new(
                classify_status(status.as_u16()),
                format!("capability provider returned HTTP {}", status.as_u16()),
            ));
        }

        response.json::<Value>().await.map_err(|error| {
            ToolFailure::new(FailureKind::Transient, format!("unreadable provider reply: {error}"))
        })
    }
}

#[async_trait]
impl CapabilityTransport for JsonRpcTransport {
    async fn call(&self, operation: Operation, params: &Params) -> ToolResult {
        let arguments = Value::Object(params.clone().into_iter().collect());
        let payload = json!({ "name": operation.name(), "arguments": arguments });

        match self.post("tools/call", payload).await {
            Ok(reply) => interpret_reply(&reply),
            Err(failure) => ToolResult::Failure(failure),
        }
    }
}

fn send_failure(error: &reqwest::Error) -> ToolFailure {
    let kind = if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::Unreachable
    } else {
        FailureKind::Transient
    };
    ToolFailure::new(kind, error.to_string())
}

pub fn classify_status(status: u16) -> FailureKind {
    match status {
        429 | 500..=599 => FailureKind::Transient,
        400 | 422 => FailureKind::Validation,
        401 | 403 => FailureKind::InvalidCredentials,
        _ => FailureKind::Rejected,
    }
}

/// Maps a provider error message onto a failure kind.
pub fn classify_message(message: &str) -> FailureKind {
    let normalized = message.to_ascii_lowercase();
    if normalized.contains("not found") || normalized.contains("no such") {
        FailureKind::NotFound
    } else if normalized.contains("invalid pin")
        || normalized.contains("invalid credentials")
        || normalized.contains("unauthorized")
        || normalized.contains("authentication")
    {
        FailureKind::InvalidCredentials
    } else if normalized.contains("invalid") || normalized.contains("required") {
        FailureKind::Validation
    } else if normalized.contains("timeout") || normalized.contains("temporar") {
        FailureKind::Transient
    } else {
        FailureKind::Rejected
    }
}

fn rpc_error_failure(error: &Value) -> ToolFailure {
    let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown provider error");
    let kind = match error.get("code").and_then(Value::as_i64) {
        Some(-32602) => FailureKind::Validation,
        Some(-32601) => FailureKind::Rejected,
        _ => classify_message(message),
    };
    ToolFailure::new(kind, message)
}

/// Reads a `tools/call` reply: `structuredContent.result` first, then the
/// first content block's text, then the raw result.
pub fn interpret_reply(reply: &Value) -> ToolResult {
    if let Some(error) = reply.get("error") {
        return ToolResult::Failure(rpc_error_failure(error));
    }

    let result = match reply.get("result") {
        Some(result) if !result.is_null() => result,
        _ => return ToolResult::failure(FailureKind::Rejected, "provider reply had no result"),
    };

    let structured = result.get("structuredContent").filter(|value| !value.is_null());
    let text = structured
        .and_then(|content| content.get("result"))
        .map(value_text)
        .or_else(|| {
            result.pointer("/content/0/text").and_then(Value::as_str).map(str::to_string)
        })
        .unwrap_or_else(|| result.to_string());

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return ToolResult::failure(classify_message(&text), text);
    }

    let mut payload = ToolPayload::text(text);
    if let Some(structured) = structured {
        let value = match structured.get("result") {
            Some(inner) if inner.is_object() || inner.is_array() => inner.clone(),
            _ => structured.clone(),
        };
        payload = payload.with_structured(value);
    }
    ToolResult::Success(payload)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use supportline_core::domain::tool::{FailureKind, ToolResult};

    use super::{classify_message, classify_status, interpret_reply};

    #[test]
    fn structured_content_wins_over_text_blocks() {
        let reply = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "structuredContent": {"result": "Customer: Ana\nID: 3f2a-9c1d"},
                "content": [{"type": "text", "text": "ignored"}]
            }
        });

        let result = interpret_reply(&reply);
        let payload = result.payload().expect("success");
        assert_eq!(payload.text, "Customer: Ana\nID: 3f2a-9c1d");
        assert_eq!(payload.customer_id().map(|id| id.0), Some("3f2a-9c1d".to_string()));
    }

    #[test]
    fn falls_back_to_first_text_block_then_raw_result() {
        let text_block =
            json!({"result": {"content": [{"type": "text", "text": "Found 3 orders"}]}});
        assert_eq!(
            interpret_reply(&text_block).payload().map(|payload| payload.text.as_str()),
            Some("Found 3 orders")
        );

        let raw = json!({"result": {"orders": 0}});
        assert_eq!(
            interpret_reply(&raw).payload().map(|payload| payload.text.as_str()),
            Some("{\"orders\":0}")
        );
    }

    #[test]
    fn rpc_errors_and_tool_errors_become_failures() {
        let invalid_params = json!({"error": {"code": -32602, "message": "bad arguments"}});
        assert_eq!(interpret_reply(&invalid_params).failure_kind(), Some(FailureKind::Validation));

        let tool_error = json!({
            "result": {"isError": true, "content": [{"type": "text", "text": "Order not found"}]}
        });
        assert_eq!(interpret_reply(&tool_error).failure_kind(), Some(FailureKind::NotFound));

        let empty = json!({"result": null});
        assert!(matches!(interpret_reply(&empty), ToolResult::Failure(_)));
    }

    #[test]
    fn http_statuses_map_to_failure_kinds() {
        assert_eq!(classify_status(429), FailureKind::Transient);
        assert_eq!(classify_status(503), FailureKind::Transient);
        assert_eq!(classify_status(422), FailureKind::Validation);
        assert_eq!(classify_status(401), FailureKind::InvalidCredentials);
        assert_eq!(classify_status(404), FailureKind::Rejected);
    }

    #[test]
    fn provider_messages_are_classified() {
        assert_eq!(classify_message("Invalid PIN for customer"), FailureKind::InvalidCredentials);
        assert_eq!(classify_message("Product not found"), FailureKind::NotFound);
        assert_eq!(classify_message("quantity is required"), FailureKind::Validation);
        assert_eq!(classify_message("temporarily overloaded"), FailureKind::Transient);
        assert_eq!(classify_message("out of stock"), FailureKind::Rejected);
    }
}
