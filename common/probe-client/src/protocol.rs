//! JSON-RPC 2.0 wire format spoken by the probe
//!
//! Requests always carry an object `params` and a positive integer `id`.
//! Anything inbound that does not resolve a pending id is a notification.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ProbeError;

/// Notification sent for every emission of a subscribed signal
pub const SIGNAL_EMITTED: &str = "qtmcp.signalEmitted";
/// Notification sent when lifecycle tracking sees a new object
pub const OBJECT_CREATED: &str = "qtmcp.objectCreated";
/// Notification sent when lifecycle tracking sees an object go away
pub const OBJECT_DESTROYED: &str = "qtmcp.objectDestroyed";
/// Notification sent by the global input-event filter
pub const EVENT_CAPTURED: &str = "qtmcp.eventCaptured";

/// Outbound request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl RpcRequest {
    /// Build a request, substituting an empty object for absent params
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        let params = match params {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value) => value,
        };
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// Integer id of an inbound message, if it has one
pub fn message_id(msg: &Value) -> Option<u64> {
    msg.get("id").and_then(Value::as_u64)
}

/// Outcome of a response frame: `error` wins over `result`
pub fn response_outcome(msg: &Value) -> Result<Value, ProbeError> {
    if let Some(error) = msg.get("error") {
        return Err(ProbeError::from_jsonrpc(error));
    }
    Ok(msg.get("result").cloned().unwrap_or_else(|| json!({})))
}

/// Method name and params of a notification frame
pub fn notification_parts(msg: &Value) -> (String, Value) {
    let method = msg
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = match msg.get("params") {
        None | Some(Value::Null) => json!({}),
        Some(params) => params.clone(),
    };
    (method, params)
}

/// Strip the probe's `{"meta": .., "result": ..}` envelope when present
pub fn unwrap_envelope(value: &Value) -> &Value {
    value.get("result").unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_params_to_empty_object() {
        let req = RpcRequest::new(1, "qt.ping", None);
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(
            wire,
            json!({"jsonrpc": "2.0", "method": "qt.ping", "params": {}, "id": 1})
        );
    }

    #[test]
    fn test_request_survives_wire() {
        let req = RpcRequest::new(7, "qt.objects.find", Some(json!({"name": "okBtn"})));
        let text = serde_json::to_string(&req).unwrap();
        let parsed: RpcRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_response_outcome_result_and_error() {
        let ok = response_outcome(&json!({"result": {"pong": true}, "id": 1})).unwrap();
        assert_eq!(ok, json!({"pong": true}));

        let empty = response_outcome(&json!({"id": 2})).unwrap();
        assert_eq!(empty, json!({}));

        let err = response_outcome(&json!({
            "error": {"code": -32000, "message": "Object not found"},
            "id": 3
        }))
        .unwrap_err();
        assert_eq!(err.code(), Some(-32000));
    }

    #[test]
    fn test_notification_parts_default_params() {
        let (method, params) = notification_parts(&json!({"method": "qtmcp.objectDestroyed"}));
        assert_eq!(method, OBJECT_DESTROYED);
        assert_eq!(params, json!({}));
    }

    #[test]
    fn test_message_id_ignores_non_integer_ids() {
        assert_eq!(message_id(&json!({"id": 4})), Some(4));
        assert_eq!(message_id(&json!({"id": "4"})), None);
        assert_eq!(message_id(&json!({"method": "x"})), None);
    }

    #[test]
    fn test_unwrap_envelope() {
        let wrapped = json!({"meta": {"v": 1}, "result": {"className": "QPushButton"}});
        assert_eq!(unwrap_envelope(&wrapped)["className"], "QPushButton");
        let bare = json!({"className": "QLabel"});
        assert_eq!(unwrap_envelope(&bare)["className"], "QLabel");
    }
}
