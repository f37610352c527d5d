//! # Message Bus
//!
//! In-process request/response routing and pub/sub between modules and
//! the external RPC surface. Channels register under an alias; their
//! events and actions are namespaced as `alias:name` and must be unique
//! across the bus.
//!
//! Requests and responses use the JSON-RPC 2.0 envelope. The IPC, WS,
//! and HTTP front-ends that would carry these envelopes across process
//! boundaries are out of scope; only the message shape and the
//! in-process routing live here.
//!
//! ## Ordering
//!
//! `publish` delivers a notification to subscribers synchronously, in
//! subscription order. Events published by one producer are therefore
//! observed in program order by every subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

// ---------------------------------------------------------------------------
// JSON-RPC envelope
// ---------------------------------------------------------------------------

/// JSON-RPC error codes used on the bus boundary.
pub const ERR_INVALID_REQUEST: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Bus registration and invocation failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("channel {0} is already registered")]
    DuplicateChannel(String),

    #[error("event {0} is already registered")]
    DuplicateEvent(String),

    #[error("action {0} is already registered")]
    DuplicateAction(String),

    #[error("event {0} is not registered")]
    UnknownEvent(String),

    #[error("method {0} is not registered")]
    UnknownMethod(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BusError {
    /// The JSON-RPC code this error maps onto.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownMethod(_) => ERR_METHOD_NOT_FOUND,
            Self::InvalidParams(_) => ERR_INVALID_PARAMS,
            Self::InvalidRequest(_) => ERR_INVALID_REQUEST,
            _ => ERR_INTERNAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// An action handler: resolves request params to a result.
pub type ActionHandler = Arc<dyn Fn(&Value) -> Result<Value, BusError> + Send + Sync>;

/// A subscription callback.
type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscriber {
    callback: EventCallback,
    /// `once` subscribers flip this on first delivery and are pruned.
    fired: Option<AtomicBool>,
}

/// The in-process message bus.
#[derive(Default)]
pub struct Bus {
    channels: RwLock<HashSet<String>>,
    events: RwLock<HashSet<String>>,
    actions: RwLock<HashMap<String, ActionHandler>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel: its alias, the events it may publish, and its
    /// invocable actions. Every name is namespaced as `alias:name` and
    /// must be unique across the bus.
    pub fn register_channel(
        &self,
        alias: &str,
        events: &[&str],
        actions: Vec<(&str, ActionHandler)>,
    ) -> Result<(), BusError> {
        let mut channels = self.channels.write();
        if !channels.insert(alias.to_string()) {
            return Err(BusError::DuplicateChannel(alias.to_string()));
        }

        let mut registered_events = self.events.write();
        for event in events {
            let full = format!("{alias}:{event}");
            if !registered_events.insert(full.clone()) {
                return Err(BusError::DuplicateEvent(full));
            }
        }

        let mut registered_actions = self.actions.write();
        for (action, handler) in actions {
            let full = format!("{alias}:{action}");
            if registered_actions.contains_key(&full) {
                return Err(BusError::DuplicateAction(full));
            }
            registered_actions.insert(full, handler);
        }
        Ok(())
    }

    /// Resolve a JSON-RPC request against the registered actions.
    pub fn invoke(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::failure(
                request.id.clone(),
                ERR_INVALID_REQUEST,
                "jsonrpc must be \"2.0\"".to_string(),
            );
        }
        let handler = {
            let actions = self.actions.read();
            actions.get(&request.method).cloned()
        };
        let Some(handler) = handler else {
            return JsonRpcResponse::failure(
                request.id.clone(),
                ERR_METHOD_NOT_FOUND,
                format!("method {} is not registered", request.method),
            );
        };
        match handler(&request.params) {
            Ok(result) => JsonRpcResponse::success(request.id.clone(), result),
            Err(error) => {
                JsonRpcResponse::failure(request.id.clone(), error.code(), error.to_string())
            }
        }
    }

    /// Resolve a raw JSON request string. Malformed JSON yields an
    /// invalid-request response with a null id.
    pub fn invoke_raw(&self, raw: &str) -> JsonRpcResponse {
        match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => self.invoke(&request),
            Err(error) => JsonRpcResponse::failure(
                Value::Null,
                ERR_INVALID_REQUEST,
                format!("malformed request: {error}"),
            ),
        }
    }

    /// Publish a notification to all subscribers of `event`, in
    /// subscription order. The event must have been registered by its
    /// producing channel.
    pub fn publish(&self, event: &str, payload: &Value) -> Result<(), BusError> {
        if !self.events.read().contains(event) {
            return Err(BusError::UnknownEvent(event.to_string()));
        }
        trace!(event, "publishing");

        let callbacks: Vec<EventCallback> = {
            let mut subscribers = self.subscribers.write();
            let Some(list) = subscribers.get_mut(event) else {
                return Ok(());
            };
            let callbacks = list
                .iter()
                .filter(|s| match &s.fired {
                    Some(fired) => !fired.swap(true, Ordering::SeqCst),
                    None => true,
                })
                .map(|s| Arc::clone(&s.callback))
                .collect();
            list.retain(|s| match &s.fired {
                Some(fired) => !fired.load(Ordering::SeqCst),
                None => true,
            });
            callbacks
        };

        for callback in callbacks {
            callback(payload);
        }
        Ok(())
    }

    /// Subscribe to every future publication of `event`.
    pub fn subscribe<F>(&self, event: &str, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Subscriber {
                callback: Arc::new(callback),
                fired: None,
            });
    }

    /// Subscribe to the next publication of `event` only.
    pub fn once<F>(&self, event: &str, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Subscriber {
                callback: Arc::new(callback),
                fired: Some(AtomicBool::new(false)),
            });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn echo_handler() -> ActionHandler {
        Arc::new(|params: &Value| Ok(params.clone()))
    }

    #[test]
    fn invoke_routes_to_registered_action() {
        let bus = Bus::new();
        bus.register_channel("app", &[], vec![("echo", echo_handler())])
            .unwrap();

        let request = JsonRpcRequest::new(1, "app:echo", json!({ "x": 42 }));
        let response = bus.invoke(&request);
        assert_eq!(response.result, Some(json!({ "x": 42 })));
        assert_eq!(response.id, json!(1));
        assert!(response.error.is_none());
    }

    #[test]
    fn invoke_unknown_method_is_32601() {
        let bus = Bus::new();
        let request = JsonRpcRequest::new(7, "app:nothing", Value::Null);
        let response = bus.invoke(&request);
        assert_eq!(response.error.unwrap().code, ERR_METHOD_NOT_FOUND);
    }

    #[test]
    fn invoke_wrong_version_is_32600() {
        let bus = Bus::new();
        let mut request = JsonRpcRequest::new(1, "app:echo", Value::Null);
        request.jsonrpc = "1.0".to_string();
        let response = bus.invoke(&request);
        assert_eq!(response.error.unwrap().code, ERR_INVALID_REQUEST);
    }

    #[test]
    fn invoke_raw_handles_malformed_json() {
        let bus = Bus::new();
        let response = bus.invoke_raw("{not json");
        assert_eq!(response.error.unwrap().code, ERR_INVALID_REQUEST);
        assert_eq!(response.id, Value::Null);
    }

    #[test]
    fn handler_error_maps_to_code() {
        let bus = Bus::new();
        let failing: ActionHandler =
            Arc::new(|_| Err(BusError::InvalidParams("missing address".into())));
        bus.register_channel("app", &[], vec![("get", failing)])
            .unwrap();

        let response = bus.invoke(&JsonRpcRequest::new(1, "app:get", Value::Null));
        assert_eq!(response.error.unwrap().code, ERR_INVALID_PARAMS);
    }

    #[test]
    fn duplicate_channel_rejected() {
        let bus = Bus::new();
        bus.register_channel("app", &[], vec![]).unwrap();
        assert!(matches!(
            bus.register_channel("app", &[], vec![]),
            Err(BusError::DuplicateChannel(_))
        ));
    }

    #[test]
    fn duplicate_event_rejected() {
        let bus = Bus::new();
        bus.register_channel("a", &["block:new"], vec![]).unwrap();
        // Different channel, same alias-qualified name cannot happen;
        // duplicate within one registration can.
        assert!(matches!(
            bus.register_channel("b", &["x", "x"], vec![]),
            Err(BusError::DuplicateEvent(_))
        ));
    }

    #[test]
    fn publish_requires_registration() {
        let bus = Bus::new();
        assert!(matches!(
            bus.publish("app:block:new", &json!({})),
            Err(BusError::UnknownEvent(_))
        ));
    }

    #[test]
    fn publish_delivers_in_subscription_order() {
        let bus = Bus::new();
        bus.register_channel("app", &["tick"], vec![]).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 1..=3u8 {
            let order = Arc::clone(&order);
            bus.subscribe("app:tick", move |_| order.lock().push(tag));
        }
        bus.publish("app:tick", &json!({})).unwrap();
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn once_fires_exactly_once() {
        let bus = Bus::new();
        bus.register_channel("app", &["tick"], vec![]).unwrap();

        let count = Arc::new(Mutex::new(0u32));
        {
            let count = Arc::clone(&count);
            bus.once("app:tick", move |_| *count.lock() += 1);
        }
        bus.publish("app:tick", &json!({})).unwrap();
        bus.publish("app:tick", &json!({})).unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn subscribers_see_payload() {
        let bus = Bus::new();
        bus.register_channel("app", &["block:new"], vec![]).unwrap();

        let seen = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe("app:block:new", move |payload| {
                *seen.lock() = Some(payload.clone());
            });
        }
        bus.publish("app:block:new", &json!({ "height": 9 })).unwrap();
        assert_eq!(*seen.lock(), Some(json!({ "height": 9 })));
    }

    #[test]
    fn response_envelope_serializes_cleanly() {
        let response = JsonRpcResponse::success(json!(5), json!("ok"));
        let text = serde_json::to_string(&response).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":5,"result":"ok"}"#);

        let failure = JsonRpcResponse::failure(json!(6), ERR_INTERNAL, "boom".into());
        let text = serde_json::to_string(&failure).unwrap();
        assert!(text.contains(r#""code":-32603"#));
        assert!(!text.contains("result"));
    }
}
