// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: MCP_ROUTER

use crate::scan::{CancelToken, ScanInvoker};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SCAN_TOOL: &str = "scan_docker_with_prisma";

const SCAN_TOOL_DESCRIPTION: &str = "This server will in-take docker id and scan the container for vulnerabilities. \
It will return a JSON object with the scan results. \
It will scan using Twistlock/Prisma cli tool";

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id are notifications and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub id: Option<Value>,
}

pub struct Router {
    scanner: Arc<ScanInvoker>,
    in_flight: Mutex<HashMap<String, CancelToken>>,
}

impl Router {
    pub fn new(scanner: Arc<ScanInvoker>) -> Self {
        Self {
            scanner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle_request(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => json_rpc_ok(
                req.id.clone(),
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": get_server_capabilities(),
                    "serverInfo": {
                        "name": "prismascan",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => json_rpc_ok(req.id.clone(), json!({})),
            "notifications/initialized" => json_rpc_ok(req.id.clone(), json!({})),
            "notifications/cancelled" => {
                let target = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("requestId"))
                    .map(request_key);
                if let Some(key) = target {
                    self.cancel(&key);
                }
                json_rpc_ok(req.id.clone(), json!({}))
            }
            "tools/list" => json_rpc_ok(
                req.id.clone(),
                json!({
                    "tools": [
                        {
                            "name": SCAN_TOOL,
                            "description": SCAN_TOOL_DESCRIPTION,
                            "inputSchema": {
                                "type": "object",
                                "properties": {
                                    "docker_id": {
                                        "type": "string",
                                        "description": "Image name, tag or ID to scan"
                                    }
                                },
                                "required": ["docker_id"]
                            }
                        }
                    ]
                }),
            ),
            "tools/call" => self.handle_tool_call(req),
            _ => json_rpc_error(req.id.clone(), -32601, "Method not found"),
        }
    }

    /// Registers the cancel token for a `tools/call` ahead of dispatch, so a
    /// `notifications/cancelled` read before its worker starts still lands.
    pub fn track_call(&self, req: &JsonRpcRequest) {
        if req.method == "tools/call"
            && let Some(id) = &req.id
        {
            self.token_for(&request_key(id));
        }
    }

    fn handle_tool_call(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let key = req.id.as_ref().map(request_key);
        let resp = self.dispatch_tool_call(req, key.as_deref());
        if let Some(key) = &key {
            self.unregister(key);
        }
        resp
    }

    fn dispatch_tool_call(&self, req: &JsonRpcRequest, key: Option<&str>) -> JsonRpcResponse {
        let params = match req.params.as_ref().and_then(|p| p.as_object()) {
            Some(p) => p,
            None => return json_rpc_error(req.id.clone(), -32602, "Invalid params"),
        };
        let name = match params.get("name").and_then(|n| n.as_str()) {
            Some(n) => n,
            None => return json_rpc_error(req.id.clone(), -32602, "Missing tool name"),
        };

        match name {
            SCAN_TOOL => {
                let docker_id = match params
                    .get("arguments")
                    .and_then(|a| a.get("docker_id"))
                    .and_then(|v| v.as_str())
                {
                    Some(v) => v,
                    None => {
                        return json_rpc_error(req.id.clone(), -32602, "docker_id required");
                    }
                };

                let cancel = key.map(|k| self.token_for(k)).unwrap_or_default();
                let result = self.scanner.scan_with_cancel(docker_id, &cancel);
                json_rpc_ok(req.id.clone(), scan_tool_result(result))
            }
            _ => json_rpc_error(req.id.clone(), -32601, &format!("Tool not found: {}", name)),
        }
    }

    /// The token registered under `key`, created on first use.
    fn token_for(&self, key: &str) -> CancelToken {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.entry(key.to_string()).or_default().clone(),
            Err(_) => CancelToken::new(),
        }
    }

    fn unregister(&self, key: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(key);
        }
    }

    /// Flags the scan started by request `key`, if it is still running.
    pub fn cancel(&self, key: &str) -> bool {
        let token = match self.in_flight.lock() {
            Ok(in_flight) => in_flight.get(key).cloned(),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                log::info!("Cancelling scan for request {}", key);
                token.cancel();
                true
            }
            None => {
                log::debug!("Cancel for unknown or finished request {}", key);
                false
            }
        }
    }
}

/// JSON-RPC ids may be numbers or strings; key them by their JSON text.
pub fn request_key(id: &Value) -> String {
    id.to_string()
}

/// Failures become tool results with `isError` set, never protocol errors,
/// so the client always learns which kind of failure happened.
fn scan_tool_result(result: Result<Value, crate::scan::ScanError>) -> Value {
    match result {
        Ok(report) => {
            // structuredContent must be an object.
            let text = report.to_string();
            let structured = if report.is_object() {
                report
            } else {
                json!({ "report": report })
            };
            json!({
                "content": [{ "type": "text", "text": text }],
                "structuredContent": structured,
                "isError": false
            })
        }
        Err(e) => {
            let failure = e.to_failure();
            json!({
                "content": [{ "type": "text", "text": failure.message }],
                "structuredContent": failure,
                "isError": true
            })
        }
    }
}

fn json_rpc_ok(id: Option<Value>, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result: Some(result),
        error: None,
        id,
    }
}

fn json_rpc_error(id: Option<Value>, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result: None,
        error: Some(json!({
            "code": code,
            "message": message
        })),
        id,
    }
}

fn get_server_capabilities() -> Value {
    json!({
        "tools": {
            "listChanged": false
        }
    })
}
