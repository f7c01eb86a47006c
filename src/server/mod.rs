//! Downstream MCP server: republishes the namespaced catalog as a single
//! MCP server speaking JSON-RPC envelopes over `POST /mcp`.

use serde_json::Value;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::HubError;
use crate::plugin::Manager;
use crate::protocol::{
    mcp, JsonRpcId, JsonRpcMessage, JsonRpcV2Message, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};

pub fn route(
    manager: Arc<Manager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("mcp")
        .and(warp::post())
        .and(warp::body::json())
        .and(warp::any().map(move || manager.clone()))
        .and_then(handle)
}

async fn handle(body: Value, manager: Arc<Manager>) -> Result<warp::reply::Response, Rejection> {
    let message: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(message) => message,
        Err(_) => {
            // Malformed envelope: JSON-RPC requires an error with a null id.
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": PARSE_ERROR, "message": "invalid JSON-RPC envelope" }
            });
            return Ok(
                warp::reply::with_status(warp::reply::json(&reply), StatusCode::BAD_REQUEST)
                    .into_response(),
            );
        }
    };

    match message {
        JsonRpcMessage::V2(JsonRpcV2Message::Request(request)) => {
            let reply = dispatch(request.id, &request.method, request.params, &manager).await;
            Ok(warp::reply::json(&reply).into_response())
        }
        JsonRpcMessage::V2(JsonRpcV2Message::Notification(_)) => {
            // Notifications have no reply.
            Ok(StatusCode::ACCEPTED.into_response())
        }
        JsonRpcMessage::V2(JsonRpcV2Message::Response(response)) => {
            let reply = JsonRpcMessage::error_response(
                response.id,
                INVALID_REQUEST,
                "unexpected response envelope",
            );
            Ok(
                warp::reply::with_status(warp::reply::json(&reply), StatusCode::BAD_REQUEST)
                    .into_response(),
            )
        }
    }
}

async fn dispatch(
    id: JsonRpcId,
    method: &str,
    params: Option<Value>,
    manager: &Arc<Manager>,
) -> JsonRpcMessage {
    match method {
        mcp::INITIALIZE_METHOD => JsonRpcMessage::response(
            id,
            serde_json::json!({
                "protocolVersion": mcp::PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": true } },
                "serverInfo": {
                    "name": "mcp-hub",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        mcp::LIST_TOOLS_METHOD => {
            // The registry keeps no peer schemas, so re-exported tools carry
            // a permissive object schema.
            let tools: Vec<Value> = manager
                .registry()
                .list()
                .await
                .into_iter()
                .map(|tool| {
                    let mut descriptor = serde_json::json!({
                        "name": tool.id,
                        "inputSchema": { "type": "object" },
                    });
                    if let Some(description) = tool.description {
                        descriptor["description"] = Value::String(description);
                    }
                    descriptor
                })
                .collect();
            JsonRpcMessage::response(id, serde_json::json!({ "tools": tools }))
        }
        mcp::CALL_TOOL_METHOD => call_tool(id, params, manager).await,
        _ => JsonRpcMessage::error_response(id, METHOD_NOT_FOUND, "method not supported"),
    }
}

async fn call_tool(id: JsonRpcId, params: Option<Value>, manager: &Arc<Manager>) -> JsonRpcMessage {
    let params: mcp::CallToolParams = match params.map(serde_json::from_value) {
        Some(Ok(params)) => params,
        _ => return JsonRpcMessage::error_response(id, INVALID_PARAMS, "invalid tools/call params"),
    };

    let (plugin_id, tool_name) = match split_namespaced(&params.name, manager).await {
        Ok(split) => split,
        Err(message) => return JsonRpcMessage::error_response(id, INVALID_PARAMS, &message),
    };

    match manager.execute(&plugin_id, &tool_name, params.arguments).await {
        Ok(raw) => JsonRpcMessage::response(id, raw),
        // A peer isError result stays an MCP result; callers inspect the
        // isError flag, not the JSON-RPC error channel.
        Err(HubError::Tool(raw)) => JsonRpcMessage::response(id, raw),
        Err(e) => JsonRpcMessage::error_response(id, INTERNAL_ERROR, &e.to_string()),
    }
}

/// Resolve `<plugin>:<tool>`. An un-namespaced name is accepted only when
/// exactly one server is running.
async fn split_namespaced(
    name: &str,
    manager: &Arc<Manager>,
) -> std::result::Result<(String, String), String> {
    if let Some((plugin_id, tool_name)) = name.split_once(':') {
        return Ok((plugin_id.to_string(), tool_name.to_string()));
    }

    let servers = manager.list_servers().await;
    if servers.len() == 1 {
        Ok((servers[0].clone(), name.to_string()))
    } else {
        Err("tool name must be namespaced as <plugin>:<tool>".to_string())
    }
}
