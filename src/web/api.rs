use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::HubError;
use crate::plugin::Manager;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub plugin_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

pub fn routes(
    manager: Arc<Manager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let tools = warp::path!("mcp" / "tools")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(list_tools);

    let execute = warp::path!("mcp" / "execute")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_manager(manager.clone()))
        .and_then(execute_tool);

    let servers = warp::path!("mcp" / "servers")
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(list_servers);

    tools.or(execute).or(servers)
}

fn with_manager(
    manager: Arc<Manager>,
) -> impl Filter<Extract = (Arc<Manager>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

async fn list_tools(manager: Arc<Manager>) -> Result<impl Reply, Rejection> {
    let tools = manager.registry().list().await;
    Ok(warp::reply::json(&tools))
}

async fn execute_tool(
    request: ExecuteRequest,
    manager: Arc<Manager>,
) -> Result<impl Reply, Rejection> {
    match manager
        .execute(&request.plugin_id, &request.tool_name, request.arguments)
        .await
    {
        Ok(raw) => Ok(warp::reply::with_status(
            warp::reply::json(&raw),
            StatusCode::OK,
        )),
        Err(e) => {
            let (status, body) = error_reply(&e);
            Ok(warp::reply::with_status(warp::reply::json(&body), status))
        }
    }
}

async fn list_servers(manager: Arc<Manager>) -> Result<impl Reply, Rejection> {
    let servers = manager.list_servers().await;
    Ok(warp::reply::json(&serde_json::json!({ "servers": servers })))
}

/// Map a hub error to an HTTP status and body. A peer tool error is non-2xx
/// but still carries the raw MCP result so callers can inspect its content.
pub fn error_reply(error: &HubError) -> (StatusCode, Value) {
    match error {
        HubError::Tool(raw) => (StatusCode::BAD_GATEWAY, raw.clone()),
        HubError::ServerNotFound(_) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": error.to_string(), "kind": error.kind() }),
        ),
        HubError::AlreadyRunning(_) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": error.to_string(), "kind": error.kind() }),
        ),
        HubError::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            serde_json::json!({ "error": error.to_string(), "kind": error.kind() }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": error.to_string(), "kind": error.kind() }),
        ),
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod api_tests;
