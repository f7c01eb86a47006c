//! The request/response HTTP transport against real endpoints: plain round
//! trips, the GET fallback for initialize, peer failures, and deadlines.

use std::net::SocketAddr;
use std::time::Duration;
use warp::http::StatusCode;
use warp::Filter;

use mcp_hub::config::ServerEntry;
use mcp_hub::error::HubError;
use mcp_hub::protocol::{mcp, JsonRpcId};
use mcp_hub::transport::{self, Transport};

fn http_entry(addr: SocketAddr, timeout: u64) -> ServerEntry {
    serde_json::from_value(serde_json::json!({
        "type": "http",
        "url": format!("http://{addr}/"),
        "timeout": timeout
    }))
    .unwrap()
}

fn scripted_reply(body: &serde_json::Value) -> serde_json::Value {
    let id = body["id"].clone();
    match body["method"].as_str() {
        Some(mcp::INITIALIZE_METHOD) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": mcp::PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "http-peer", "version": "0.1.0" }
            }
        }),
        Some(mcp::LIST_TOOLS_METHOD) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": [{ "name": "ping", "inputSchema": { "type": "object" } }] }
        }),
        Some(mcp::CALL_TOOL_METHOD) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "content": [{ "type": "text", "text": "pong" }] }
        }),
        _ => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "method not found" }
        }),
    }
}

#[tokio::test]
async fn requests_round_trip_over_post() {
    let route = warp::post()
        .and(warp::path::end())
        .and(warp::body::json())
        .map(|body: serde_json::Value| warp::reply::json(&scripted_reply(&body)));
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let transport = transport::for_entry("http-peer", &http_entry(addr, 5)).unwrap();
    transport.open(Duration::from_secs(5)).await.unwrap();
    assert!(transport.connected());

    let reply = transport
        .request(
            mcp::call_tool_request(JsonRpcId::Number(1), "ping", None),
            Duration::from_secs(5),
        )
        .await
        .unwrap()
        .into_response()
        .unwrap();
    assert_eq!(reply.result.unwrap()["content"][0]["text"], "pong");

    transport.close().await;
    assert!(!transport.connected());
}

#[tokio::test]
async fn initialize_falls_back_to_get_on_405() {
    let post = warp::post()
        .and(warp::path::end())
        .map(|| warp::reply::with_status(warp::reply(), StatusCode::METHOD_NOT_ALLOWED));
    let get = warp::get().and(warp::path::end()).map(|| {
        warp::reply::json(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": mcp::PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": { "name": "get-only", "version": "0.1.0" }
            }
        }))
    });
    let (addr, server) = warp::serve(post.or(get)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let transport = transport::for_entry("get-only", &http_entry(addr, 5)).unwrap();
    transport.open(Duration::from_secs(5)).await.unwrap();

    let client = mcp::Implementation {
        name: "mcp-hub".to_string(),
        version: "0.0.0".to_string(),
    };
    let reply = transport
        .request(
            mcp::initialize_request(JsonRpcId::Number(1), &client),
            Duration::from_secs(5),
        )
        .await
        .unwrap()
        .into_response()
        .unwrap();
    assert_eq!(
        reply.result.unwrap()["serverInfo"]["name"],
        "get-only"
    );

    // The fallback is for initialize only; everything else surfaces the 405.
    let err = transport
        .request(
            mcp::list_tools_request(JsonRpcId::Number(2)),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PeerError");

    transport.close().await;
}

#[tokio::test]
async fn peer_failure_statuses_surface_as_peer_errors() {
    let route = warp::post().and(warp::path::end()).map(|| {
        warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "error": "boom" })),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let transport = transport::for_entry("broken", &http_entry(addr, 5)).unwrap();
    transport.open(Duration::from_secs(5)).await.unwrap();

    let err = transport
        .request(
            mcp::list_tools_request(JsonRpcId::Number(1)),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PeerError");
}

#[tokio::test]
async fn a_slow_peer_hits_the_transport_deadline() {
    let route = warp::post()
        .and(warp::path::end())
        .and(warp::body::json())
        .and_then(|body: serde_json::Value| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, warp::Rejection>(warp::reply::json(&scripted_reply(&body)))
        });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let transport = transport::for_entry("sleepy", &http_entry(addr, 1)).unwrap();
    transport.open(Duration::from_secs(5)).await.unwrap();

    let started = std::time::Instant::now();
    let err = transport
        .request(
            mcp::list_tools_request(JsonRpcId::Number(1)),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, HubError::Timeout));
    assert!(elapsed >= Duration::from_millis(900), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1800), "fired late: {elapsed:?}");

    transport.close().await;

    // Requests after close fail closed.
    let err = transport
        .request(
            mcp::list_tools_request(JsonRpcId::Number(2)),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "TransportClosed");
}
