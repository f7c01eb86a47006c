use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod mcp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "jsonrpc")]
pub enum JsonRpcMessage {
    #[serde(rename = "2.0")]
    V2(JsonRpcV2Message),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcV2Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub id: JsonRpcId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub id: JsonRpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

impl JsonRpcMessage {
    pub fn request(id: JsonRpcId, method: &str, params: Option<Value>) -> Self {
        JsonRpcMessage::V2(JsonRpcV2Message::Request(JsonRpcRequest {
            id,
            method: method.to_string(),
            params,
        }))
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        JsonRpcMessage::V2(JsonRpcV2Message::Notification(JsonRpcNotification {
            method: method.to_string(),
            params,
        }))
    }

    pub fn response(id: JsonRpcId, result: Value) -> Self {
        JsonRpcMessage::V2(JsonRpcV2Message::Response(JsonRpcResponse {
            id,
            result: Some(result),
            error: None,
        }))
    }

    pub fn error_response(id: JsonRpcId, code: i64, message: &str) -> Self {
        JsonRpcMessage::V2(JsonRpcV2Message::Response(JsonRpcResponse {
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }))
    }

    /// Correlation id, if this message carries one.
    pub fn id(&self) -> Option<&JsonRpcId> {
        match self {
            JsonRpcMessage::V2(JsonRpcV2Message::Request(req)) => Some(&req.id),
            JsonRpcMessage::V2(JsonRpcV2Message::Response(resp)) => Some(&resp.id),
            JsonRpcMessage::V2(JsonRpcV2Message::Notification(_)) => None,
        }
    }

    pub fn as_response(&self) -> Option<&JsonRpcResponse> {
        match self {
            JsonRpcMessage::V2(JsonRpcV2Message::Response(resp)) => Some(resp),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<JsonRpcResponse> {
        match self {
            JsonRpcMessage::V2(JsonRpcV2Message::Response(resp)) => Some(resp),
            _ => None,
        }
    }
}
