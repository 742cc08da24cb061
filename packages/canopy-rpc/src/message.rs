//! JSON-RPC 2.0 message shapes.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError,
    ServerNotInitialized,
    Unauthorized,
    RequestCancelled,
    ContentModified,
    ServerCancelled,
    RequestFailed,
    Other(i64),
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError => -32000,
            ErrorCode::ServerNotInitialized => -32002,
            ErrorCode::Unauthorized => -32401,
            ErrorCode::RequestCancelled => -32800,
            ErrorCode::ContentModified => -32801,
            ErrorCode::ServerCancelled => -32802,
            ErrorCode::RequestFailed => -32803,
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32000 => ErrorCode::ServerError,
            -32002 => ErrorCode::ServerNotInitialized,
            -32401 => ErrorCode::Unauthorized,
            -32800 => ErrorCode::RequestCancelled,
            -32801 => ErrorCode::ContentModified,
            -32802 => ErrorCode::ServerCancelled,
            -32803 => ErrorCode::RequestFailed,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The `error` member of an error response.
///
/// Method handlers can fail with this type (wrapped in `anyhow::Error`) to
/// choose the code and data the peer sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("method not found: {}", method))
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ResponseError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// `None` when the failing message could not be read far enough to find its id.
    pub id: Option<RequestId>,
    pub error: ResponseError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
    ResponseError(ErrorResponse),
}

impl Message {
    /// Classifies a decoded message by the members it carries.
    ///
    /// `method` with a non-null `id` is a request, `method` alone a
    /// notification. Otherwise `error` makes an error response even when
    /// `result` is also present, and `result` makes a success response.
    pub fn from_value(value: Value) -> Result<Message, serde_json::Error> {
        let Some(object) = value.as_object() else {
            return Err(serde_json::Error::custom("message is not a JSON object"));
        };
        let has_id = object.get("id").is_some_and(|id| !id.is_null());

        if object.contains_key("method") {
            if has_id {
                serde_json::from_value(value).map(Message::Request)
            } else {
                serde_json::from_value(value).map(Message::Notification)
            }
        } else if object.contains_key("error") {
            serde_json::from_value(value).map(Message::ResponseError)
        } else if object.contains_key("result") {
            serde_json::from_value(value).map(Message::Response)
        } else {
            Err(serde_json::Error::custom(
                "message is neither a request, a notification nor a response",
            ))
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut value = match self {
            Message::Request(m) => serde_json::to_value(m)?,
            Message::Notification(m) => serde_json::to_value(m)?,
            Message::Response(m) => serde_json::to_value(m)?,
            Message::ResponseError(m) => serde_json::to_value(m)?,
        };
        if let Value::Object(object) = &mut value {
            object.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        }
        Ok(value)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.to_value().map(|value| value.to_string())
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(m) => Some(&m.method),
            Message::Notification(m) => Some(&m.method),
            _ => None,
        }
    }
}
