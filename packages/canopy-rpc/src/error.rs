use crate::message::{RequestId, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unparsable payload: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("remote method failed: {0}")]
    Remote(#[from] ResponseError),
    #[error("request {id} (`{method}`) timed out")]
    Timeout { method: String, id: RequestId },
    #[error("session closed")]
    Closed,
    #[error("too many pending requests (limit {limit})")]
    TooManyPending { limit: usize },
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode result: {0}")]
    Decode(#[source] serde_json::Error),
}

impl RpcError {
    /// The remote error payload, when the peer answered with an error response.
    pub fn remote(&self) -> Option<&ResponseError> {
        match self {
            RpcError::Remote(err) => Some(err),
            _ => None,
        }
    }
}
