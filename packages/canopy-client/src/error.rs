use canopy_core::ReconcileError;
use canopy_rpc::RpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("malformed {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("controller already started")]
    AlreadyStarted,
    #[error("invalid configuration: {0}")]
    Config(String),
}
