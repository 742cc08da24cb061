use crate::rendering::NodeId;
use thiserror::Error;

/// The remote side sent something this client cannot express.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("attribute `{name}` on node {node} has an unsupported value: {value}")]
    UnknownAttribute {
        node: NodeId,
        name: String,
        value: String,
    },
    #[error("no widget registered under `{0}`")]
    UnknownWidget(String),
    #[error("node {node} is a {actual}, expected {expected}")]
    InvalidKind {
        node: NodeId,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("widget `{name}` failed: {source}")]
    Widget {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("move tag `{0}` is used more than once in one patch")]
    DuplicateMoveTag(String),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The local mirror disagrees with what a patch assumes.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("node {0} not found")]
    MissingNode(NodeId),
    #[error("node {0} has no parent")]
    MissingParent(NodeId),
    #[error("node {child} is not among the children of {parent}")]
    NotAmongSiblings { parent: NodeId, child: NodeId },
    #[error("node {0} has no host node")]
    MissingHostNode(NodeId),
    #[error("move tag `{0}` was never removed")]
    UnknownMoveTag(String),
    #[error("position {position} is out of range for node {node} with {len} children")]
    PositionOutOfRange {
        node: NodeId,
        position: usize,
        len: usize,
    },
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),
    #[error("no root has been rendered yet")]
    NoRoot,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
}

impl ReconcileError {
    pub fn is_consistency(&self) -> bool {
        matches!(self, ReconcileError::Consistency(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ReconcileError::Protocol(_))
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        ReconcileError::Protocol(ProtocolError::Decode(err))
    }
}
