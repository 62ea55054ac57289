use std::{fmt, sync::Arc};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::port::{Sink, Source};

/// A participant in a flow: a stable identity plus named input and output ports.
///
/// Implementations own their ports; the flow only indexes them.
pub trait Node: Send + Sync {
    /// Caller-assigned identity, unique within a flow and stable for the node's lifetime.
    fn id(&self) -> String;

    /// Human-readable kind, used in diagnostics and error records.
    fn type_name(&self) -> String;

    fn sinks(&self) -> Vec<Arc<Sink>>;

    fn sources(&self) -> Vec<Arc<Source>>;

    /// Capability query for autonomous execution, checked once on start.
    fn as_runner(self: Arc<Self>) -> Option<Arc<dyn Runner>> {
        None
    }
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("type", &self.type_name())
            .finish()
    }
}

/// A node that produces values on its own (timers, pollers).
///
/// `run` must return soon after `shutdown` trips.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, shutdown: ShutdownSignal);
}

/// Read-only view of the flow's cancellation token.
///
/// Level-triggered: once tripped it stays tripped, and every holder sees it.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn recv(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum NodeError {
    NotFound,
    InvalidInput(String),
    ExecutionFailed(String),
    Internal(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::NotFound => write!(f, "Node not found"),
            NodeError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            NodeError::ExecutionFailed(msg) => write!(f, "Processing error: {}", msg),
            NodeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for NodeError {}
