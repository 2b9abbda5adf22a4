//! Graph-manager seam and the transaction coordinator.
//!
//! Graph storage and the transaction machinery live outside this crate;
//! the processor drives them through [`GraphManager`]. The coordinator
//! functions scope a commit or rollback either to every managed graph or,
//! in strict mode, to the graphs named by the request's alias mapping.
//! Callers invoke at most one coordinator operation per request and never
//! a conflicting pair.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::message::RequestMessage;

/// Errors raised by graph transaction operations.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// A named graph is not managed by this server.
    #[error("unknown graph [{0}]")]
    UnknownGraph(String),
    /// The graph implementation failed to commit or roll back.
    #[error("transaction failure: {0}")]
    Transaction(String),
}

/// The set of graphs managed by the server, with transactional control.
///
/// Transactional isolation across concurrent requests is the graph
/// implementation's responsibility.
#[async_trait]
pub trait GraphManager: Send + Sync {
    /// Names of all managed graphs.
    fn graph_names(&self) -> Vec<String>;

    /// Commit open transactions on the named graphs.
    ///
    /// # Errors
    /// Returns an error if any named graph is unknown or fails to commit.
    async fn commit(&self, graphs: &[String]) -> Result<(), GraphError>;

    /// Roll back open transactions on the named graphs.
    ///
    /// # Errors
    /// Returns an error if any named graph is unknown or fails to roll
    /// back.
    async fn rollback(&self, graphs: &[String]) -> Result<(), GraphError>;
}

/// The graphs a transaction operation applies to.
///
/// Strict mode uses the values of the request's alias mapping (presence
/// and shape were validated upstream); otherwise every managed graph is
/// in scope.
fn transaction_scope(
    message: &RequestMessage,
    graphs: &dyn GraphManager,
    strict: bool,
) -> Vec<String> {
    if strict {
        message
            .aliases()
            .map(|aliases| {
                aliases
                    .values()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    } else {
        graphs.graph_names()
    }
}

/// Commit the transaction scope for a successfully completed request.
///
/// # Errors
/// Returns an error if the underlying commit fails.
pub async fn attempt_commit(
    message: &RequestMessage,
    graphs: &dyn GraphManager,
    strict: bool,
) -> Result<(), GraphError> {
    let scope = transaction_scope(message, graphs, strict);
    debug!(request_id = %message.request_id, graphs = ?scope, "committing transaction scope");
    graphs.commit(&scope).await
}

/// Roll back the transaction scope for a failed request.
///
/// # Errors
/// Returns an error if the underlying rollback fails.
pub async fn attempt_rollback(
    message: &RequestMessage,
    graphs: &dyn GraphManager,
    strict: bool,
) -> Result<(), GraphError> {
    let scope = transaction_scope(message, graphs, strict);
    debug!(request_id = %message.request_id, graphs = ?scope, "rolling back transaction scope");
    graphs.rollback(&scope).await
}
