//! Error types for the coordinator

use dtx_common::PreparedTransactionName;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Coordinator error types
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("connection to the remote node {node} failed with the following error: {detail}")]
    ConnectionFailed { node: String, detail: String },

    #[error("remote command failed on {node}: {message}")]
    RemoteCommandFailed { node: String, message: String },

    #[error("failure on connection marked as essential: {node}")]
    CriticalConnectionFailed { node: String },

    #[error("failed to prepare transaction '{name}' on host {node}")]
    PrepareFailed {
        name: PreparedTransactionName,
        node: String,
    },

    #[error("interrupted while waiting for {pending} remote connection(s)")]
    Interrupted { pending: usize },

    #[error("timed out after {timeout_ms}ms waiting for {pending} remote connection(s)")]
    WaitTimeout { pending: usize, timeout_ms: u64 },

    #[error("Invalid remote transaction state: {0}")]
    InvalidState(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Transaction log error: {0}")]
    TransactionLog(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Follow-up advice for the user, where there is one
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CoordinatorError::PrepareFailed { .. } => Some("Try re-running the command."),
            _ => None,
        }
    }
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
