//! Failure and criticality policy
//!
//! A failure on a connection is raised as an error only when the connection
//! is critical and the caller allows raising. Everything else becomes a
//! warning and the connection is marked failed.

use crate::error::{CoordinatorError, Result};
use crate::remote_transaction::RemoteTransaction;
use chrono::{DateTime, Utc};
use dtx_common::{CommandResult, RemoteNode, TransactionStatus};
use serde::{Deserialize, Serialize};

/// What a warning is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// The connection broke or a command could not be sent
    ConnectionError,
    /// A command completed with an error
    ResultError,
    /// A COMMIT or COMMIT PREPARED was sent but never confirmed
    CommitUnconfirmed,
    /// The connection was closed instead of waiting for it
    ConnectionShutdown,
}

/// A non-fatal problem on one remote connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWarning {
    pub kind: WarningKind,
    /// `host:port` of the remote node
    pub node: String,
    pub message: String,
    pub reported_at: DateTime<Utc>,
}

/// Warnings collected during one coordinator transaction, in report order
#[derive(Debug, Default)]
pub struct Notices {
    warnings: Vec<RemoteWarning>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, kind: WarningKind, node: &RemoteNode, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(node = %node, ?kind, "{}", message);
        self.warnings.push(RemoteWarning {
            kind,
            node: node.to_string(),
            message,
            reported_at: Utc::now(),
        });
    }

    pub fn warnings(&self) -> &[RemoteWarning] {
        &self.warnings
    }

    pub fn take(&mut self) -> Vec<RemoteWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Whether a failure on `transaction` must be raised rather than reported
pub fn should_raise(transaction: &RemoteTransaction, raise_errors: bool) -> bool {
    transaction.critical && raise_errors
}

/// Mark the remote transaction failed
///
/// With `allow_promotion`, a critical connection turns the failure into an
/// error for the whole coordinator transaction.
pub fn mark_failed(
    transaction: &mut RemoteTransaction,
    node: &RemoteNode,
    allow_promotion: bool,
) -> Result<()> {
    transaction.failed = true;

    if should_raise(transaction, allow_promotion) {
        return Err(CoordinatorError::CriticalConnectionFailed {
            node: node.to_string(),
        });
    }
    Ok(())
}

/// A command could not be sent or the connection dropped
pub fn connection_error(
    transaction: &mut RemoteTransaction,
    node: &RemoteNode,
    detail: &str,
    raise_errors: bool,
    notices: &mut Notices,
) -> Result<()> {
    if should_raise(transaction, raise_errors) {
        transaction.failed = true;
        return Err(CoordinatorError::ConnectionFailed {
            node: node.to_string(),
            detail: detail.to_string(),
        });
    }

    notices.warn(
        WarningKind::ConnectionError,
        node,
        format!(
            "connection to the remote node {} failed with the following error: {}",
            node, detail
        ),
    );
    mark_failed(transaction, node, raise_errors)
}

/// A command produced an error result, or no result at all
pub fn result_error(
    transaction: &mut RemoteTransaction,
    node: &RemoteNode,
    result: Option<&CommandResult>,
    raise_errors: bool,
    notices: &mut Notices,
) -> Result<()> {
    let message = result
        .and_then(CommandResult::message)
        .unwrap_or("no result received")
        .to_string();

    if should_raise(transaction, raise_errors) {
        transaction.failed = true;
        return Err(CoordinatorError::RemoteCommandFailed {
            node: node.to_string(),
            message,
        });
    }

    notices.warn(
        WarningKind::ResultError,
        node,
        format!("{} (while executing command on {})", message, node),
    );
    mark_failed(transaction, node, raise_errors)
}

/// Fold the connection's transaction status into the failed flag
///
/// A failed critical connection is an error.
pub fn check_health(
    transaction: &mut RemoteTransaction,
    node: &RemoteNode,
    status: TransactionStatus,
) -> Result<()> {
    if status.is_broken() {
        transaction.failed = true;
    }

    if transaction.failed && transaction.critical {
        return Err(CoordinatorError::CriticalConnectionFailed {
            node: node.to_string(),
        });
    }
    Ok(())
}
