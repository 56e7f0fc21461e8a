//! Connections owned by the coordinator
//!
//! A `ManagedConnection` pairs a live remote connection with the state of the
//! transaction running on it, plus the flags the coordinator tracks per
//! connection. The result helpers here drain outstanding results so the next
//! command can be sent.

use crate::error::Result;
use crate::policy::{self, Notices};
use crate::remote_transaction::RemoteTransaction;
use dtx_common::{RemoteConnection, RemoteNode, TransactionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a connection registered with a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub struct ManagedConnection<C> {
    pub(crate) id: ConnectionId,
    pub(crate) connection: C,
    pub(crate) transaction: RemoteTransaction,
    /// Member of the in-progress registry
    pub(crate) in_progress: bool,
    /// The remote transaction wrote to a shard placement
    pub(crate) modified_placement: bool,
    /// Exclusively claimed by one executor
    pub(crate) claimed: bool,
}

impl<C: RemoteConnection> ManagedConnection<C> {
    pub(crate) fn new(id: ConnectionId, connection: C) -> Self {
        Self {
            id,
            connection,
            transaction: RemoteTransaction::default(),
            in_progress: false,
            modified_placement: false,
            claimed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn node(&self) -> &RemoteNode {
        self.connection.node()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn transaction(&self) -> &RemoteTransaction {
        &self.transaction
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn modified_placement(&self) -> bool {
        self.modified_placement
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// Whether the session can serve a new transaction without cleanup
    pub fn is_reusable(&self) -> bool {
        self.connection.is_connected()
            && !self.connection.is_busy()
            && self.connection.transaction_status() == TransactionStatus::Idle
    }

    pub(crate) fn connection_error(
        &mut self,
        raise_errors: bool,
        notices: &mut Notices,
    ) -> Result<()> {
        let detail = if self.connection.is_connected() {
            "could not send command"
        } else {
            "connection not open"
        };
        policy::connection_error(
            &mut self.transaction,
            self.connection.node(),
            detail,
            raise_errors,
            notices,
        )
    }

    pub(crate) fn result_error(
        &mut self,
        result: Option<&dtx_common::CommandResult>,
        raise_errors: bool,
        notices: &mut Notices,
    ) -> Result<()> {
        policy::result_error(
            &mut self.transaction,
            self.connection.node(),
            result,
            raise_errors,
            notices,
        )
    }

    pub(crate) fn mark_failed(&mut self, allow_promotion: bool) -> Result<()> {
        policy::mark_failed(&mut self.transaction, self.connection.node(), allow_promotion)
    }

    pub(crate) fn check_health(&mut self) -> Result<()> {
        let status = self.connection.transaction_status();
        policy::check_health(&mut self.transaction, self.connection.node(), status)
    }

    /// Close the connection instead of waiting on it, with a warning
    pub(crate) fn shutdown(&mut self, reason: &str, notices: &mut Notices) {
        if !self.connection.is_connected() {
            return;
        }
        notices.warn(
            policy::WarningKind::ConnectionShutdown,
            self.connection.node(),
            reason,
        );
        self.connection.shutdown();
    }

    /// Drain every outstanding result
    ///
    /// Each error result marks the transaction failed, and is reported as a
    /// warning unless `discard_warnings` is set. Returns false if any result
    /// was an error or the connection is broken.
    async fn clear_results_internal(
        &mut self,
        raise_errors: bool,
        discard_warnings: bool,
        notices: &mut Notices,
    ) -> Result<bool> {
        let mut success = true;

        while let Some(result) = self.connection.get_result().await {
            if result.is_ok() {
                continue;
            }

            if !discard_warnings {
                notices.warn(
                    policy::WarningKind::ResultError,
                    self.connection.node(),
                    result.message().unwrap_or_default(),
                );
            }
            self.mark_failed(raise_errors)?;
            success = false;
        }

        Ok(success && self.connection.is_connected())
    }

    pub(crate) async fn clear_results(
        &mut self,
        raise_errors: bool,
        notices: &mut Notices,
    ) -> Result<bool> {
        self.clear_results_internal(raise_errors, false, notices).await
    }

    pub(crate) async fn clear_results_discard_warnings(
        &mut self,
        raise_errors: bool,
        notices: &mut Notices,
    ) -> Result<bool> {
        self.clear_results_internal(raise_errors, true, notices).await
    }

    /// Drain results without raising; failures only mark the connection
    pub(crate) async fn forget_results(&mut self, notices: &mut Notices) {
        // never raises with promotion disabled
        let _ = self.clear_results_internal(false, false, notices).await;
    }

    /// Drain results only if that needs no waiting
    ///
    /// Returns false if a result is still pending, an error result was found,
    /// or the connection is broken.
    pub(crate) fn clear_results_if_ready(&mut self) -> bool {
        if !self.connection.is_connected() {
            return false;
        }

        loop {
            if self.connection.is_busy() {
                return false;
            }
            match self.connection.try_get_result() {
                Some(result) if result.is_ok() => continue,
                Some(_) => return false,
                None => return true,
            }
        }
    }

    /// Back to the zero state, out of any transaction
    pub(crate) fn reset(&mut self) {
        self.transaction = RemoteTransaction::default();
        self.in_progress = false;
        self.modified_placement = false;
        self.claimed = false;
    }
}
