//! Coordinator of the remote transactions bound to one local transaction
//!
//! The coordinator owns the connections it was handed, the in-progress
//! registry and the local transaction context (isolation, open
//! sub-transactions, SET statements) that new remote transactions are
//! brought level with. The protocol phases live in `protocol.rs`.

use crate::commands;
use crate::config::CoordinatorConfig;
use crate::connection::{ConnectionId, ManagedConnection};
use crate::error::{CoordinatorError, Result};
use crate::policy::{Notices, RemoteWarning};
use crate::registry::InProgressRegistry;
use crate::remote_transaction::RemoteTransaction;
use crate::transaction_log::TransactionLog;
use crate::wait::InterruptHandle;
use dtx_common::{
    BeginOptions, DistributedTransactionId, RemoteConnection, SubTransactionId, SubXactContext,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Position of the local transaction in the coordinated protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordinatedTransactionState {
    /// No coordinated transaction; remote transactions are not started implicitly
    #[default]
    None,
    Started,
    /// Every writing participant is prepared
    Prepared,
    Committed,
    Aborted,
}

/// Local transaction the remote transactions follow
#[derive(Debug, Default)]
pub(crate) struct LocalTransaction {
    pub(crate) state: CoordinatedTransactionState,
    pub(crate) options: BeginOptions,
    pub(crate) transaction_id: Option<DistributedTransactionId>,
    /// Open sub-transactions, outermost first
    pub(crate) sub_xacts: Vec<SubXactContext>,
    /// SET statements in effect in the innermost sub-transaction
    pub(crate) active_set_statements: Option<String>,
    pub(crate) use_two_phase_commit: bool,
}

impl LocalTransaction {
    pub(crate) fn in_coordinated_transaction(&self) -> bool {
        matches!(
            self.state,
            CoordinatedTransactionState::Started | CoordinatedTransactionState::Prepared
        )
    }
}

/// Drives the remote transactions of one local transaction
pub struct Coordinator<C> {
    pub(crate) config: CoordinatorConfig,
    pub(crate) connections: BTreeMap<ConnectionId, ManagedConnection<C>>,
    next_connection_id: u64,
    pub(crate) registry: InProgressRegistry,
    pub(crate) local: LocalTransaction,
    pub(crate) transaction_log: Arc<dyn TransactionLog>,
    pub(crate) notices: Notices,
    pub(crate) interrupt: InterruptHandle,
}

/// Look up a connection without borrowing the rest of the coordinator
pub(crate) fn managed_mut<C>(
    connections: &mut BTreeMap<ConnectionId, ManagedConnection<C>>,
    id: ConnectionId,
) -> Result<&mut ManagedConnection<C>> {
    connections
        .get_mut(&id)
        .ok_or(CoordinatorError::ConnectionNotFound(id))
}

impl<C: RemoteConnection> Coordinator<C> {
    pub fn new(config: CoordinatorConfig, transaction_log: Arc<dyn TransactionLog>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            connections: BTreeMap::new(),
            next_connection_id: 0,
            registry: InProgressRegistry::new(),
            local: LocalTransaction::default(),
            transaction_log,
            notices: Notices::new(),
            interrupt: InterruptHandle::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Handle that interrupts the current or next wait phase
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    // Connections

    /// Take ownership of a connection
    pub fn add_connection(&mut self, connection: C) -> ConnectionId {
        self.next_connection_id += 1;
        let id = ConnectionId(self.next_connection_id);

        tracing::debug!(node = %connection.node(), connection = %id, "connection added");
        self.connections
            .insert(id, ManagedConnection::new(id, connection));
        id
    }

    /// Reset the connection and hand it back, e.g. to a pool
    pub fn release_connection(&mut self, id: ConnectionId) -> Option<C> {
        self.reset_remote_transaction(id).ok()?;
        self.connections
            .remove(&id)
            .map(|managed| managed.connection)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ManagedConnection<C>> {
        self.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut ManagedConnection<C>> {
        self.connections.get_mut(&id)
    }

    pub fn remote_transaction(&self, id: ConnectionId) -> Option<&RemoteTransaction> {
        self.connections.get(&id).map(ManagedConnection::transaction)
    }

    /// Connections with a remote transaction in progress, in start order
    pub fn in_progress(&self) -> Vec<ConnectionId> {
        self.registry.ids()
    }

    /// Failures on this connection fail the whole transaction
    pub fn mark_critical(&mut self, id: ConnectionId) -> Result<()> {
        managed_mut(&mut self.connections, id)?.transaction.critical = true;
        Ok(())
    }

    /// The remote transaction wrote to a shard placement and must be
    /// prepared under two-phase commit
    pub fn mark_placement_modified(&mut self, id: ConnectionId) -> Result<()> {
        managed_mut(&mut self.connections, id)?.modified_placement = true;
        Ok(())
    }

    /// Claim the connection exclusively; false if it is already claimed
    pub fn claim_connection(&mut self, id: ConnectionId) -> Result<bool> {
        let managed = managed_mut(&mut self.connections, id)?;
        if managed.claimed {
            return Ok(false);
        }
        managed.claimed = true;
        Ok(true)
    }

    pub fn unclaim_connection(&mut self, id: ConnectionId) -> Result<()> {
        managed_mut(&mut self.connections, id)?.claimed = false;
        Ok(())
    }

    /// Mark the remote transaction failed
    ///
    /// With `allow_promotion`, failing a critical connection is an error.
    pub fn mark_failed(&mut self, id: ConnectionId, allow_promotion: bool) -> Result<()> {
        managed_mut(&mut self.connections, id)?.mark_failed(allow_promotion)
    }

    /// Return the connection to its zero state, out of the registry
    ///
    /// Sends nothing and may be called any number of times.
    pub fn reset_remote_transaction(&mut self, id: ConnectionId) -> Result<()> {
        let managed = managed_mut(&mut self.connections, id)?;
        if managed.in_progress {
            self.registry.remove(id);
        }
        managed.reset();
        Ok(())
    }

    // Local transaction context

    /// Start a coordinated transaction: remote transactions are started
    /// implicitly from now on
    pub fn begin_coordinated_transaction(
        &mut self,
        options: BeginOptions,
    ) -> Result<DistributedTransactionId> {
        if self.local.in_coordinated_transaction() {
            return Err(CoordinatorError::InvalidState(
                "a coordinated transaction is already in progress".to_string(),
            ));
        }

        let transaction_id =
            DistributedTransactionId::allocate(self.config.local_group_id, self.config.process_id);

        self.local = LocalTransaction {
            state: CoordinatedTransactionState::Started,
            options,
            transaction_id: Some(transaction_id),
            ..Default::default()
        };

        tracing::info!(transaction = %transaction_id, "coordinated transaction started");
        Ok(transaction_id)
    }

    pub fn coordinated_state(&self) -> CoordinatedTransactionState {
        self.local.state
    }

    pub fn transaction_id(&self) -> Option<DistributedTransactionId> {
        self.local.transaction_id
    }

    /// Distributed transaction id, allocated on first use
    pub(crate) fn current_transaction_id(&mut self) -> DistributedTransactionId {
        match self.local.transaction_id {
            Some(transaction_id) => transaction_id,
            None => {
                let transaction_id = DistributedTransactionId::allocate(
                    self.config.local_group_id,
                    self.config.process_id,
                );
                self.local.transaction_id = Some(transaction_id);
                transaction_id
            }
        }
    }

    /// Commit with PREPARE TRANSACTION / COMMIT PREPARED
    pub fn use_two_phase_commit(&mut self) {
        self.local.use_two_phase_commit = true;
    }

    /// Enter a local sub-transaction
    pub fn push_sub_xact(&mut self, sub_id: SubTransactionId, set_local_cmds: Option<String>) {
        let mut context = SubXactContext::new(sub_id);
        if let Some(cmds) = set_local_cmds {
            context = context.with_set_local_cmds(cmds);
        }
        self.local.sub_xacts.push(context);
    }

    /// Leave the innermost local sub-transaction
    pub fn pop_sub_xact(&mut self) -> Option<SubXactContext> {
        self.local.sub_xacts.pop()
    }

    pub fn sub_xacts(&self) -> &[SubXactContext] {
        &self.local.sub_xacts
    }

    /// SET statements active in the innermost sub-transaction, replayed after
    /// the savepoints when a remote transaction starts
    pub fn set_active_set_statements(&mut self, statements: Option<String>) {
        self.local.active_set_statements = statements;
    }

    /// BEGIN and id assignment for an ad-hoc remote transaction, without
    /// savepoint replay
    pub fn begin_without_savepoints_command(&mut self) -> String {
        let transaction_id = self.current_transaction_id();
        commands::begin_and_assign(&self.local.options, &transaction_id)
    }

    /// End the local transaction: reset every in-progress connection and
    /// forget the local context
    pub fn end_transaction(&mut self) {
        for id in self.registry.ids() {
            if let Some(managed) = self.connections.get_mut(&id) {
                managed.reset();
            }
            self.registry.remove(id);
        }
        self.local = LocalTransaction::default();
    }

    // Warnings

    pub fn warnings(&self) -> &[RemoteWarning] {
        self.notices.warnings()
    }

    pub fn take_warnings(&mut self) -> Vec<RemoteWarning> {
        self.notices.take()
    }
}
