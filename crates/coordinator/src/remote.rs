//! Start and finish halves of each remote transaction step
//!
//! A start sends a command without waiting; the matching finish consumes its
//! result. The coordinator runs the starts of a batch, waits once, then runs
//! the finishes, so no node is waited on while another could make progress.

use crate::commands;
use crate::connection::ManagedConnection;
use crate::error::{CoordinatorError, Result};
use crate::policy::{Notices, WarningKind};
use crate::state::{RemoteTransactionState, TransitionEvent};
use crate::transaction_log::{TransactionLog, TransactionRecord};
use dtx_common::{
    CommandResult, PreparedTransactionName, RemoteConnection, SubTransactionId,
    TOP_SUB_TRANSACTION_ID,
};

use RemoteTransactionState::*;

impl<C: RemoteConnection> ManagedConnection<C> {
    fn send(&mut self, command: &str) -> bool {
        tracing::debug!(node = %self.connection.node(), connection = %self.id, "sending: {}", command);
        self.connection.send_command(command)
    }

    /// Send the begin batch built by `commands::begin_batch`
    pub(crate) fn start_begin(
        &mut self,
        command: &str,
        last_queued: SubTransactionId,
        notices: &mut Notices,
    ) -> Result<()> {
        self.transaction
            .require(self.transaction.state == NotStarted, "begin")?;

        self.transaction.apply(TransitionEvent::BeginSent)?;
        self.transaction.last_successful_sub_xact = TOP_SUB_TRANSACTION_ID;
        self.transaction.last_queued_sub_xact = last_queued;

        if !self.send(command) {
            self.connection_error(true, notices)?;
        }
        Ok(())
    }

    pub(crate) async fn finish_begin(&mut self, notices: &mut Notices) -> Result<()> {
        self.transaction
            .require(self.transaction.state == Starting, "finish beginning")?;

        if self.clear_results(true, notices).await? {
            self.transaction.apply(TransitionEvent::BeginConfirmed)?;
            self.transaction.last_successful_sub_xact = self.transaction.last_queued_sub_xact;
        }
        Ok(())
    }

    /// Send COMMIT, COMMIT PREPARED, or ROLLBACK for a failed transaction
    pub(crate) async fn start_commit(&mut self, notices: &mut Notices) -> Result<()> {
        let state = self.transaction.state;
        self.transaction
            .require(state != NotStarted && state < OnePhaseAborting, "commit")?;

        if self.transaction.failed {
            // the remote transaction cannot commit, roll it back instead
            self.transaction.apply(TransitionEvent::RollbackSent)?;
            self.forget_results(notices).await;
            // a failed send leaves nothing to clean up remotely
            let _ = self.send(commands::ROLLBACK);
        } else if state == Prepared {
            let name = self.transaction.require_prepared_name()?;
            self.transaction.apply(TransitionEvent::CommitPreparedSent)?;
            if !self.send(&commands::commit_prepared(&name)) {
                self.connection_error(false, notices)?;
            }
        } else {
            self.transaction.apply(TransitionEvent::CommitSent)?;
            if !self.send(commands::COMMIT) {
                self.connection_error(false, notices)?;
            }
        }
        Ok(())
    }

    /// Consume the commit result
    ///
    /// An unconfirmed commit leaves the state unchanged and is only reported.
    pub(crate) async fn finish_commit(&mut self, notices: &mut Notices) -> Result<()> {
        let state = self.transaction.state;
        self.transaction.require(
            state.is_committing() || state.is_aborting(),
            "finish committing",
        )?;

        let result = self.connection.get_result().await;

        if !CommandResult::is_response_ok(result.as_ref()) {
            self.result_error(result.as_ref(), false, notices)?;

            if state.is_committing() {
                notices.warn(
                    WarningKind::CommitUnconfirmed,
                    self.connection.node(),
                    format!("failed to commit transaction on {}", self.connection.node()),
                );
            }
        } else if state.is_aborting() {
            self.transaction.apply(TransitionEvent::AbortConfirmed)?;
        } else {
            self.transaction.apply(TransitionEvent::CommitConfirmed)?;
        }

        self.forget_results(notices).await;
        Ok(())
    }

    /// Send ROLLBACK, or ROLLBACK PREPARED once a PREPARE went out
    pub(crate) async fn start_abort(&mut self, notices: &mut Notices) -> Result<()> {
        let state = self.transaction.state;
        self.transaction.require(
            state != NotStarted && state < OnePhaseAborting,
            "abort",
        )?;

        if state.is_prepare_outstanding() {
            // the PREPARE result may still be in flight
            self.forget_results(notices).await;

            let name = self.transaction.require_prepared_name()?;
            if !self.send(&commands::rollback_prepared(&name)) {
                self.connection_error(false, notices)?;
            } else {
                self.transaction.apply(TransitionEvent::RollbackPreparedSent)?;
            }
            return Ok(());
        }

        if !self.clear_results_if_ready() {
            // closing the connection rolls the remote transaction back
            self.shutdown("connection closed to abort a transaction that was still busy", notices);
            self.transaction.apply(TransitionEvent::AbortFinished)?;
            return Ok(());
        }

        if !self.send(commands::ROLLBACK) {
            self.mark_failed(false)?;
        } else {
            self.transaction.apply(TransitionEvent::RollbackSent)?;
        }
        Ok(())
    }

    /// Consume the abort result; the transaction always ends `Aborted`
    pub(crate) async fn finish_abort(&mut self, notices: &mut Notices) -> Result<()> {
        if self.transaction.state == TwoPhaseAborting {
            let result = self.connection.get_result().await;
            if !CommandResult::is_response_ok(result.as_ref()) {
                self.result_error(result.as_ref(), false, notices)?;
            }
        }

        if !self.clear_results(false, notices).await? {
            self.shutdown("connection could not be cleared after abort", notices);
        }

        if self.transaction.state != Aborted {
            self.transaction.apply(TransitionEvent::AbortFinished)?;
        }
        Ok(())
    }

    /// Record the commit intent, then send PREPARE TRANSACTION
    pub(crate) fn start_prepare(
        &mut self,
        name: PreparedTransactionName,
        transaction_number: u64,
        transaction_log: &dyn TransactionLog,
        notices: &mut Notices,
    ) -> Result<()> {
        let state = self.transaction.state;
        self.transaction.require(
            !self.transaction.failed && state != NotStarted && state < Preparing,
            "prepare",
        )?;

        self.transaction.prepared_name = Some(name);

        match self.connection.node().group_id {
            Some(group_id) => transaction_log
                .log_transaction_record(TransactionRecord {
                    group_id,
                    prepared_name: name,
                    transaction_number,
                })
                .map_err(CoordinatorError::TransactionLog)?,
            None => tracing::debug!(
                node = %self.connection.node(),
                "node has no group id, not logging {}", name
            ),
        }

        if !self.send(&commands::prepare_transaction(&name)) {
            self.connection_error(true, notices)?;
        } else {
            self.transaction.apply(TransitionEvent::PrepareSent)?;
        }
        Ok(())
    }

    /// Consume the PREPARE result; any failure is an error
    pub(crate) async fn finish_prepare(&mut self, notices: &mut Notices) -> Result<()> {
        self.transaction
            .require(self.transaction.state == Preparing, "finish preparing")?;
        let name = self.transaction.require_prepared_name()?;

        let result = self.connection.get_result().await;
        let confirmed = CommandResult::is_response_ok(result.as_ref());

        if confirmed {
            self.transaction.apply(TransitionEvent::PrepareConfirmed)?;
        } else {
            self.transaction.apply(TransitionEvent::PrepareRejected)?;
            self.result_error(result.as_ref(), true, notices)?;
        }

        let cleared = self.clear_results(true, notices).await?;

        if !confirmed || !cleared {
            return Err(CoordinatorError::PrepareFailed {
                name,
                node: self.connection.node().to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn start_savepoint_begin(
        &mut self,
        sub_id: SubTransactionId,
        notices: &mut Notices,
    ) -> Result<()> {
        if !self.send(&commands::savepoint(sub_id)) {
            self.connection_error(true, notices)?;
        }
        Ok(())
    }

    pub(crate) async fn finish_savepoint_begin(
        &mut self,
        sub_id: SubTransactionId,
        notices: &mut Notices,
    ) -> Result<()> {
        self.finish_savepoint_command(notices).await?;
        if !self.transaction.failed {
            self.transaction.last_successful_sub_xact = sub_id;
        }
        Ok(())
    }

    pub(crate) fn start_savepoint_release(
        &mut self,
        sub_id: SubTransactionId,
        notices: &mut Notices,
    ) -> Result<()> {
        if !self.send(&commands::release_savepoint(sub_id)) {
            self.connection_error(true, notices)?;
        }
        Ok(())
    }

    pub(crate) async fn finish_savepoint_release(&mut self, notices: &mut Notices) -> Result<()> {
        self.finish_savepoint_command(notices).await
    }

    async fn finish_savepoint_command(&mut self, notices: &mut Notices) -> Result<()> {
        let result = self.connection.get_result().await;
        if !CommandResult::is_response_ok(result.as_ref()) {
            self.result_error(result.as_ref(), true, notices)?;
        }
        self.forget_results(notices).await;
        Ok(())
    }

    pub(crate) fn start_savepoint_rollback(
        &mut self,
        sub_id: SubTransactionId,
        notices: &mut Notices,
    ) -> Result<()> {
        if !self.send(&commands::rollback_to_savepoint(sub_id)) {
            self.connection_error(false, notices)?;
        }
        Ok(())
    }

    /// Consume the ROLLBACK TO SAVEPOINT result
    ///
    /// Success heals a recovering connection; the transaction is `Started`
    /// afterwards either way.
    pub(crate) async fn finish_savepoint_rollback(&mut self, notices: &mut Notices) -> Result<()> {
        let result = self.connection.get_result().await;

        if !CommandResult::is_response_ok(result.as_ref()) {
            self.result_error(result.as_ref(), false, notices)?;
        } else if self.transaction.recovering {
            tracing::debug!(node = %self.connection.node(), "remote transaction recovered");
            self.transaction.failed = false;
        }
        self.transaction.recovering = false;

        self.forget_results(notices).await;
        self.transaction.apply(TransitionEvent::SavepointRolledBack)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::transaction_log::InMemoryTransactionLog;
    use dtx_engine::{Fault, FaultRule, MockConnection, MockEngine};

    fn managed(engine: &MockEngine) -> ManagedConnection<MockConnection> {
        let connection = engine.connect("worker-1", 5432).unwrap();
        ManagedConnection::new(ConnectionId(1), connection)
    }

    async fn begun(engine: &MockEngine, notices: &mut Notices) -> ManagedConnection<MockConnection> {
        let mut conn = managed(engine);
        conn.start_begin("BEGIN;", TOP_SUB_TRANSACTION_ID, notices).unwrap();
        conn.finish_begin(notices).await.unwrap();
        assert_eq!(conn.transaction().state(), Started);
        conn
    }

    #[tokio::test]
    async fn test_one_phase_commit() {
        let engine = MockEngine::with_workers(1);
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;

        conn.start_commit(&mut notices).await.unwrap();
        assert_eq!(conn.transaction().state(), OnePhaseCommitting);
        conn.finish_commit(&mut notices).await.unwrap();

        assert_eq!(conn.transaction().state(), Committed);
        assert!(notices.is_empty());
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back_on_commit() {
        let engine = MockEngine::with_workers(1);
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;
        conn.transaction.failed = true;

        conn.start_commit(&mut notices).await.unwrap();
        assert_eq!(conn.transaction().state(), OnePhaseAborting);
        conn.finish_commit(&mut notices).await.unwrap();

        assert_eq!(conn.transaction().state(), Aborted);
        let node = engine.node("worker-1", 5432).unwrap();
        assert_eq!(node.commands().last().unwrap(), "ROLLBACK");
    }

    #[tokio::test]
    async fn test_unconfirmed_commit_is_a_warning() {
        let engine = MockEngine::with_workers(1);
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;
        conn.transaction.critical = true;
        engine
            .node("worker-1", 5432)
            .unwrap()
            .inject(FaultRule::new("COMMIT", Fault::DropConnection));

        conn.start_commit(&mut notices).await.unwrap();
        conn.finish_commit(&mut notices).await.unwrap();

        assert_eq!(conn.transaction().state(), OnePhaseCommitting);
        assert!(conn.transaction().is_failed());
        assert!(notices
            .warnings()
            .iter()
            .any(|w| w.kind == WarningKind::CommitUnconfirmed
                && w.message == "failed to commit transaction on worker-1:5432"));
    }

    #[tokio::test]
    async fn test_prepare_assigns_name_and_logs_record() {
        let engine = MockEngine::with_workers(1);
        let log = InMemoryTransactionLog::new();
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;
        let name = PreparedTransactionName::new(0, 99, 5, 7);

        conn.start_prepare(name, 5, &log, &mut notices).unwrap();
        conn.finish_prepare(&mut notices).await.unwrap();

        assert_eq!(conn.transaction().state(), Prepared);
        assert_eq!(conn.transaction().prepared_name(), Some(&name));
        assert_eq!(log.records().len(), 1);
        assert_eq!(log.records()[0].group_id, 1);

        conn.start_commit(&mut notices).await.unwrap();
        conn.finish_commit(&mut notices).await.unwrap();
        assert_eq!(conn.transaction().state(), Committed);
        assert_eq!(
            engine.node("worker-1", 5432).unwrap().committed_prepared(),
            vec![name.to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejected_prepare_is_an_error() {
        let engine = MockEngine::with_workers(1);
        let log = InMemoryTransactionLog::new();
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;
        engine
            .node("worker-1", 5432)
            .unwrap()
            .inject(FaultRule::new("PREPARE", Fault::ErrorResult("disk full".into())));

        conn.start_prepare(PreparedTransactionName::new(0, 1, 1, 1), 1, &log, &mut notices)
            .unwrap();
        let err = conn.finish_prepare(&mut notices).await.unwrap_err();

        assert!(matches!(err, CoordinatorError::PrepareFailed { .. }));
        assert_eq!(err.hint(), Some("Try re-running the command."));
        assert_eq!(conn.transaction().state(), Aborted);
    }

    #[tokio::test]
    async fn test_prepare_refused_when_failed() {
        let engine = MockEngine::with_workers(1);
        let log = InMemoryTransactionLog::new();
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;
        conn.transaction.failed = true;

        let err = conn
            .start_prepare(PreparedTransactionName::new(0, 1, 1, 1), 1, &log, &mut notices)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState(_)));
        assert!(log.records().is_empty());
    }

    #[tokio::test]
    async fn test_abort_busy_connection_shuts_it_down() {
        let engine = MockEngine::with_workers(1);
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;
        let node = engine.node("worker-1", 5432).unwrap();
        node.inject(FaultRule::new("pg_sleep", Fault::Hang));
        conn.connection.send_command("SELECT pg_sleep(60)");

        conn.start_abort(&mut notices).await.unwrap();

        assert_eq!(conn.transaction().state(), Aborted);
        assert_eq!(node.shutdowns(), 1);
        assert_eq!(notices.warnings()[0].kind, WarningKind::ConnectionShutdown);
    }

    #[tokio::test]
    async fn test_abort_prepared_sends_rollback_prepared() {
        let engine = MockEngine::with_workers(1);
        let log = InMemoryTransactionLog::new();
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;
        let name = PreparedTransactionName::new(0, 1, 2, 3);

        // abort before the PREPARE result was consumed
        conn.start_prepare(name, 2, &log, &mut notices).unwrap();
        conn.start_abort(&mut notices).await.unwrap();
        assert_eq!(conn.transaction().state(), TwoPhaseAborting);
        conn.finish_abort(&mut notices).await.unwrap();

        assert_eq!(conn.transaction().state(), Aborted);
        let node = engine.node("worker-1", 5432).unwrap();
        assert_eq!(node.rolled_back_prepared(), vec![name.to_string()]);
        assert!(node.prepared_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_savepoint_rollback_heals_recovering_connection() {
        let engine = MockEngine::with_workers(1);
        let mut notices = Notices::new();
        let mut conn = begun(&engine, &mut notices).await;

        conn.start_savepoint_begin(2, &mut notices).unwrap();
        conn.finish_savepoint_begin(2, &mut notices).await.unwrap();
        assert_eq!(conn.transaction().last_successful_sub_xact(), 2);

        conn.connection.force_status(dtx_common::TransactionStatus::InError);
        conn.transaction.failed = true;
        conn.transaction.recovering = true;

        conn.start_savepoint_rollback(2, &mut notices).unwrap();
        conn.finish_savepoint_rollback(&mut notices).await.unwrap();

        assert!(!conn.transaction().is_failed());
        assert!(!conn.transaction().is_recovering());
        assert_eq!(conn.transaction().state(), Started);
    }
}
