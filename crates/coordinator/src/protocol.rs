//! Coordinated protocol phases
//!
//! Every phase that talks to more than one connection runs in three steps:
//! start the command on each eligible connection without waiting, wait for
//! all of them at once, then consume each result. Connections are visited in
//! registry order.

use crate::commands;
use crate::config::TwoPhaseCommitMode;
use crate::connection::ConnectionId;
use crate::coordinator::{CoordinatedTransactionState, Coordinator, managed_mut};
use crate::error::{CoordinatorError, Result};
use crate::identifier::assign_2pc_identifier;
use crate::state::RemoteTransactionState::*;
use crate::wait::{WaitOutcome, wait_for_replies};
use dtx_common::{RemoteConnection, SubTransactionId};
use tokio::time::Instant;

impl<C: RemoteConnection> Coordinator<C> {
    /// Wait until every connection in `ids` has replied
    ///
    /// On timeout or interrupt, raising paths fail with an error; otherwise
    /// the connections still without a reply are shut down. Only raising
    /// paths honor an interrupt fired before the wait started.
    async fn wait_for_all(&mut self, ids: &[ConnectionId], raise_errors: bool) -> Result<()> {
        if !raise_errors && self.interrupt.clear_pending() {
            tracing::debug!("discarding interrupt raised before a cleanup wait");
        }
        if ids.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + self.config.wait_timeout();
        let outcome = {
            let batch: Vec<&mut C> = self
                .connections
                .iter_mut()
                .filter(|(id, _)| ids.contains(*id))
                .map(|(_, managed)| &mut managed.connection)
                .collect();
            wait_for_replies(batch, deadline, &self.interrupt).await
        };

        if outcome == WaitOutcome::Ready {
            return Ok(());
        }

        let unready: Vec<ConnectionId> = ids
            .iter()
            .copied()
            .filter(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|managed| managed.connection.is_busy())
            })
            .collect();

        if raise_errors {
            return Err(match outcome {
                WaitOutcome::Interrupted => CoordinatorError::Interrupted {
                    pending: unready.len(),
                },
                _ => CoordinatorError::WaitTimeout {
                    pending: unready.len(),
                    timeout_ms: self.config.wait_timeout_ms,
                },
            });
        }

        let reason = match outcome {
            WaitOutcome::Interrupted => "interrupted while waiting for a reply",
            _ => "timed out waiting for a reply",
        };
        for id in unready {
            managed_mut(&mut self.connections, id)?.shutdown(reason, &mut self.notices);
        }
        Ok(())
    }

    /// Start and finish begin on every connection in `ids`, optionally skipping
    /// those that already have a remote transaction
    async fn begin_all(&mut self, ids: &[ConnectionId], skip_started: bool) -> Result<()> {
        let transaction_id = self.current_transaction_id();
        let (command, last_queued) = commands::begin_batch(
            &self.local.options,
            &self.local.sub_xacts,
            self.local.active_set_statements.as_deref(),
            &transaction_id,
        );

        let mut started = Vec::new();
        for &id in ids {
            let managed = managed_mut(&mut self.connections, id)?;
            if skip_started && managed.transaction.state != NotStarted {
                continue;
            }

            managed.in_progress = true;
            self.registry.insert(id);
            managed.start_begin(&command, last_queued, &mut self.notices)?;
            started.push(id);
        }

        if skip_started {
            self.wait_for_all(&started, true).await?;
        }

        for &id in ids {
            let managed = managed_mut(&mut self.connections, id)?;
            if skip_started && (managed.transaction.failed || managed.transaction.state != Starting) {
                continue;
            }
            managed.finish_begin(&mut self.notices).await?;
        }
        Ok(())
    }

    /// Begin a remote transaction on each connection that has none, if a
    /// coordinated transaction is in progress
    pub async fn begin_if_necessary(&mut self, ids: &[ConnectionId]) -> Result<()> {
        if !self.local.in_coordinated_transaction() {
            return Ok(());
        }
        self.begin_all(ids, true).await
    }

    pub async fn begin_one_if_necessary(&mut self, id: ConnectionId) -> Result<()> {
        self.begin_if_necessary(&[id]).await
    }

    /// Begin on every listed connection; each must have no transaction yet
    pub async fn list_begin(&mut self, ids: &[ConnectionId]) -> Result<()> {
        self.begin_all(ids, false).await
    }

    /// Begin on one connection and wait for the result
    pub async fn remote_transaction_begin(&mut self, id: ConnectionId) -> Result<()> {
        self.begin_all(&[id], false).await
    }

    /// Commit one connection and wait for the result
    pub async fn remote_transaction_commit(&mut self, id: ConnectionId) -> Result<()> {
        let managed = managed_mut(&mut self.connections, id)?;
        managed.start_commit(&mut self.notices).await?;
        managed.finish_commit(&mut self.notices).await
    }

    /// Abort one connection and wait for the result
    pub async fn remote_transaction_abort(&mut self, id: ConnectionId) -> Result<()> {
        let managed = managed_mut(&mut self.connections, id)?;
        managed.start_abort(&mut self.notices).await?;
        managed.finish_abort(&mut self.notices).await
    }

    /// Whether commit goes through PREPARE TRANSACTION
    pub fn should_use_two_phase_commit(&self) -> bool {
        if self.config.two_phase_commit == TwoPhaseCommitMode::Always || self.local.use_two_phase_commit
        {
            return true;
        }

        let writers = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| self.connections.get(&id))
            .filter(|managed| managed.modified_placement && !managed.transaction.failed)
            .count();
        writers > 1
    }

    /// Prepare every connection that modified a placement
    ///
    /// Any failure to prepare is an error.
    pub async fn prepare_all(&mut self) -> Result<()> {
        let transaction_number = self.current_transaction_id().transaction_number;

        let mut batch = Vec::new();
        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if managed.transaction.failed || !managed.modified_placement {
                continue;
            }

            let name = assign_2pc_identifier(
                self.config.local_group_id,
                self.config.process_id,
                transaction_number,
            );
            managed.start_prepare(
                name,
                transaction_number,
                self.transaction_log.as_ref(),
                &mut self.notices,
            )?;
            batch.push(id);
        }

        self.wait_for_all(&batch, true).await?;

        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if managed.transaction.state != Preparing {
                continue;
            }
            managed.finish_prepare(&mut self.notices).await?;
        }

        self.local.state = CoordinatedTransactionState::Prepared;
        tracing::info!(prepared = batch.len(), "remote transactions prepared");
        Ok(())
    }

    /// Commit every in-progress connection
    ///
    /// After a two-phase prepare, participants that wrote nothing were never
    /// prepared and get a plain COMMIT. Commit failures are reported as
    /// warnings only.
    pub async fn commit_all(&mut self) -> Result<()> {
        let two_phase = self.local.state == CoordinatedTransactionState::Prepared;

        let mut batch = Vec::new();
        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            let state = managed.transaction.state;
            if matches!(
                state,
                NotStarted | OnePhaseCommitting | TwoPhaseCommitting | Committed | Aborted
            ) {
                continue;
            }

            managed.start_commit(&mut self.notices).await?;
            batch.push(id);
        }

        self.wait_for_all(&batch, false).await?;

        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            let state = managed.transaction.state;
            if !(state.is_committing() || state.is_aborting()) {
                continue;
            }
            managed.finish_commit(&mut self.notices).await?;
        }

        self.local.state = CoordinatedTransactionState::Committed;
        tracing::info!(committed = batch.len(), two_phase, "remote transactions committed");
        Ok(())
    }

    /// Abort every in-progress connection that has not finished
    pub async fn abort_all(&mut self) -> Result<()> {
        let mut batch = Vec::new();
        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            let state = managed.transaction.state;
            if state == NotStarted
                || state.is_aborting()
                || state.is_committing()
                || state.is_terminal()
            {
                continue;
            }

            managed.start_abort(&mut self.notices).await?;
            if managed.transaction.state.is_aborting() {
                batch.push(id);
            }
        }

        self.wait_for_all(&batch, false).await?;

        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if !managed.transaction.state.is_aborting() {
                continue;
            }
            managed.finish_abort(&mut self.notices).await?;
        }

        self.local.state = CoordinatedTransactionState::Aborted;
        tracing::info!(aborted = batch.len(), "remote transactions aborted");
        Ok(())
    }

    /// Open savepoint `sub_id` on every healthy connection
    pub async fn savepoint_begin(&mut self, sub_id: SubTransactionId) -> Result<()> {
        let mut batch = Vec::new();
        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if managed.transaction.failed {
                continue;
            }
            managed.start_savepoint_begin(sub_id, &mut self.notices)?;
            batch.push(id);
        }

        self.wait_for_all(&batch, true).await?;

        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if managed.transaction.failed {
                continue;
            }
            managed.finish_savepoint_begin(sub_id, &mut self.notices).await?;
        }
        Ok(())
    }

    /// Release savepoint `sub_id` on every healthy connection
    pub async fn savepoint_release(&mut self, sub_id: SubTransactionId) -> Result<()> {
        let mut batch = Vec::new();
        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if managed.transaction.failed {
                continue;
            }
            managed.start_savepoint_release(sub_id, &mut self.notices)?;
            batch.push(id);
        }

        self.wait_for_all(&batch, true).await?;

        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if managed.transaction.failed {
                continue;
            }
            managed.finish_savepoint_release(&mut self.notices).await?;
        }
        Ok(())
    }

    /// Roll every connection back to savepoint `sub_id`
    ///
    /// A failed connection whose last successful savepoint is at or before
    /// `sub_id` is included and healed if the rollback succeeds; other failed
    /// connections are skipped. Every processed connection is unclaimed.
    pub async fn savepoint_rollback(&mut self, sub_id: SubTransactionId) -> Result<()> {
        let mut batch = Vec::new();
        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;

            // the connection may be in the middle of a query
            managed.connection.send_cancellation();
            managed
                .clear_results_discard_warnings(false, &mut self.notices)
                .await?;

            if managed.transaction.failed {
                if managed.transaction.last_successful_sub_xact > sub_id {
                    continue;
                }
                managed.transaction.recovering = true;
                managed.forget_results(&mut self.notices).await;
            }

            managed.start_savepoint_rollback(sub_id, &mut self.notices)?;
            batch.push(id);
        }

        self.wait_for_all(&batch, false).await?;

        for id in self.registry.ids() {
            let managed = managed_mut(&mut self.connections, id)?;
            if managed.transaction.failed && !managed.transaction.recovering {
                continue;
            }
            managed.finish_savepoint_rollback(&mut self.notices).await?;
            managed.claimed = false;
        }
        Ok(())
    }

    /// Fold connection statuses into the failed flags; a failed critical
    /// connection is an error
    pub fn check_health(&mut self) -> Result<()> {
        for id in self.registry.ids() {
            managed_mut(&mut self.connections, id)?.check_health()?;
        }
        Ok(())
    }

    /// Before the local transaction commits: prepare when two-phase commit
    /// is in use, then check every connection
    pub async fn pre_commit(&mut self) -> Result<()> {
        if self.local.state != CoordinatedTransactionState::Started {
            return Ok(());
        }

        if self.should_use_two_phase_commit() {
            self.prepare_all().await?;
        }
        self.check_health()
    }

    /// After the local transaction committed
    pub async fn commit(&mut self) -> Result<()> {
        if !self.local.in_coordinated_transaction() {
            return Ok(());
        }
        self.commit_all().await
    }

    /// After the local transaction aborted
    pub async fn abort(&mut self) -> Result<()> {
        if self.local.state == CoordinatedTransactionState::None {
            return Ok(());
        }
        self.abort_all().await
    }
}
