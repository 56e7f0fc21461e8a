//! Per-connection remote transaction record

use crate::error::{CoordinatorError, Result};
use crate::state::{RemoteTransactionState, TransitionEvent, next_state};
use dtx_common::{PreparedTransactionName, SubTransactionId, TOP_SUB_TRANSACTION_ID};

/// State of the transaction running on one remote connection
///
/// `Default` is the zero state a connection returns to on reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTransaction {
    pub(crate) state: RemoteTransactionState,
    /// Sticky until a savepoint rollback heals the connection
    pub(crate) failed: bool,
    /// A failure on this connection fails the whole coordinator transaction
    pub(crate) critical: bool,
    /// Failed, but included in an ongoing savepoint rollback that may heal it
    pub(crate) recovering: bool,
    /// Assigned right before PREPARE TRANSACTION, never changed afterwards
    pub(crate) prepared_name: Option<PreparedTransactionName>,
    pub(crate) last_successful_sub_xact: SubTransactionId,
    pub(crate) last_queued_sub_xact: SubTransactionId,
}

impl Default for RemoteTransaction {
    fn default() -> Self {
        Self {
            state: RemoteTransactionState::NotStarted,
            failed: false,
            critical: false,
            recovering: false,
            prepared_name: None,
            last_successful_sub_xact: TOP_SUB_TRANSACTION_ID,
            last_queued_sub_xact: TOP_SUB_TRANSACTION_ID,
        }
    }
}

impl RemoteTransaction {
    pub fn state(&self) -> RemoteTransactionState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub fn prepared_name(&self) -> Option<&PreparedTransactionName> {
        self.prepared_name.as_ref()
    }

    /// Deepest sub-transaction known to exist remotely
    pub fn last_successful_sub_xact(&self) -> SubTransactionId {
        self.last_successful_sub_xact
    }

    pub fn last_queued_sub_xact(&self) -> SubTransactionId {
        self.last_queued_sub_xact
    }

    /// Move to the state following `event`
    pub(crate) fn apply(&mut self, event: TransitionEvent) -> Result<()> {
        match next_state(self.state, event) {
            Some(next) => {
                self.state = next;
                Ok(())
            }
            None => Err(CoordinatorError::InvalidState(format!(
                "{:?} is not valid for a remote transaction that is {}",
                event, self.state
            ))),
        }
    }

    pub(crate) fn require(&self, valid: bool, operation: &str) -> Result<()> {
        if valid {
            Ok(())
        } else {
            Err(CoordinatorError::InvalidState(format!(
                "cannot {} a remote transaction that is {}{}",
                operation,
                self.state,
                if self.failed { " and failed" } else { "" }
            )))
        }
    }

    /// Prepared name, which must exist once PREPARE was sent
    pub(crate) fn require_prepared_name(&self) -> Result<PreparedTransactionName> {
        self.prepared_name.ok_or_else(|| {
            CoordinatorError::InvalidState(format!(
                "remote transaction is {} without a prepared name",
                self.state
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_state() {
        let transaction = RemoteTransaction::default();
        assert_eq!(transaction.state(), RemoteTransactionState::NotStarted);
        assert!(!transaction.is_failed());
        assert!(!transaction.is_critical());
        assert_eq!(transaction.prepared_name(), None);
        assert_eq!(transaction.last_successful_sub_xact(), TOP_SUB_TRANSACTION_ID);
    }

    #[test]
    fn test_invalid_event_keeps_state() {
        let mut transaction = RemoteTransaction::default();
        let err = transaction.apply(TransitionEvent::CommitSent).unwrap_err();

        assert!(matches!(err, CoordinatorError::InvalidState(_)));
        assert_eq!(transaction.state(), RemoteTransactionState::NotStarted);
    }

    #[test]
    fn test_prepared_without_name_is_an_error() {
        let transaction = RemoteTransaction {
            state: RemoteTransactionState::Prepared,
            ..Default::default()
        };
        assert!(transaction.require_prepared_name().is_err());
    }
}
