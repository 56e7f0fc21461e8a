//! Remote transaction state machine
//!
//! States only move forward, except that rolling back to a savepoint returns
//! a not-yet-prepared transaction to `Started`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle position of one remote transaction
///
/// Declaration order matters: prepare requires a state before `Preparing`,
/// and commit requires one before `OnePhaseAborting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RemoteTransactionState {
    /// No transaction started on the remote side
    #[default]
    NotStarted,
    /// BEGIN sent, result not yet consumed
    Starting,
    /// Inside a valid transaction block
    Started,
    /// PREPARE TRANSACTION sent, result not yet consumed
    Preparing,
    /// Prepared, waiting for COMMIT PREPARED or ROLLBACK PREPARED
    Prepared,
    /// ROLLBACK sent
    OnePhaseAborting,
    /// ROLLBACK PREPARED sent
    TwoPhaseAborting,
    Aborted,
    /// COMMIT sent
    OnePhaseCommitting,
    /// COMMIT PREPARED sent
    TwoPhaseCommitting,
    Committed,
}

impl RemoteTransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    pub fn is_aborting(&self) -> bool {
        matches!(self, Self::OnePhaseAborting | Self::TwoPhaseAborting)
    }

    pub fn is_committing(&self) -> bool {
        matches!(self, Self::OnePhaseCommitting | Self::TwoPhaseCommitting)
    }

    /// Whether a PREPARE TRANSACTION has been sent and not yet resolved
    pub fn is_prepare_outstanding(&self) -> bool {
        matches!(self, Self::Preparing | Self::Prepared)
    }
}

impl fmt::Display for RemoteTransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::OnePhaseAborting => "aborting (1PC)",
            Self::TwoPhaseAborting => "aborting (2PC)",
            Self::Aborted => "aborted",
            Self::OnePhaseCommitting => "committing (1PC)",
            Self::TwoPhaseCommitting => "committing (2PC)",
            Self::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Something that happened to a remote transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEvent {
    BeginSent,
    BeginConfirmed,
    PrepareSent,
    PrepareConfirmed,
    PrepareRejected,
    CommitSent,
    CommitPreparedSent,
    RollbackSent,
    RollbackPreparedSent,
    CommitConfirmed,
    AbortConfirmed,
    /// Abort finished, successfully or by giving up on the connection
    AbortFinished,
    SavepointRolledBack,
}

/// Next state after `event`, or `None` if the event is not valid in `current`
pub fn next_state(
    current: RemoteTransactionState,
    event: TransitionEvent,
) -> Option<RemoteTransactionState> {
    use RemoteTransactionState::*;
    use TransitionEvent::*;

    let next = match (current, event) {
        (NotStarted, BeginSent) => Starting,
        (Starting, BeginConfirmed) => Started,
        (Starting | Started, PrepareSent) => Preparing,
        (Preparing, PrepareConfirmed) => Prepared,
        (Preparing, PrepareRejected) => Aborted,
        (Starting | Started, CommitSent) => OnePhaseCommitting,
        (Prepared, CommitPreparedSent) => TwoPhaseCommitting,
        (Starting | Started | Preparing | Prepared, RollbackSent) => OnePhaseAborting,
        (Preparing | Prepared, RollbackPreparedSent) => TwoPhaseAborting,
        (OnePhaseCommitting | TwoPhaseCommitting, CommitConfirmed) => Committed,
        (OnePhaseAborting | TwoPhaseAborting, AbortConfirmed) => Aborted,
        (state, AbortFinished) if state != NotStarted && state < OnePhaseCommitting => Aborted,
        (Starting | Started, SavepointRolledBack) => Started,
        _ => return None,
    };

    Some(next)
}
