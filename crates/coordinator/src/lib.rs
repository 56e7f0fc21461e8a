//! Remote transaction coordinator
//!
//! Drives the transactions a coordinator opens on remote nodes through
//! BEGIN, savepoints, optional two-phase PREPARE, and COMMIT or ROLLBACK,
//! so that all of them commit or all of them abort.
//!
//! Multi-connection phases send their command to every connection first,
//! wait for all replies at once, and only then consume the results.

pub mod commands;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod identifier;
pub mod policy;
mod protocol;
pub mod registry;
mod remote;
pub mod remote_transaction;
pub mod state;
pub mod transaction_log;
pub mod wait;

pub use config::{CoordinatorConfig, MAX_WAIT_TIMEOUT_MS, TwoPhaseCommitMode};
pub use connection::{ConnectionId, ManagedConnection};
pub use coordinator::{CoordinatedTransactionState, Coordinator};
pub use error::{CoordinatorError, Result};
pub use policy::{RemoteWarning, WarningKind};
pub use remote_transaction::RemoteTransaction;
pub use state::RemoteTransactionState;
pub use transaction_log::{InMemoryTransactionLog, TransactionLog, TransactionRecord};
pub use wait::InterruptHandle;
