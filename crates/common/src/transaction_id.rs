//! Distributed transaction identifier
//!
//! Every coordinated transaction carries an identifier that is shipped to each
//! participating node right after BEGIN, so remote backends can be correlated
//! with the coordinator-side transaction (deadlock detection, recovery).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one coordinated transaction
///
/// The tuple is unique across coordinators (`initiator_group_id`), processes
/// on one coordinator (`initiator_pid`) and transactions within a process
/// (`transaction_number`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributedTransactionId {
    /// Node group of the coordinator that started the transaction
    pub initiator_group_id: u32,
    /// Process on the coordinator that started the transaction
    pub initiator_pid: u32,
    /// Monotonic per-process transaction number
    pub transaction_number: u64,
    /// Wall-clock start of the transaction
    pub timestamp: DateTime<Utc>,
}

impl DistributedTransactionId {
    pub fn new(
        initiator_group_id: u32,
        initiator_pid: u32,
        transaction_number: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            initiator_group_id,
            initiator_pid,
            transaction_number,
            timestamp,
        }
    }

    /// Render the timestamp the way the remote engine prints a `timestamptz`
    pub fn timestamp_literal(&self) -> String {
        self.timestamp
            .format("%Y-%m-%d %H:%M:%S%.6f+00")
            .to_string()
    }

    /// Command that assigns this identifier to the remote backend
    ///
    /// Always terminated with `;` since it is appended to a batched BEGIN.
    pub fn assign_command(&self) -> String {
        format!(
            "SELECT assign_distributed_transaction_id({}, {}, '{}');",
            self.initiator_group_id,
            self.transaction_number,
            self.timestamp_literal()
        )
    }
}

impl fmt::Display for DistributedTransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.initiator_group_id, self.initiator_pid, self.transaction_number
        )
    }
}

/// Transaction numbers handed out in this process, shared by every coordinator
static TRANSACTION_NUMBER: AtomicU64 = AtomicU64::new(0);

/// Next transaction number of this process, starting at 1
pub fn next_transaction_number() -> u64 {
    TRANSACTION_NUMBER.fetch_add(1, Ordering::Relaxed) + 1
}

impl DistributedTransactionId {
    /// Allocate an identifier for a transaction starting now
    pub fn allocate(group_id: u32, pid: u32) -> Self {
        Self::new(group_id, pid, next_transaction_number(), Utc::now())
    }
}
