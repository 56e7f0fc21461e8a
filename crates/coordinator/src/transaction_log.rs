//! Commit records for recovery
//!
//! Before a PREPARE TRANSACTION goes out, the coordinator records the name in
//! its own transaction, so recovery can tell committed prepared transactions
//! from orphans.

use dtx_common::PreparedTransactionName;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One prepared transaction the coordinator intends to commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Node group the transaction is prepared on
    pub group_id: u32,
    pub prepared_name: PreparedTransactionName,
    /// Distributed transaction the prepared transaction belongs to
    pub transaction_number: u64,
}

/// Durable store for transaction records
pub trait TransactionLog: Send + Sync {
    fn log_transaction_record(&self, record: TransactionRecord) -> Result<(), String>;
}

/// In-memory transaction log
#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    records: Mutex<Vec<TransactionRecord>>,
    failure: Mutex<Option<String>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TransactionRecord> {
        self.records.lock().clone()
    }

    /// Reject every following write with `message`, or accept again with `None`
    pub fn set_failure(&self, message: Option<String>) {
        *self.failure.lock() = message;
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn log_transaction_record(&self, record: TransactionRecord) -> Result<(), String> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(message);
        }
        self.records.lock().push(record);
        Ok(())
    }
}
