//! Common types for the remote transaction coordinator
//!
//! This crate defines:
//! - Distributed transaction identifiers and their wire rendering
//! - Prepared transaction names (format and parse)
//! - Sub-transaction context mirrored onto remote nodes
//! - Isolation and BEGIN options
//! - The connection contract the coordinator drives

mod connection;
mod isolation;
mod prepared_name;
mod sub_xact;
mod transaction_id;

pub use connection::{CommandResult, RemoteConnection, RemoteNode, TransactionStatus};
pub use isolation::{BeginOptions, IsolationLevel};
pub use prepared_name::{
    MAX_PREPARED_NAME_LEN, NAMEDATALEN, PREPARED_NAME_PREFIX, PreparedNameError,
    PreparedTransactionName,
};
pub use sub_xact::{SubTransactionId, SubXactContext, TOP_SUB_TRANSACTION_ID, savepoint_name};
pub use transaction_id::{DistributedTransactionId, next_transaction_number};
