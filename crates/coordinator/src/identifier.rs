//! Prepared transaction name assignment

use dtx_common::PreparedTransactionName;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-wide counter keeping names unique among connections to one node
static CONNECTION_NUMBER: AtomicU32 = AtomicU32::new(0);

/// Next connection number; wraps around after `u32::MAX`
pub fn next_connection_number() -> u32 {
    CONNECTION_NUMBER.fetch_add(1, Ordering::Relaxed)
}

/// Mint a fresh prepared transaction name
pub fn assign_2pc_identifier(
    group_id: u32,
    process_id: u32,
    transaction_number: u64,
) -> PreparedTransactionName {
    PreparedTransactionName::new(
        group_id,
        process_id,
        transaction_number,
        next_connection_number(),
    )
}
