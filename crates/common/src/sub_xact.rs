//! Sub-transaction (savepoint) context mirrored onto remote nodes

use serde::{Deserialize, Serialize};

/// Local sub-transaction identifier
pub type SubTransactionId = u32;

/// Identifier of the top-level transaction, below every savepoint
pub const TOP_SUB_TRANSACTION_ID: SubTransactionId = 1;

/// An open local sub-transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubXactContext {
    pub sub_id: SubTransactionId,
    /// `SET LOCAL` statements in effect when the savepoint was created,
    /// each terminated with `;`
    pub set_local_cmds: Option<String>,
}

impl SubXactContext {
    pub fn new(sub_id: SubTransactionId) -> Self {
        Self {
            sub_id,
            set_local_cmds: None,
        }
    }

    pub fn with_set_local_cmds(mut self, cmds: impl Into<String>) -> Self {
        self.set_local_cmds = Some(cmds.into());
        self
    }

    /// Name of the remote savepoint mirroring this sub-transaction
    pub fn savepoint_name(&self) -> String {
        savepoint_name(self.sub_id)
    }

    /// Statements that re-enter this sub-transaction on a node that joins
    /// the transaction late
    pub fn replay_command(&self) -> String {
        let mut command = self.set_local_cmds.clone().unwrap_or_default();
        command.push_str("SAVEPOINT ");
        command.push_str(&self.savepoint_name());
        command.push(';');
        command
    }
}

/// Name of the remote savepoint for `sub_id`
pub fn savepoint_name(sub_id: SubTransactionId) -> String {
    format!("savepoint_{}", sub_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_without_set_local() {
        assert_eq!(SubXactContext::new(3).replay_command(), "SAVEPOINT savepoint_3;");
    }

    #[test]
    fn test_replay_with_set_local() {
        let ctx = SubXactContext::new(7).with_set_local_cmds("SET LOCAL work_mem TO '64MB';");
        assert_eq!(
            ctx.replay_command(),
            "SET LOCAL work_mem TO '64MB';SAVEPOINT savepoint_7;"
        );
    }
}
