//! Remote command text

use dtx_common::{
    BeginOptions, DistributedTransactionId, PreparedTransactionName, SubTransactionId,
    SubXactContext, TOP_SUB_TRANSACTION_ID, savepoint_name,
};

pub const COMMIT: &str = "COMMIT";
pub const ROLLBACK: &str = "ROLLBACK";

/// Command that opens a remote transaction and brings it level with the local
/// one, plus the deepest sub-transaction it queues
///
/// BEGIN, then a savepoint (with its SET LOCALs) per open local
/// sub-transaction, then the active SET statements, then the distributed
/// transaction id assignment.
pub fn begin_batch(
    options: &BeginOptions,
    sub_xacts: &[SubXactContext],
    active_set_statements: Option<&str>,
    transaction_id: &DistributedTransactionId,
) -> (String, SubTransactionId) {
    let mut command = options.begin_command();
    let mut last_queued = TOP_SUB_TRANSACTION_ID;

    for sub_xact in sub_xacts {
        command.push_str(&sub_xact.replay_command());
        last_queued = sub_xact.sub_id;
    }

    if let Some(statements) = active_set_statements {
        command.push_str(statements);
    }

    command.push_str(&transaction_id.assign_command());
    (command, last_queued)
}

/// BEGIN plus the distributed transaction id, without savepoint replay
pub fn begin_and_assign(options: &BeginOptions, transaction_id: &DistributedTransactionId) -> String {
    format!("{}{}", options.begin_command(), transaction_id.assign_command())
}

pub fn savepoint(sub_id: SubTransactionId) -> String {
    format!("SAVEPOINT {}", savepoint_name(sub_id))
}

pub fn release_savepoint(sub_id: SubTransactionId) -> String {
    format!("RELEASE SAVEPOINT {}", savepoint_name(sub_id))
}

pub fn rollback_to_savepoint(sub_id: SubTransactionId) -> String {
    format!("ROLLBACK TO SAVEPOINT {}", savepoint_name(sub_id))
}

pub fn prepare_transaction(name: &PreparedTransactionName) -> String {
    format!("PREPARE TRANSACTION {}", name.quoted())
}

pub fn commit_prepared(name: &PreparedTransactionName) -> String {
    format!("COMMIT PREPARED {}", name.quoted())
}

pub fn rollback_prepared(name: &PreparedTransactionName) -> String {
    format!("ROLLBACK PREPARED {}", name.quoted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_common::IsolationLevel;

    fn transaction_id() -> DistributedTransactionId {
        DistributedTransactionId::new(0, 4242, 17, chrono::Utc::now())
    }

    #[test]
    fn test_begin_batch_without_sub_xacts() {
        let id = transaction_id();
        let (command, last_queued) = begin_batch(&BeginOptions::default(), &[], None, &id);

        assert!(command.starts_with("BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED;"));
        assert!(command.ends_with(&id.assign_command()));
        assert_eq!(last_queued, TOP_SUB_TRANSACTION_ID);
    }

    #[test]
    fn test_begin_batch_replays_sub_xacts_in_order() {
        let id = transaction_id();
        let sub_xacts = vec![
            SubXactContext::new(2).with_set_local_cmds("SET LOCAL work_mem TO '64MB';"),
            SubXactContext::new(5),
        ];
        let options = BeginOptions {
            isolation: IsolationLevel::RepeatableRead,
            ..Default::default()
        };

        let (command, last_queued) =
            begin_batch(&options, &sub_xacts, Some("SET LOCAL search_path TO s;"), &id);

        let begin = command.find("BEGIN").unwrap();
        let set_local = command.find("SET LOCAL work_mem").unwrap();
        let first = command.find("SAVEPOINT savepoint_2;").unwrap();
        let second = command.find("SAVEPOINT savepoint_5;").unwrap();
        let active = command.find("SET LOCAL search_path").unwrap();
        let assign = command.find("assign_distributed_transaction_id").unwrap();

        assert!(begin < set_local && set_local < first);
        assert!(first < second && second < active && active < assign);
        assert_eq!(last_queued, 5);
    }

    #[test]
    fn test_savepoint_commands() {
        assert_eq!(savepoint(3), "SAVEPOINT savepoint_3");
        assert_eq!(release_savepoint(3), "RELEASE SAVEPOINT savepoint_3");
        assert_eq!(rollback_to_savepoint(3), "ROLLBACK TO SAVEPOINT savepoint_3");
    }

    #[test]
    fn test_prepared_commands() {
        let name = PreparedTransactionName::new(0, 1, 2, 3);
        assert_eq!(prepare_transaction(&name), "PREPARE TRANSACTION 'citus_0_1_2_3'");
        assert_eq!(commit_prepared(&name), "COMMIT PREPARED 'citus_0_1_2_3'");
        assert_eq!(rollback_prepared(&name), "ROLLBACK PREPARED 'citus_0_1_2_3'");
    }
}
