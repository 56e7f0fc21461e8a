//! Savepoints mirrored onto remote transactions

use dtx_common::{BeginOptions, RemoteConnection, TransactionStatus};
use dtx_coordinator::{
    ConnectionId, Coordinator, CoordinatorConfig, CoordinatorError, InMemoryTransactionLog,
    RemoteTransactionState, WarningKind,
};
use dtx_engine::{Fault, FaultRule, MockConnection, MockEngine};
use std::sync::Arc;

async fn begun(workers: u32) -> (MockEngine, Coordinator<MockConnection>, Vec<ConnectionId>) {
    let engine = MockEngine::with_workers(workers);
    let mut coordinator = Coordinator::new(
        CoordinatorConfig::default(),
        Arc::new(InMemoryTransactionLog::new()),
    )
    .unwrap();

    let connections: Vec<ConnectionId> = (1..=workers)
        .map(|n| coordinator.add_connection(engine.connect(&format!("worker-{}", n), 5432).unwrap()))
        .collect();

    coordinator
        .begin_coordinated_transaction(BeginOptions::default())
        .unwrap();
    coordinator.begin_if_necessary(&connections).await.unwrap();

    (engine, coordinator, connections)
}

fn commands(engine: &MockEngine, n: u32) -> Vec<String> {
    engine
        .node(&format!("worker-{}", n), 5432)
        .unwrap()
        .commands()
}

/// Fail the remote transaction as a statement error inside it would
fn break_transaction(coordinator: &mut Coordinator<MockConnection>, id: ConnectionId) {
    coordinator
        .connection_mut(id)
        .unwrap()
        .connection_mut()
        .force_status(TransactionStatus::InError);
    coordinator.mark_failed(id, false).unwrap();
}

#[tokio::test]
async fn test_savepoint_begin_and_release() {
    let (engine, mut coordinator, connections) = begun(2).await;

    coordinator.push_sub_xact(2, None);
    coordinator.savepoint_begin(2).await.unwrap();

    for n in 1..=2 {
        assert_eq!(commands(&engine, n).last().unwrap(), "SAVEPOINT savepoint_2");
    }
    for &id in &connections {
        let transaction = coordinator.remote_transaction(id).unwrap();
        assert_eq!(transaction.last_successful_sub_xact(), 2);
    }

    coordinator.savepoint_release(2).await.unwrap();
    coordinator.pop_sub_xact();

    for n in 1..=2 {
        assert_eq!(
            commands(&engine, n).last().unwrap(),
            "RELEASE SAVEPOINT savepoint_2"
        );
    }
    assert!(coordinator.warnings().is_empty());
}

#[tokio::test]
async fn test_failed_connection_is_left_out_of_savepoints() {
    let (engine, mut coordinator, connections) = begun(2).await;
    coordinator.mark_failed(connections[1], false).unwrap();

    coordinator.savepoint_begin(2).await.unwrap();

    assert!(engine
        .node("worker-1", 5432)
        .unwrap()
        .received("SAVEPOINT savepoint_2"));
    assert_eq!(commands(&engine, 2).len(), 1);
}

#[tokio::test]
async fn test_savepoint_error_on_critical_connection_is_raised() {
    let (engine, mut coordinator, connections) = begun(2).await;
    coordinator.mark_critical(connections[0]).unwrap();
    engine.node("worker-1", 5432).unwrap().inject(
        FaultRule::new("SAVEPOINT savepoint_2", Fault::ErrorResult("out of shared memory".into()))
            .once(),
    );

    coordinator.push_sub_xact(2, None);
    let err = coordinator.savepoint_begin(2).await.unwrap_err();

    match err {
        CoordinatorError::RemoteCommandFailed { node, message } => {
            assert_eq!(node, "worker-1:5432");
            assert_eq!(message, "out of shared memory");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(coordinator.remote_transaction(connections[0]).unwrap().is_failed());
}

#[tokio::test]
async fn test_savepoint_error_on_non_critical_connection_only_warns() {
    let (engine, mut coordinator, connections) = begun(2).await;
    coordinator.mark_critical(connections[0]).unwrap();
    engine.node("worker-2", 5432).unwrap().inject(
        FaultRule::new("SAVEPOINT savepoint_2", Fault::ErrorResult("out of shared memory".into()))
            .once(),
    );

    coordinator.push_sub_xact(2, None);
    coordinator.savepoint_begin(2).await.unwrap();

    let reader = coordinator.remote_transaction(connections[1]).unwrap();
    assert!(reader.is_failed());
    assert_ne!(reader.last_successful_sub_xact(), 2);
    assert_eq!(
        coordinator
            .remote_transaction(connections[0])
            .unwrap()
            .last_successful_sub_xact(),
        2
    );

    let warnings = coordinator.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, WarningKind::ResultError);
    assert_eq!(warnings[0].node, "worker-2:5432");
}

#[tokio::test]
async fn test_release_error_on_critical_connection_is_raised() {
    let (engine, mut coordinator, connections) = begun(2).await;
    coordinator.mark_critical(connections[1]).unwrap();

    coordinator.push_sub_xact(2, None);
    coordinator.savepoint_begin(2).await.unwrap();

    engine.node("worker-2", 5432).unwrap().inject(FaultRule::new(
        "RELEASE SAVEPOINT",
        Fault::ErrorResult("savepoint \"savepoint_2\" does not exist".into()),
    ));
    let err = coordinator.savepoint_release(2).await.unwrap_err();

    assert!(matches!(err, CoordinatorError::RemoteCommandFailed { ref node, .. } if node == "worker-2:5432"));
    assert!(coordinator.remote_transaction(connections[1]).unwrap().is_failed());
    assert!(!coordinator.remote_transaction(connections[0]).unwrap().is_failed());
}

#[tokio::test]
async fn test_rollback_to_savepoint_heals_failed_connection() {
    let (engine, mut coordinator, connections) = begun(2).await;
    let id = connections[0];

    coordinator.savepoint_begin(2).await.unwrap();
    break_transaction(&mut coordinator, id);

    coordinator.savepoint_rollback(2).await.unwrap();

    let transaction = coordinator.remote_transaction(id).unwrap();
    assert!(!transaction.is_failed());
    assert!(!transaction.is_recovering());
    assert_eq!(transaction.state(), RemoteTransactionState::Started);
    assert_eq!(
        commands(&engine, 1).last().unwrap(),
        "ROLLBACK TO SAVEPOINT savepoint_2"
    );

    // cancellation goes out first, to every connection
    for n in 1..=2 {
        assert_eq!(
            engine
                .node(&format!("worker-{}", n), 5432)
                .unwrap()
                .cancel_requests(),
            1
        );
    }

    // the healed transaction commits normally
    coordinator.pre_commit().await.unwrap();
    coordinator.commit().await.unwrap();
    assert_eq!(commands(&engine, 1).last().unwrap(), "COMMIT");
    assert_eq!(
        coordinator.remote_transaction(id).unwrap().state(),
        RemoteTransactionState::Committed
    );
}

#[tokio::test]
async fn test_rollback_skips_connection_past_the_target_savepoint() {
    let (engine, mut coordinator, connections) = begun(2).await;
    let id = connections[0];

    coordinator.savepoint_begin(2).await.unwrap();
    coordinator.savepoint_begin(3).await.unwrap();
    break_transaction(&mut coordinator, id);
    let sent_before = commands(&engine, 1).len();

    coordinator.savepoint_rollback(2).await.unwrap();

    assert_eq!(commands(&engine, 1).len(), sent_before);
    assert!(coordinator.remote_transaction(id).unwrap().is_failed());
    assert_eq!(
        commands(&engine, 2).last().unwrap(),
        "ROLLBACK TO SAVEPOINT savepoint_2"
    );
}

#[tokio::test]
async fn test_rollback_cancels_running_query() {
    let (engine, mut coordinator, connections) = begun(1).await;
    let id = connections[0];
    coordinator.savepoint_begin(2).await.unwrap();

    let node = engine.node("worker-1", 5432).unwrap();
    node.inject(FaultRule::new("pg_sleep", Fault::Hang).once());
    coordinator
        .connection_mut(id)
        .unwrap()
        .connection_mut()
        .send_command("SELECT pg_sleep(600)");

    coordinator.savepoint_rollback(2).await.unwrap();

    let transaction = coordinator.remote_transaction(id).unwrap();
    assert!(!transaction.is_failed());
    assert_eq!(node.commands().last().unwrap(), "ROLLBACK TO SAVEPOINT savepoint_2");
    // the cancellation error was discarded, not reported
    assert!(coordinator.warnings().is_empty());
}

#[tokio::test]
async fn test_rollback_unclaims_connections() {
    let (_engine, mut coordinator, connections) = begun(2).await;
    coordinator.savepoint_begin(2).await.unwrap();
    for &id in &connections {
        assert!(coordinator.claim_connection(id).unwrap());
    }

    coordinator.savepoint_rollback(2).await.unwrap();

    for &id in &connections {
        assert!(!coordinator.connection(id).unwrap().is_claimed());
    }
}

#[tokio::test]
async fn test_connection_joining_inside_a_savepoint_can_roll_back_to_it() {
    let engine = MockEngine::with_workers(2);
    let mut coordinator = Coordinator::new(
        CoordinatorConfig::default(),
        Arc::new(InMemoryTransactionLog::new()),
    )
    .unwrap();
    let first = coordinator.add_connection(engine.connect("worker-1", 5432).unwrap());
    let second = coordinator.add_connection(engine.connect("worker-2", 5432).unwrap());

    coordinator
        .begin_coordinated_transaction(BeginOptions::default())
        .unwrap();
    coordinator.begin_one_if_necessary(first).await.unwrap();
    coordinator.push_sub_xact(2, None);
    coordinator.savepoint_begin(2).await.unwrap();

    // the late joiner replays savepoint_2 in its BEGIN
    coordinator.begin_one_if_necessary(second).await.unwrap();
    assert!(commands(&engine, 2)[0].contains("SAVEPOINT savepoint_2;"));
    assert_eq!(
        coordinator.remote_transaction(second).unwrap().last_successful_sub_xact(),
        2
    );

    coordinator.savepoint_rollback(2).await.unwrap();
    assert_eq!(
        commands(&engine, 2).last().unwrap(),
        "ROLLBACK TO SAVEPOINT savepoint_2"
    );
    assert!(coordinator.warnings().is_empty());
}
