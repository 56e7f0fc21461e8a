//! Example of a coordinated transaction across three remote nodes
//!
//! Two nodes are written to and one is only read from. The writers are
//! committed with two-phase commit; the reader is never prepared and ends
//! with a plain COMMIT. A savepoint rollback heals a failure along the way.
//!
//! Run with: RUST_LOG=debug cargo run --example coordinated_commit

use dtx_common::{BeginOptions, IsolationLevel, RemoteConnection};
use dtx_coordinator::{Coordinator, CoordinatorConfig, InMemoryTransactionLog};
use dtx_engine::MockEngine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== Coordinated Commit Example ===\n");

    let engine = MockEngine::with_workers(3);
    let log = Arc::new(InMemoryTransactionLog::new());
    let mut coordinator = Coordinator::new(CoordinatorConfig::default(), log.clone())?;

    let mut connections = Vec::new();
    for n in 1..=3 {
        let connection = engine.connect(&format!("worker-{}", n), 5432)?;
        connections.push(coordinator.add_connection(connection));
    }
    println!("✓ Connected to {} workers", connections.len());

    let transaction_id = coordinator
        .begin_coordinated_transaction(BeginOptions::new(IsolationLevel::RepeatableRead))?;
    coordinator.begin_if_necessary(&connections).await?;
    println!("✓ Began distributed transaction {}", transaction_id);

    // the first two workers receive writes
    for &id in &connections[..2] {
        coordinator.mark_critical(id)?;
        coordinator.mark_placement_modified(id)?;
    }

    // a sub-transaction fails on the reader and is rolled back
    coordinator.push_sub_xact(2, None);
    coordinator.savepoint_begin(2).await?;
    if let Some(reader) = coordinator.connection_mut(connections[2]) {
        reader.connection_mut().send_command("SELECT 1/0");
    }
    coordinator.mark_failed(connections[2], false)?;
    coordinator.savepoint_rollback(2).await?;
    coordinator.pop_sub_xact();
    println!("✓ Rolled back to savepoint_2, reader healed");

    coordinator.pre_commit().await?;
    coordinator.commit().await?;
    println!("✓ Committed: {:?}", coordinator.coordinated_state());

    println!("\nCommit records:");
    for record in log.records() {
        println!("  group {} -> {}", record.group_id, record.prepared_name);
    }

    println!("\nCommands received:");
    for node in engine.nodes() {
        println!("  {}", node.node());
        for command in node.commands() {
            println!("    {}", command);
        }
    }

    for warning in coordinator.take_warnings() {
        println!("warning on {}: {}", warning.node, warning.message);
    }

    coordinator.end_transaction();
    Ok(())
}
