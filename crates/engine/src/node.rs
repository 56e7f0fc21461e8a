//! Shared state of one mock remote node
//!
//! Connections to the same node share its command log, fault rules and the
//! set of prepared transactions, the way backends of one server share
//! `pg_prepared_xacts`.

use crate::fault::{FaultRule, take_matching};
use dtx_common::RemoteNode;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Notify;

/// A command as received by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedCommand {
    pub connection_id: u64,
    pub command: String,
}

#[derive(Debug, Default)]
struct NodeState {
    log: Vec<LoggedCommand>,
    faults: Vec<FaultRule>,
    prepared: BTreeSet<String>,
    committed_prepared: Vec<String>,
    rolled_back_prepared: Vec<String>,
    reply_delay: Option<Duration>,
    down: bool,
    next_connection_id: u64,
    cancel_requests: u64,
    shutdowns: u64,
}

/// Mock remote node
pub struct MockNode {
    node: RemoteNode,
    state: Mutex<NodeState>,
    /// Wakes connections parked on a hung command
    released: Notify,
}

impl MockNode {
    pub fn new(node: RemoteNode) -> Self {
        Self {
            node,
            state: Mutex::new(NodeState::default()),
            released: Notify::new(),
        }
    }

    pub fn node(&self) -> &RemoteNode {
        &self.node
    }

    /// Install a fault rule
    pub fn inject(&self, rule: FaultRule) {
        self.state.lock().faults.push(rule);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Delay every reply by `delay`
    pub fn set_reply_delay(&self, delay: Option<Duration>) {
        self.state.lock().reply_delay = delay;
    }

    /// Refuse new connections
    pub fn set_down(&self, down: bool) {
        self.state.lock().down = down;
    }

    pub fn is_down(&self) -> bool {
        self.state.lock().down
    }

    /// Every command received, in arrival order
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .map(|entry| entry.command.clone())
            .collect()
    }

    /// Commands received on one connection
    pub fn commands_for(&self, connection_id: u64) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|entry| entry.connection_id == connection_id)
            .map(|entry| entry.command.clone())
            .collect()
    }

    /// Whether any received command contains `pattern`
    pub fn received(&self, pattern: &str) -> bool {
        self.state
            .lock()
            .log
            .iter()
            .any(|entry| entry.command.contains(pattern))
    }

    /// Names of transactions currently prepared on the node
    pub fn prepared_transactions(&self) -> Vec<String> {
        self.state.lock().prepared.iter().cloned().collect()
    }

    pub fn committed_prepared(&self) -> Vec<String> {
        self.state.lock().committed_prepared.clone()
    }

    pub fn rolled_back_prepared(&self) -> Vec<String> {
        self.state.lock().rolled_back_prepared.clone()
    }

    pub fn cancel_requests(&self) -> u64 {
        self.state.lock().cancel_requests
    }

    pub fn shutdowns(&self) -> u64 {
        self.state.lock().shutdowns
    }

    /// Let every hung command run to completion
    pub fn release_hung_commands(&self) {
        self.released.notify_waiters();
    }

    pub(crate) fn open_connection(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.down {
            return None;
        }
        state.next_connection_id += 1;
        Some(state.next_connection_id)
    }

    pub(crate) fn reply_delay(&self) -> Option<Duration> {
        self.state.lock().reply_delay
    }

    /// Check the fault rules for a command about to be sent
    pub(crate) fn fault_for(&self, text: &str) -> Option<FaultRule> {
        take_matching(&mut self.state.lock().faults, text)
    }

    pub(crate) fn record(&self, connection_id: u64, command: &str) {
        self.state.lock().log.push(LoggedCommand {
            connection_id,
            command: command.to_string(),
        });
    }

    pub(crate) fn prepare(&self, name: &str) -> bool {
        self.state.lock().prepared.insert(name.to_string())
    }

    pub(crate) fn commit_prepared(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        if state.prepared.remove(name) {
            state.committed_prepared.push(name.to_string());
            true
        } else {
            false
        }
    }

    pub(crate) fn rollback_prepared(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        if state.prepared.remove(name) {
            state.rolled_back_prepared.push(name.to_string());
            true
        } else {
            false
        }
    }

    pub(crate) fn count_cancel(&self) {
        self.state.lock().cancel_requests += 1;
    }

    pub(crate) fn count_shutdown(&self) {
        self.state.lock().shutdowns += 1;
    }

    pub(crate) async fn wait_released(&self) {
        self.released.notified().await;
    }
}
