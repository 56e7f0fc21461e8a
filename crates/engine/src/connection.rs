//! Mock connection that follows the remote connection contract
//!
//! Each command is split into statements and run against a tiny model of a
//! remote backend: transaction block status, savepoint stack, and the node's
//! shared set of prepared transactions. One result is produced per executed
//! statement; the first failing statement ends the command, as in the simple
//! query protocol.

use crate::fault::{Fault, FaultRule};
use crate::node::MockNode;
use async_trait::async_trait;
use dtx_common::{CommandResult, RemoteConnection, RemoteNode, TransactionStatus};
use std::collections::VecDeque;
use std::sync::Arc;

const CONNECTION_LOST: &str = "server closed the connection unexpectedly";
const CANCELED: &str = "canceling statement due to user request";
const IN_FAILED_BLOCK: &str =
    "current transaction is aborted, commands ignored until end of transaction block";

/// Connection to a mock node
pub struct MockConnection {
    id: u64,
    node: Arc<MockNode>,
    connected: bool,
    status: TransactionStatus,
    savepoints: Vec<String>,
    pending: VecDeque<CommandResult>,
    /// Replies exist but have not arrived yet (only with a reply delay)
    awaiting_reply: bool,
    /// Command parked by a `Fault::Hang`
    hung: Option<String>,
}

impl MockConnection {
    pub(crate) fn new(id: u64, node: Arc<MockNode>) -> Self {
        Self {
            id,
            node,
            connected: true,
            status: TransactionStatus::Idle,
            savepoints: Vec::new(),
            pending: VecDeque::new(),
            awaiting_reply: false,
            hung: None,
        }
    }

    /// Connection number on its node, as used by `MockNode::commands_for`
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mock_node(&self) -> &Arc<MockNode> {
        &self.node
    }

    /// Drop the connection without any traffic, as a silent network failure
    pub fn simulate_failure(&mut self) {
        self.break_connection();
    }

    /// Override the backend's transaction status
    pub fn force_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }

    fn run(&mut self, command: &str, forced_error: Option<(String, String)>) {
        let statements: Vec<&str> = command
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let failing_index = forced_error.as_ref().map(|(pattern, _)| {
            statements
                .iter()
                .position(|s| s.contains(pattern.as_str()))
                .unwrap_or(0)
        });

        for (index, statement) in statements.iter().enumerate() {
            let result = match (&forced_error, failing_index) {
                (Some((_, message)), Some(failing)) if failing == index => {
                    CommandResult::error(message.clone())
                }
                _ => self.execute_statement(statement),
            };

            let failed = !result.is_ok();
            self.pending.push_back(result);

            if failed {
                if self.status != TransactionStatus::Idle {
                    self.status = TransactionStatus::InError;
                }
                break;
            }
        }
    }

    fn execute_statement(&mut self, statement: &str) -> CommandResult {
        let upper = statement.to_ascii_uppercase();

        if self.status == TransactionStatus::InError
            && !(upper.starts_with("ROLLBACK") || upper == "COMMIT")
        {
            return CommandResult::error(IN_FAILED_BLOCK);
        }

        if upper.starts_with("BEGIN") {
            self.status = TransactionStatus::InTransaction;
            self.savepoints.clear();
            CommandResult::Ok
        } else if let Some(name) = strip_keyword(statement, "ROLLBACK TO SAVEPOINT ") {
            match self.savepoints.iter().position(|s| s == name) {
                Some(position) => {
                    self.savepoints.truncate(position + 1);
                    self.status = TransactionStatus::InTransaction;
                    CommandResult::Ok
                }
                None => CommandResult::error(format!("savepoint \"{}\" does not exist", name)),
            }
        } else if let Some(name) = strip_keyword(statement, "RELEASE SAVEPOINT ") {
            match self.savepoints.iter().position(|s| s == name) {
                Some(position) => {
                    self.savepoints.truncate(position);
                    CommandResult::Ok
                }
                None => CommandResult::error(format!("savepoint \"{}\" does not exist", name)),
            }
        } else if let Some(name) = strip_keyword(statement, "SAVEPOINT ") {
            if self.status == TransactionStatus::Idle {
                return CommandResult::error("SAVEPOINT can only be used in transaction blocks");
            }
            self.savepoints.push(name.to_string());
            CommandResult::Ok
        } else if let Some(literal) = strip_keyword(statement, "PREPARE TRANSACTION ") {
            if self.status == TransactionStatus::Idle {
                return CommandResult::error("there is no transaction in progress");
            }
            self.status = TransactionStatus::Idle;
            self.savepoints.clear();
            let name = unquote(literal);
            if self.node.prepare(&name) {
                CommandResult::Ok
            } else {
                CommandResult::error(format!("transaction identifier \"{}\" is already in use", name))
            }
        } else if let Some(literal) = strip_keyword(statement, "COMMIT PREPARED ") {
            self.finish_prepared(literal, "COMMIT PREPARED", |node, name| {
                node.commit_prepared(name)
            })
        } else if let Some(literal) = strip_keyword(statement, "ROLLBACK PREPARED ") {
            self.finish_prepared(literal, "ROLLBACK PREPARED", |node, name| {
                node.rollback_prepared(name)
            })
        } else if upper == "COMMIT" || upper == "ROLLBACK" {
            self.status = TransactionStatus::Idle;
            self.savepoints.clear();
            CommandResult::Ok
        } else {
            CommandResult::Ok
        }
    }

    fn finish_prepared(
        &mut self,
        literal: &str,
        command: &str,
        apply: impl FnOnce(&MockNode, &str) -> bool,
    ) -> CommandResult {
        if self.status != TransactionStatus::Idle {
            return CommandResult::error(format!(
                "{} cannot run inside a transaction block",
                command
            ));
        }
        let name = unquote(literal);
        if apply(&self.node, &name) {
            CommandResult::Ok
        } else {
            CommandResult::error(format!(
                "prepared transaction with identifier \"{}\" does not exist",
                name
            ))
        }
    }

    fn break_connection(&mut self) {
        self.connected = false;
        self.hung = None;
        self.awaiting_reply = false;
        self.savepoints.clear();
    }
}

/// Case-insensitive keyword prefix strip
fn strip_keyword<'a>(statement: &'a str, keyword: &str) -> Option<&'a str> {
    let head = statement.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(statement[keyword.len()..].trim())
    } else {
        None
    }
}

fn unquote(literal: &str) -> String {
    literal
        .trim()
        .trim_start_matches('\'')
        .trim_end_matches('\'')
        .replace("''", "'")
}

#[async_trait]
impl RemoteConnection for MockConnection {
    fn node(&self) -> &RemoteNode {
        self.node.node()
    }

    fn send_command(&mut self, command: &str) -> bool {
        if !self.connected || self.is_busy() || !self.pending.is_empty() {
            return false;
        }

        let rule = self.node.fault_for(command);

        if let Some(FaultRule {
            fault: Fault::SendFailure,
            ..
        }) = &rule
        {
            tracing::debug!(node = %self.node.node(), "mock send failure: {}", command);
            self.break_connection();
            return false;
        }

        self.node.record(self.id, command);
        self.awaiting_reply = self.node.reply_delay().is_some();

        match rule {
            Some(FaultRule {
                fault: Fault::DropConnection,
                ..
            }) => {
                self.break_connection();
                self.pending.push_back(CommandResult::error(CONNECTION_LOST));
            }
            Some(FaultRule {
                fault: Fault::Hang, ..
            }) => {
                self.hung = Some(command.to_string());
            }
            Some(FaultRule {
                pattern,
                fault: Fault::ErrorResult(message),
                ..
            }) => {
                self.run(command, Some((pattern, message)));
            }
            _ => self.run(command, None),
        }

        true
    }

    async fn wait_for_reply(&mut self) {
        if self.awaiting_reply {
            if let Some(delay) = self.node.reply_delay() {
                tokio::time::sleep(delay).await;
            }
            self.awaiting_reply = false;
        }

        while self.connected && self.hung.is_some() {
            let node = self.node.clone();
            node.wait_released().await;
            if let Some(command) = self.hung.take() {
                self.run(&command, None);
            }
        }
    }

    async fn get_result(&mut self) -> Option<CommandResult> {
        if self.is_busy() {
            self.wait_for_reply().await;
        }
        self.pending.pop_front()
    }

    fn try_get_result(&mut self) -> Option<CommandResult> {
        if self.is_busy() {
            return None;
        }
        self.pending.pop_front()
    }

    fn is_busy(&self) -> bool {
        self.connected && (self.awaiting_reply || self.hung.is_some())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send_cancellation(&mut self) -> bool {
        if !self.connected {
            return false;
        }

        self.node.count_cancel();

        if self.hung.take().is_some() {
            self.awaiting_reply = false;
            self.pending.push_back(CommandResult::error(CANCELED));
            if self.status != TransactionStatus::Idle {
                self.status = TransactionStatus::InError;
            }
        }

        true
    }

    fn transaction_status(&self) -> TransactionStatus {
        if !self.connected {
            TransactionStatus::Unknown
        } else if self.is_busy() {
            TransactionStatus::Active
        } else {
            self.status
        }
    }

    fn shutdown(&mut self) {
        if self.connected {
            self.node.count_shutdown();
        }
        self.break_connection();
        self.pending.clear();
    }
}
