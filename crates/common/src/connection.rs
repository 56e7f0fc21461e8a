//! Connection contract consumed by the coordinator
//!
//! The coordinator never blocks on a single node while others could make
//! progress: commands are queued with `send_command`, readiness of a whole
//! batch is awaited with `wait_for_reply`, and results are consumed
//! afterwards with `get_result`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote node a connection points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteNode {
    pub host: String,
    pub port: u16,
    /// Node group in the cluster metadata, if the node is a known worker
    pub group_id: Option<u32>,
}

impl RemoteNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            group_id: None,
        }
    }

    pub fn with_group(mut self, group_id: u32) -> Self {
        self.group_id = Some(group_id);
        self
    }
}

impl fmt::Display for RemoteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transaction status reported by the remote protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Connected, not in a transaction
    Idle,
    /// A command is in progress
    Active,
    /// Idle inside a valid transaction block
    InTransaction,
    /// Idle inside a failed transaction block
    InError,
    /// Connection is bad
    Unknown,
}

impl TransactionStatus {
    /// Whether the remote transaction can no longer commit
    pub fn is_broken(&self) -> bool {
        matches!(self, TransactionStatus::InError | TransactionStatus::Unknown)
    }
}

/// Outcome of one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResult {
    Ok,
    Error { message: String },
}

impl CommandResult {
    pub fn error(message: impl Into<String>) -> Self {
        CommandResult::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandResult::Ok)
    }

    /// A missing result counts as a failed response
    pub fn is_response_ok(result: Option<&CommandResult>) -> bool {
        matches!(result, Some(CommandResult::Ok))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CommandResult::Ok => None,
            CommandResult::Error { message } => Some(message),
        }
    }
}

/// A live connection to one remote node
#[async_trait]
pub trait RemoteConnection: Send {
    /// Node this connection is attached to
    fn node(&self) -> &RemoteNode;

    /// Queue a command without waiting for its reply
    ///
    /// Returns false if the command could not be transmitted, including when
    /// another command on this connection is still outstanding.
    fn send_command(&mut self, command: &str) -> bool;

    /// Resolve once every outstanding command has produced its replies or
    /// the connection broke
    async fn wait_for_reply(&mut self);

    /// Next result of the outstanding command, waiting for it if needed
    ///
    /// `None` once every result has been consumed.
    async fn get_result(&mut self) -> Option<CommandResult>;

    /// Next result if one is available right now
    fn try_get_result(&mut self) -> Option<CommandResult>;

    /// Whether results are still expected but not yet available
    fn is_busy(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Ask the remote side to cancel the running command
    fn send_cancellation(&mut self) -> bool;

    fn transaction_status(&self) -> TransactionStatus;

    /// Close the connection without waiting for anything
    fn shutdown(&mut self);
}
