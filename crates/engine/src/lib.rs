//! In-memory mock remote nodes for testing coordinated transactions
//!
//! This crate provides an in-memory implementation of the remote connection
//! contract, allowing the coordinator to be exercised against several nodes
//! with injected send failures, error results, hung commands and dropped
//! connections.

use thiserror::Error;

pub mod connection;
pub mod engine;
pub mod fault;
pub mod node;

pub use connection::MockConnection;
pub use engine::MockEngine;
pub use fault::{Fault, FaultRule};
pub use node::{LoggedCommand, MockNode};

/// Mock engine errors
#[derive(Debug, Error)]
pub enum MockEngineError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Connection refused by {0}")]
    ConnectionRefused(String),
}

pub type Result<T> = std::result::Result<T, MockEngineError>;
