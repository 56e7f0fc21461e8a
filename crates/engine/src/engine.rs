//! Core mock engine implementation
//!
//! The mock engine is a cluster of mock nodes addressed by `host:port`.
//! Connections are handed out per node and share that node's state.

use crate::{MockConnection, MockEngineError, MockNode, Result};
use dtx_common::RemoteNode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Mock cluster of remote nodes
#[derive(Default)]
pub struct MockEngine {
    nodes: Mutex<HashMap<String, Arc<MockNode>>>,
}

impl MockEngine {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, replacing any node with the same address
    pub fn add_node(&self, node: RemoteNode) -> Arc<MockNode> {
        let key = node.to_string();
        let mock = Arc::new(MockNode::new(node));
        self.nodes.lock().insert(key, mock.clone());
        mock
    }

    /// Register `count` workers `worker-1..=count` on port 5432, with group
    /// ids matching their number
    pub fn with_workers(count: u32) -> Self {
        let engine = Self::new();
        for n in 1..=count {
            engine.add_node(RemoteNode::new(format!("worker-{}", n), 5432).with_group(n));
        }
        engine
    }

    pub fn node(&self, host: &str, port: u16) -> Result<Arc<MockNode>> {
        let key = format!("{}:{}", host, port);
        self.nodes
            .lock()
            .get(&key)
            .cloned()
            .ok_or(MockEngineError::NodeNotFound(key))
    }

    pub fn nodes(&self) -> Vec<Arc<MockNode>> {
        let mut nodes: Vec<_> = self.nodes.lock().values().cloned().collect();
        nodes.sort_by(|a, b| a.node().to_string().cmp(&b.node().to_string()));
        nodes
    }

    /// Open a new connection to a node
    pub fn connect(&self, host: &str, port: u16) -> Result<MockConnection> {
        let node = self.node(host, port)?;
        let id = node
            .open_connection()
            .ok_or_else(|| MockEngineError::ConnectionRefused(node.node().to_string()))?;

        tracing::debug!(node = %node.node(), connection = id, "mock connection opened");
        Ok(MockConnection::new(id, node))
    }
}
