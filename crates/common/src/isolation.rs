//! Isolation level and BEGIN options of the local transaction

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Transaction properties to reproduce on every remote node
///
/// The isolation level is always sent since remote defaults may differ.
/// `deferrable` and `read_only` are `None` unless the local BEGIN spelled
/// them out, in which case they are sent too; otherwise the remote node's
/// own defaults apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BeginOptions {
    pub isolation: IsolationLevel,
    pub deferrable: Option<bool>,
    pub read_only: Option<bool>,
}

impl BeginOptions {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            deferrable: None,
            read_only: None,
        }
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = Some(deferrable);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// `BEGIN TRANSACTION ISOLATION LEVEL ...;`
    pub fn begin_command(&self) -> String {
        let mut command = format!("BEGIN TRANSACTION ISOLATION LEVEL {}", self.isolation);

        match self.deferrable {
            Some(true) => command.push_str(" DEFERRABLE"),
            Some(false) => command.push_str(" NOT DEFERRABLE"),
            None => {}
        }

        match self.read_only {
            Some(true) => command.push_str(" READ ONLY"),
            Some(false) => command.push_str(" READ WRITE"),
            None => {}
        }

        command.push(';');
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_begin_sends_only_isolation() {
        assert_eq!(
            BeginOptions::default().begin_command(),
            "BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED;"
        );
    }

    #[test]
    fn test_explicit_clauses() {
        let options = BeginOptions::new(IsolationLevel::Serializable)
            .deferrable(true)
            .read_only(true);
        assert_eq!(
            options.begin_command(),
            "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE DEFERRABLE READ ONLY;"
        );

        let options = BeginOptions::new(IsolationLevel::RepeatableRead)
            .deferrable(false)
            .read_only(false);
        assert_eq!(
            options.begin_command(),
            "BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ NOT DEFERRABLE READ WRITE;"
        );
    }
}
