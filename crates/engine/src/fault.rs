//! Fault injection for mock nodes
//!
//! A rule matches every command whose text contains its pattern. Rules are
//! checked in insertion order and the first live match wins.

/// What goes wrong when a rule matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The command never leaves the client; the connection is broken
    SendFailure,
    /// The matching statement fails with this message
    ErrorResult(String),
    /// The command runs until cancelled or the connection is closed
    Hang,
    /// The node receives the command, then the connection drops before replying
    DropConnection,
}

/// A fault bound to a command pattern
#[derive(Debug, Clone)]
pub struct FaultRule {
    pub pattern: String,
    pub fault: Fault,
    /// How many more times the rule fires, `None` for always
    pub remaining: Option<u32>,
}

impl FaultRule {
    pub fn new(pattern: impl Into<String>, fault: Fault) -> Self {
        Self {
            pattern: pattern.into(),
            fault,
            remaining: None,
        }
    }

    /// Fire only for the next matching command
    pub fn once(mut self) -> Self {
        self.remaining = Some(1);
        self
    }

    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }

    pub(crate) fn matches(&self, text: &str) -> bool {
        self.remaining != Some(0) && text.contains(&self.pattern)
    }

    pub(crate) fn consume(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

/// Take the first live rule matching `text`, consuming one use of it
pub(crate) fn take_matching(rules: &mut [FaultRule], text: &str) -> Option<FaultRule> {
    let rule = rules.iter_mut().find(|rule| rule.matches(text))?;
    rule.consume();
    Some(rule.clone())
}
