//! Prepared transaction names
//!
//! Every PREPARE TRANSACTION gets a freshly minted name of the form
//! `citus_<group>_<pid>_<transaction number>_<connection number>`.
//!
//! - the group distinguishes coordinators, each one only recovers its own 2PCs
//! - the pid adds entropy across coordinator restarts
//! - the transaction number distinguishes transactions from one process
//! - the connection number distinguishes connections to the same node within
//!   one transaction
//!
//! All fields are printed unsigned so no minus sign ever appears in a name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::IntErrorKind;
use std::str::FromStr;
use thiserror::Error;

/// Identifier length limit of the remote engine, including the terminator
pub const NAMEDATALEN: usize = 64;

pub const PREPARED_NAME_PREFIX: &str = "citus";

/// Longest name `PreparedTransactionName` can render: prefix, four
/// separators, and the decimal widths of u32, u32, u64 and u32
pub const MAX_PREPARED_NAME_LEN: usize = PREPARED_NAME_PREFIX.len() + 4 + 10 + 10 + 20 + 10;

const _: () = assert!(MAX_PREPARED_NAME_LEN < NAMEDATALEN);

/// Reasons a string is not a prepared transaction name of ours
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreparedNameError {
    #[error("prepared transaction name does not start with '{PREPARED_NAME_PREFIX}_': {0}")]
    UnexpectedPrefix(String),

    #[error("prepared transaction name is missing the {0} segment")]
    MissingSegment(&'static str),

    #[error("{field} segment is not an unsigned number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field} segment is out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("prepared transaction name has trailing segments")]
    TrailingSegments,
}

/// Decoded form of a prepared transaction name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreparedTransactionName {
    pub group_id: u32,
    pub pid: u32,
    pub transaction_number: u64,
    pub connection_number: u32,
}

impl PreparedTransactionName {
    pub fn new(group_id: u32, pid: u32, transaction_number: u64, connection_number: u32) -> Self {
        Self {
            group_id,
            pid,
            transaction_number,
            connection_number,
        }
    }

    /// Parse a name produced by `Display`
    ///
    /// Any missing, non-numeric, overflowing or extra segment is rejected.
    pub fn parse(name: &str) -> Result<Self, PreparedNameError> {
        let mut segments = name.split('_');

        if segments.next() != Some(PREPARED_NAME_PREFIX) {
            return Err(PreparedNameError::UnexpectedPrefix(name.to_string()));
        }

        let group_id = parse_segment(segments.next(), "group id")?;
        let pid = parse_segment(segments.next(), "process id")?;
        let transaction_number = parse_segment(segments.next(), "transaction number")?;
        let connection_number = parse_segment(segments.next(), "connection number")?;

        if segments.next().is_some() {
            return Err(PreparedNameError::TrailingSegments);
        }

        Ok(Self::new(group_id, pid, transaction_number, connection_number))
    }

    /// Name as a quoted SQL literal
    pub fn quoted(&self) -> String {
        // the rendered name only contains [a-z0-9_], no escaping needed
        format!("'{}'", self)
    }

    /// Whether the coordinator in `group_id` started this prepared transaction
    pub fn is_initiated_by(&self, group_id: u32) -> bool {
        self.group_id == group_id
    }
}

fn parse_segment<T>(segment: Option<&str>, field: &'static str) -> Result<T, PreparedNameError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    let value = segment.ok_or(PreparedNameError::MissingSegment(field))?;

    // FromStr for integers accepts a leading '+', we do not
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PreparedNameError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }

    value.parse::<T>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => PreparedNameError::OutOfRange {
            field,
            value: value.to_string(),
        },
        _ => PreparedNameError::InvalidNumber {
            field,
            value: value.to_string(),
        },
    })
}

impl fmt::Display for PreparedTransactionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            PREPARED_NAME_PREFIX,
            self.group_id,
            self.pid,
            self.transaction_number,
            self.connection_number
        )
    }
}

impl FromStr for PreparedTransactionName {
    type Err = PreparedNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
