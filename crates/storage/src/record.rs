use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the status column read under lock from object tables.
pub const STATUS_COLUMN: &str = "status";

/// A row's id and stored status, as returned by a row-locking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub id: u64,
    pub status: i64,
}

/// A stored row: its id plus integer-valued columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: u64,
    pub columns: BTreeMap<String, i64>,
}

impl Row {
    pub fn new(id: u64) -> Self {
        Row {
            id,
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style column setter.
    pub fn with(mut self, column: &str, value: i64) -> Self {
        self.columns.insert(column.to_string(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<i64> {
        self.columns.get(column).copied()
    }
}
