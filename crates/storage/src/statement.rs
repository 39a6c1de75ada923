//! Logical write statements and their SQL rendering.
//!
//! Backends receive statements as data and may execute them however they
//! like. Every statement also renders to one deterministic SQL string, which
//! SQL backends execute as-is and which batching uses to bound payload size.

use std::fmt::{self, Write as _};

use serde::Serialize;

/// One `column = value` pair of an UPDATE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub column: String,
    pub value: i64,
}

impl Assignment {
    pub fn new(column: &str, value: i64) -> Self {
        Assignment {
            column: column.to_string(),
            value,
        }
    }
}

/// A logical UPDATE statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// `update <table> set <assignments> where <id_field>=<id>`
    SetColumns {
        table: String,
        id_field: String,
        id: u64,
        assignments: Vec<Assignment>,
    },
    /// `update <table> set <column>=<value> where <id_field> in (<ids>)`
    SetColumnForIds {
        table: String,
        id_field: String,
        column: String,
        value: i64,
        ids: Vec<u64>,
    },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::SetColumns { table, .. } | Statement::SetColumnForIds { table, .. } => {
                table.as_str()
            }
        }
    }

    /// Ids of the rows the statement writes.
    pub fn ids(&self) -> &[u64] {
        match self {
            Statement::SetColumns { id, .. } => std::slice::from_ref(id),
            Statement::SetColumnForIds { ids, .. } => ids,
        }
    }

    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::SetColumns {
                table,
                id_field,
                id,
                assignments,
            } => {
                write!(f, "update {table} set")?;
                let mut delim = ' ';
                for a in assignments {
                    write!(f, "{delim}{}={}", a.column, a.value)?;
                    delim = ',';
                }
                write!(f, " where {id_field}={id};")
            }
            Statement::SetColumnForIds {
                table,
                id_field,
                column,
                value,
                ids,
            } => {
                write!(
                    f,
                    "update {table} set {column}={value} where {};",
                    id_condition(id_field, ids)
                )
            }
        }
    }
}

/// `<field>=<id>` for one id, `<field> in (<ids>)` for several. An empty
/// list matches no row: `1=0`.
pub fn id_condition(id_field: &str, ids: &[u64]) -> String {
    match ids {
        [] => return "1=0".to_string(),
        [id] => return format!("{id_field}={id}"),
        _ => {}
    }

    let mut sql = format!("{id_field} in (");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        let _ = write!(sql, "{id}");
    }
    sql.push(')');
    sql
}

/// SQL of the row-locking status read.
pub fn lock_query_sql(table: &str, id_field: &str, ids: &[u64]) -> String {
    format!(
        "select {id_field},status from {table} where {} for update",
        id_condition(id_field, ids)
    )
}

/// SQL of a batched delete.
pub fn delete_sql(table: &str, id_field: &str, ids: &[u64]) -> String {
    format!("delete from {table} where {};", id_condition(id_field, ids))
}
