use std::fmt;

use serde_json::{Map, Value};

/// A table row: column name to JSON value.
pub type Row = Map<String, Value>;

/// A conjunction of exact-equality conditions.
///
/// An empty filter matches every row. A condition on `Value::Null` matches
/// rows where the column is null or absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Match every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match rows where `column == value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(column, value)
    }

    /// Add another equality condition.
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, wanted)| {
            match (row.get(column), wanted) {
                (None, Value::Null) => true,
                (Some(actual), wanted) => actual == wanted,
                (None, _) => false,
            }
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return f.write_str("*");
        }
        for (i, (column, value)) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{column} = {value}")?;
        }
        Ok(())
    }
}

/// Eager join: embed the first row of `table` whose `foreign_column` equals
/// this row's `local_column`, under the key `alias` (null when absent).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    pub local_column: String,
    pub foreign_column: String,
    pub alias: String,
}

impl Join {
    /// Join on a column that has the same name on both sides, embedding the
    /// joined row under the table name.
    pub fn on(table: impl Into<String>, column: impl Into<String>) -> Self {
        let table = table.into();
        let column = column.into();
        Self {
            alias: table.clone(),
            table,
            local_column: column.clone(),
            foreign_column: column,
        }
    }
}
