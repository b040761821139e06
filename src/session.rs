//! Driver boundary: what this crate needs from a connected session.

use crate::error::{DaoError, DaoResult};
use crate::statement::ExecutableStatement;
use crate::types::{ConsistencyLevel, CqlValue};

use std::fmt;

/// Server-side handle returned when a statement is prepared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedId(pub Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
  Logged,
  Unlogged,
  Counter,
}

/// A connected session to the column store.
///
/// Implementations wrap a real driver; [`crate::memory::MemorySession`] is an
/// in-process one. Errors coming out of the driver should be wrapped with
/// [`DaoError::driver`] and are never retried by this crate.
pub trait Session: Send + Sync {
  fn prepare(&self, cql: &str) -> DaoResult<PreparedId>;

  fn execute(&self, statement: &ExecutableStatement) -> DaoResult<ResultSet>;

  fn execute_batch(
    &self,
    statements: &[ExecutableStatement],
    kind: BatchKind,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ResultSet>;
}

/// One result row, columns in the order the store returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
  columns: Vec<(String, CqlValue)>,
}

impl Row {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, column: impl Into<String>, value: CqlValue) {
    let column = column.into();
    match self.columns.iter_mut().find(|(c, _)| *c == column) {
      Some(slot) => slot.1 = value,
      None => self.columns.push((column, value)),
    }
  }

  pub fn get(&self, column: &str) -> Option<&CqlValue> {
    self.columns.iter().find(|(c, _)| c == column).map(|(_, v)| v)
  }

  pub fn is_null(&self, column: &str) -> bool {
    self.get(column).map_or(true, CqlValue::is_null)
  }

  pub fn get_i64(&self, column: &str) -> DaoResult<Option<i64>> {
    match self.get(column) {
      None | Some(CqlValue::Null) => Ok(None),
      Some(value) => value.as_i64().map(Some).ok_or_else(|| {
        DaoError::Deserialization(format!("Column '{}' is not an integer: '{}'", column, value))
      }),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &CqlValue)> {
    self.columns.iter().map(|(c, v)| (c.as_str(), v))
  }

  pub fn column_names(&self) -> impl Iterator<Item = &str> {
    self.columns.iter().map(|(c, _)| c.as_str())
  }

  pub fn len(&self) -> usize {
    self.columns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.columns.is_empty()
  }
}

impl FromIterator<(String, CqlValue)> for Row {
  fn from_iter<I: IntoIterator<Item = (String, CqlValue)>>(iter: I) -> Self {
    let mut row = Row::new();
    for (column, value) in iter {
      row.push(column, value);
    }
    row
  }
}

impl fmt::Display for Row {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("{")?;
    for (i, (c, v)) in self.columns.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{}={}", c, v)?;
    }
    f.write_str("}")
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
  rows: Vec<Row>,
}

impl ResultSet {
  pub fn new(rows: Vec<Row>) -> Self {
    Self { rows }
  }

  pub fn empty() -> Self {
    Self::default()
  }

  pub fn one(&self) -> Option<&Row> {
    self.rows.first()
  }

  pub fn all(&self) -> &[Row] {
    &self.rows
  }

  pub fn into_first(self) -> Option<Row> {
    self.rows.into_iter().next()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }
}
