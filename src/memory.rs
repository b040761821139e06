//! In-process [`Session`] over in-memory tables.
//!
//! Statements are interpreted from their structured [`Query`], not parsed from
//! CQL. Conditional writes answer with the result shapes of the real store: a
//! rejected `IF NOT EXISTS` returns the existing row, a rejected `IF` returns
//! the current values of the condition columns, both behind `[applied]=false`.
//! TTLs and write timestamps are accepted and ignored. A batch applies as a
//! whole or not at all.

use crate::cas::APPLIED_COLUMN;
use crate::error::{DaoError, DaoResult};
use crate::session::{BatchKind, PreparedId, ResultSet, Row, Session};
use crate::statement::{AssignOp, ExecutableStatement, MarkerTarget, Query, QueryKind, Selection};
use crate::types::{ConsistencyLevel, CqlValue};

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
  #[error("Statement was never prepared: {0}")]
  Unprepared(String),
  #[error("No value bound for '{0}'")]
  MissingValue(String),
  #[error("Cannot apply {op} to column '{column}' holding '{current}'")]
  InvalidOperation { op: String, column: String, current: String },
  #[error("List index {index} out of bounds for column '{column}' of length {len}")]
  IndexOutOfBounds { column: String, index: usize, len: usize },
  #[error("Counter column '{column}' overflows: {current} {op} {delta}")]
  CounterOverflow { column: String, op: String, current: i64, delta: i64 },
  #[error("Injected failure: {0}")]
  Injected(String),
}

type Columns = BTreeMap<String, CqlValue>;

#[derive(Debug, Default, Clone)]
struct Table {
  rows: HashMap<Vec<CqlValue>, Columns>,
}

/// A statement as the session saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
  pub cql: String,
  pub values: Vec<CqlValue>,
  pub consistency: ConsistencyLevel,
  pub prepared: bool,
  /// Set when the statement ran inside a batch.
  pub batch: Option<BatchKind>,
}

#[derive(Debug, Default)]
pub struct MemorySession {
  tables: Mutex<HashMap<String, Table>>,
  prepared: Mutex<HashSet<PreparedId>>,
  next_id: AtomicU64,
  prepare_count: AtomicUsize,
  executed: Mutex<Vec<ExecutedStatement>>,
  batches: AtomicUsize,
  injected_failure: Mutex<Option<String>>,
}

impl MemorySession {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of `prepare` calls served so far.
  pub fn prepare_count(&self) -> usize {
    self.prepare_count.load(Ordering::SeqCst)
  }

  pub fn batch_count(&self) -> usize {
    self.batches.load(Ordering::SeqCst)
  }

  pub fn executed(&self) -> Vec<ExecutedStatement> {
    self.executed.lock().clone()
  }

  pub fn last_executed(&self) -> Option<ExecutedStatement> {
    self.executed.lock().last().cloned()
  }

  pub fn clear_executed(&self) {
    self.executed.lock().clear();
  }

  /// Makes the next `execute` or `execute_batch` fail with a driver error.
  pub fn fail_next(&self, message: impl Into<String>) {
    *self.injected_failure.lock() = Some(message.into());
  }

  /// Direct read of a stored row, bypassing statements.
  pub fn row(&self, table: &str, key: &[CqlValue]) -> Option<Row> {
    self
      .tables
      .lock()
      .get(table)
      .and_then(|t| t.rows.get(key))
      .map(|columns| columns.iter().map(|(c, v)| (c.clone(), v.clone())).collect())
  }

  pub fn row_count(&self, table: &str) -> usize {
    self.tables.lock().get(table).map_or(0, |t| t.rows.len())
  }

  fn take_injected_failure(&self) -> DaoResult<()> {
    match self.injected_failure.lock().take() {
      Some(message) => Err(DaoError::driver(MemoryError::Injected(message))),
      None => Ok(()),
    }
  }

  fn check_prepared(&self, statement: &ExecutableStatement) -> DaoResult<()> {
    match statement.prepared_id() {
      Some(id) if !self.prepared.lock().contains(id) => {
        Err(DaoError::driver(MemoryError::Unprepared(statement.cql().to_string())))
      }
      _ => Ok(()),
    }
  }

  fn record(&self, statement: &ExecutableStatement, batch: Option<BatchKind>, consistency: ConsistencyLevel) {
    self.executed.lock().push(ExecutedStatement {
      cql: statement.cql().to_string(),
      values: statement.values().to_vec(),
      consistency,
      prepared: statement.is_prepared(),
      batch,
    });
  }
}

impl Session for MemorySession {
  fn prepare(&self, cql: &str) -> DaoResult<PreparedId> {
    let id = PreparedId(self.next_id.fetch_add(1, Ordering::SeqCst).to_be_bytes().to_vec());
    self.prepared.lock().insert(id.clone());
    self.prepare_count.fetch_add(1, Ordering::SeqCst);
    log::debug!("Prepared {:?}: {}", id, cql);
    Ok(id)
  }

  fn execute(&self, statement: &ExecutableStatement) -> DaoResult<ResultSet> {
    self.take_injected_failure()?;
    self.check_prepared(statement)?;
    self.record(statement, None, statement.consistency());
    let mut tables = self.tables.lock();
    apply(&mut tables, statement)
  }

  fn execute_batch(
    &self,
    statements: &[ExecutableStatement],
    kind: BatchKind,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ResultSet> {
    self.take_injected_failure()?;
    for statement in statements {
      self.check_prepared(statement)?;
    }
    self.batches.fetch_add(1, Ordering::SeqCst);
    let mut tables = self.tables.lock();
    let mut staged = tables.clone();
    for statement in statements {
      self.record(statement, Some(kind), consistency);
      apply(&mut staged, statement)?;
    }
    *tables = staged;
    Ok(ResultSet::empty())
  }
}

// --- Interpretation ---

struct Bound<'a> {
  values: HashMap<&'a MarkerTarget, &'a CqlValue>,
}

impl<'a> Bound<'a> {
  fn new(statement: &'a ExecutableStatement) -> Self {
    Self {
      values: statement
        .named_values()
        .map(|(marker, value)| (marker.target(), value))
        .collect(),
    }
  }

  fn get(&self, target: &MarkerTarget) -> DaoResult<&'a CqlValue> {
    self.values.get(target).copied().ok_or_else(|| {
      DaoError::driver(MemoryError::MissingValue(format!("{:?}", target)))
    })
  }
}

fn row_key(query: &Query, bound: &Bound<'_>) -> DaoResult<Vec<CqlValue>> {
  query
    .key_columns()
    .iter()
    .map(|column| {
      let target = if query.is_insert() {
        MarkerTarget::Column(column.clone())
      } else {
        MarkerTarget::Key(column.clone())
      };
      bound.get(&target).cloned()
    })
    .collect()
}

fn applied(flag: bool) -> Row {
  Row::from_iter([(APPLIED_COLUMN.to_string(), CqlValue::Boolean(flag))])
}

fn apply(tables: &mut HashMap<String, Table>, statement: &ExecutableStatement) -> DaoResult<ResultSet> {
  let query = statement.query();
  let bound = Bound::new(statement);
  let key = row_key(query, &bound)?;
  let table = tables.entry(query.table().to_string()).or_default();

  match query.kind() {
    QueryKind::Insert { columns, if_not_exists } => {
      if *if_not_exists {
        if let Some(existing) = table.rows.get(&key) {
          let mut row = applied(false);
          for (column, value) in existing {
            row.push(column.clone(), value.clone());
          }
          return Ok(ResultSet::new(vec![row]));
        }
      }
      let row = table.rows.entry(key).or_default();
      for column in columns {
        let value = bound.get(&MarkerTarget::Column(column.clone()))?;
        write_column(row, column, value.clone());
      }
      Ok(conditional_ok(query))
    }
    QueryKind::Update { assignments, conditions } => {
      if !conditions.is_empty() {
        let Some(existing) = table.rows.get(&key) else {
          return Ok(ResultSet::new(vec![applied(false)]));
        };
        let mut matched = true;
        let mut current = applied(false);
        for column in conditions {
          let expected = bound.get(&MarkerTarget::Condition(column.clone()))?;
          let actual = existing.get(column).cloned().unwrap_or(CqlValue::Null);
          matched &= &actual == expected;
          current.push(column.clone(), actual);
        }
        if !matched {
          return Ok(ResultSet::new(vec![current]));
        }
      }
      let key_columns = query.key_columns().to_vec();
      let row = table.rows.entry(key.clone()).or_insert_with(|| {
        key_columns.iter().cloned().zip(key.iter().cloned()).collect()
      });
      for assignment in assignments {
        let value = bound.get(&MarkerTarget::Column(assignment.column.clone()))?;
        assign(row, &assignment.column, assignment.op, value)?;
      }
      Ok(conditional_ok(query))
    }
    QueryKind::Select { selection } => {
      let Some(existing) = table.rows.get(&key) else {
        return Ok(ResultSet::empty());
      };
      let row: Row = match selection {
        Selection::All => existing.iter().map(|(c, v)| (c.clone(), v.clone())).collect(),
        Selection::Columns(columns) => columns
          .iter()
          .map(|c| (c.clone(), existing.get(c).cloned().unwrap_or(CqlValue::Null)))
          .collect(),
      };
      Ok(ResultSet::new(vec![row]))
    }
    QueryKind::Delete => {
      table.rows.remove(&key);
      Ok(ResultSet::empty())
    }
  }
}

fn conditional_ok(query: &Query) -> ResultSet {
  if query.is_conditional() {
    ResultSet::new(vec![applied(true)])
  } else {
    ResultSet::empty()
  }
}

fn write_column(row: &mut Columns, column: &str, value: CqlValue) {
  if value.is_null() {
    row.remove(column);
  } else {
    row.insert(column.to_string(), value);
  }
}

fn invalid(op: AssignOp, column: &str, current: &CqlValue) -> DaoError {
  DaoError::driver(MemoryError::InvalidOperation {
    op: format!("{:?}", op),
    column: column.to_string(),
    current: current.to_string(),
  })
}

fn assign(row: &mut Columns, column: &str, op: AssignOp, value: &CqlValue) -> DaoResult<()> {
  let current = row.get(column).cloned().unwrap_or(CqlValue::Null);
  let updated = match (op, current, value) {
    (AssignOp::Assign, _, value) => value.clone(),

    (AssignOp::Add | AssignOp::Subtract, current, CqlValue::Counter(delta)) => {
      let existing = match current.as_i64() {
        Some(existing) => existing,
        None if current.is_null() => 0,
        None => return Err(invalid(op, column, &current)),
      };
      let (symbol, updated) = if op == AssignOp::Add {
        ("+", existing.checked_add(*delta))
      } else {
        ("-", existing.checked_sub(*delta))
      };
      match updated {
        Some(value) => CqlValue::Counter(value),
        None => {
          return Err(DaoError::driver(MemoryError::CounterOverflow {
            column: column.to_string(),
            op: symbol.to_string(),
            current: existing,
            delta: *delta,
          }))
        }
      }
    }

    (AssignOp::Add, CqlValue::Null, CqlValue::List(items)) => CqlValue::List(items.clone()),
    (AssignOp::Add, CqlValue::List(mut existing), CqlValue::List(items)) => {
      existing.extend(items.iter().cloned());
      CqlValue::List(existing)
    }
    (AssignOp::Prepend, CqlValue::Null, CqlValue::List(items)) => CqlValue::List(items.clone()),
    (AssignOp::Prepend, CqlValue::List(existing), CqlValue::List(items)) => {
      CqlValue::List(items.iter().cloned().chain(existing).collect())
    }
    (AssignOp::Subtract, CqlValue::List(existing), CqlValue::List(items)) => {
      CqlValue::List(existing.into_iter().filter(|e| !items.contains(e)).collect())
    }

    (AssignOp::Add, current @ (CqlValue::Null | CqlValue::Set(_)), CqlValue::Set(items)) => {
      let mut existing = match current {
        CqlValue::Set(existing) => existing,
        _ => Vec::new(),
      };
      for item in items {
        if !existing.contains(item) {
          existing.push(item.clone());
        }
      }
      CqlValue::Set(existing)
    }
    (AssignOp::Subtract, CqlValue::Set(existing), CqlValue::Set(items)) => {
      CqlValue::Set(existing.into_iter().filter(|e| !items.contains(e)).collect())
    }

    (AssignOp::Add, current @ (CqlValue::Null | CqlValue::Map(_)), CqlValue::Map(entries)) => {
      let mut existing = match current {
        CqlValue::Map(existing) => existing,
        _ => Vec::new(),
      };
      for (k, v) in entries {
        match existing.iter_mut().find(|(ek, _)| ek == k) {
          Some(slot) => slot.1 = v.clone(),
          None => existing.push((k.clone(), v.clone())),
        }
      }
      CqlValue::Map(existing)
    }
    (AssignOp::Subtract, CqlValue::Map(existing), CqlValue::Set(keys)) => {
      CqlValue::Map(existing.into_iter().filter(|(k, _)| !keys.contains(k)).collect())
    }

    (AssignOp::Subtract, CqlValue::Null, _) => CqlValue::Null,

    (AssignOp::AssignAtIndex(index), CqlValue::List(mut existing), value) => {
      if index >= existing.len() {
        return Err(DaoError::driver(MemoryError::IndexOutOfBounds {
          column: column.to_string(),
          index,
          len: existing.len(),
        }));
      }
      if value.is_null() {
        existing.remove(index);
      } else {
        existing[index] = value.clone();
      }
      CqlValue::List(existing)
    }

    (op, current, _) => return Err(invalid(op, column, &current)),
  };
  write_column(row, column, updated);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::statement::{PreparedStatement, QueryBuilder};

  fn run(session: &MemorySession, query: Query, values: Vec<CqlValue>) -> ResultSet {
    let id = session.prepare(&query.cql()).unwrap();
    let ps = PreparedStatement::new(id, query);
    let statement = ExecutableStatement::bound(&ps, values, ConsistencyLevel::One);
    session.execute(&statement).unwrap()
  }

  #[test]
  fn list_operations_follow_store_semantics() {
    let session = MemorySession::new();
    let append = QueryBuilder::update("users")
      .assign("friends", AssignOp::Add)
      .where_key("id")
      .build();
    run(&session, append, vec![CqlValue::list(["a", "b"]), CqlValue::BigInt(1)]);

    let prepend = QueryBuilder::update("users")
      .assign("friends", AssignOp::Prepend)
      .where_key("id")
      .build();
    run(&session, prepend, vec![CqlValue::list(["z"]), CqlValue::BigInt(1)]);

    let remove_at = QueryBuilder::update("users")
      .assign("friends", AssignOp::AssignAtIndex(1))
      .where_key("id")
      .build();
    run(&session, remove_at, vec![CqlValue::Null, CqlValue::BigInt(1)]);

    let row = session.row("users", &[CqlValue::BigInt(1)]).unwrap();
    assert_eq!(row.get("friends"), Some(&CqlValue::list(["z", "b"])));
  }

  #[test]
  fn rejected_update_reports_condition_columns() {
    let session = MemorySession::new();
    let insert = QueryBuilder::insert("users", vec!["id".into()])
      .value("id")
      .value("name")
      .build();
    run(&session, insert, vec![CqlValue::BigInt(1), CqlValue::from("John")]);

    let update = QueryBuilder::update("users")
      .assign("name", AssignOp::Assign)
      .where_key("id")
      .condition("name")
      .build();
    let result = run(
      &session,
      update,
      vec![CqlValue::from("Paul"), CqlValue::BigInt(1), CqlValue::from("Ringo")],
    );
    let row = result.one().unwrap();
    assert_eq!(row.get(APPLIED_COLUMN), Some(&CqlValue::Boolean(false)));
    assert_eq!(row.get("name"), Some(&CqlValue::from("John")));
    assert_eq!(row.len(), 2);
  }

  #[test]
  fn unprepared_statement_is_a_driver_error() {
    let session = MemorySession::new();
    let query = QueryBuilder::delete("users").where_key("id").build();
    let ps = PreparedStatement::new(PreparedId(vec![9, 9]), query);
    let statement = ExecutableStatement::bound(&ps, vec![CqlValue::BigInt(1)], ConsistencyLevel::One);
    let err = session.execute(&statement).unwrap_err();
    assert!(matches!(err, DaoError::Driver(_)));
  }

  #[test]
  fn counter_overflow_is_a_driver_error() {
    let session = MemorySession::new();
    let incr = QueryBuilder::update("hits")
      .assign("total", AssignOp::Add)
      .where_key("page")
      .build();
    run(&session, incr.clone(), vec![CqlValue::Counter(i64::MAX), CqlValue::from("/")]);

    let id = session.prepare(&incr.cql()).unwrap();
    let ps = PreparedStatement::new(id, incr);
    let statement = ExecutableStatement::bound(&ps, vec![CqlValue::Counter(1), CqlValue::from("/")], ConsistencyLevel::One);
    let err = session.execute(&statement).unwrap_err();
    assert!(matches!(err, DaoError::Driver(_)));
    assert!(err.to_string().contains("overflows"));

    let row = session.row("hits", &[CqlValue::from("/")]).unwrap();
    assert_eq!(row.get("total"), Some(&CqlValue::Counter(i64::MAX)));
  }

  #[test]
  fn failed_batch_leaves_no_partial_write() {
    let session = MemorySession::new();
    let insert = QueryBuilder::insert("users", vec!["id".into()])
      .value("id")
      .value("name")
      .build();
    let bump = QueryBuilder::update("users")
      .assign("name", AssignOp::Add)
      .where_key("id")
      .build();
    let insert = PreparedStatement::new(session.prepare(&insert.cql()).unwrap(), insert);
    let bump = PreparedStatement::new(session.prepare(&bump.cql()).unwrap(), bump);
    let statements = vec![
      ExecutableStatement::bound(&insert, vec![CqlValue::BigInt(1), CqlValue::from("John")], ConsistencyLevel::One),
      ExecutableStatement::bound(&bump, vec![CqlValue::Counter(1), CqlValue::BigInt(1)], ConsistencyLevel::One),
    ];

    let err = session
      .execute_batch(&statements, BatchKind::Logged, ConsistencyLevel::One)
      .unwrap_err();
    assert!(matches!(err, DaoError::Driver(_)));
    assert_eq!(session.row_count("users"), 0);
  }
}
