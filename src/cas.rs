//! Conditional write (compare-and-set) outcome handling.

use crate::error::{DaoError, DaoResult};
use crate::session::Row;
use crate::types::CqlValue;

use std::collections::BTreeMap;
use std::fmt;

/// Name of the boolean column a conditional write returns.
pub const APPLIED_COLUMN: &str = "[applied]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasOperation {
  Insert,
  Update,
}

impl fmt::Display for CasOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CasOperation::Insert => f.write_str("INSERT"),
      CasOperation::Update => f.write_str("UPDATE"),
    }
  }
}

/// Snapshot of the row that made a conditional write fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasResult {
  operation: CasOperation,
  current_values: BTreeMap<String, CqlValue>,
}

impl CasResult {
  pub fn new(operation: CasOperation, current_values: BTreeMap<String, CqlValue>) -> Self {
    Self {
      operation,
      current_values,
    }
  }

  pub fn operation(&self) -> CasOperation {
    self.operation
  }

  /// Every column returned by the store, the applied flag included.
  pub fn current_values(&self) -> &BTreeMap<String, CqlValue> {
    &self.current_values
  }
}

impl fmt::Display for CasResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "CAS operation {} cannot be applied. Current values are: {{", self.operation)?;
    for (i, (column, value)) in self.current_values.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{}={}", column, value)?;
    }
    f.write_str("}")
  }
}

/// Caller-supplied callbacks for conditional writes. Invoked synchronously on
/// the thread executing the write.
pub trait CasResultListener: Send + Sync {
  fn on_cas_success(&self);

  fn on_cas_error(&self, result: CasResult);
}

/// What a conditional write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
  Applied,
  Conflicted(CasResult),
}

impl CasOutcome {
  pub fn is_applied(&self) -> bool {
    matches!(self, CasOutcome::Applied)
  }
}

/// Reads the applied flag of a conditional write result.
///
/// A missing row or flag counts as applied: the store only omits it for
/// statements that were not conditional after all.
pub fn was_applied(row: Option<&Row>) -> bool {
  row
    .and_then(|r| r.get(APPLIED_COLUMN))
    .and_then(CqlValue::as_bool)
    .unwrap_or(true)
}

/// Resolves the result row of a conditional write.
///
/// On conflict, the listener (when present) receives the snapshot and the
/// call returns normally; without a listener the conflict becomes an error.
pub fn resolve(
  operation: CasOperation,
  row: Option<&Row>,
  listener: Option<&dyn CasResultListener>,
) -> DaoResult<CasOutcome> {
  if was_applied(row) {
    if let Some(listener) = listener {
      listener.on_cas_success();
    }
    return Ok(CasOutcome::Applied);
  }

  let current_values: BTreeMap<String, CqlValue> = row
    .map(|r| r.iter().map(|(column, value)| (column.to_string(), value.clone())).collect())
    .unwrap_or_default();
  let result = CasResult::new(operation, current_values);
  log::debug!("{}", result);

  match listener {
    Some(listener) => {
      listener.on_cas_error(result.clone());
      Ok(CasOutcome::Conflicted(result))
    }
    None => Err(DaoError::CasConflict(result)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;

  #[derive(Default)]
  struct Recorder {
    successes: Mutex<usize>,
    errors: Mutex<Vec<CasResult>>,
  }

  impl CasResultListener for Recorder {
    fn on_cas_success(&self) {
      *self.successes.lock() += 1;
    }

    fn on_cas_error(&self, result: CasResult) {
      self.errors.lock().push(result);
    }
  }

  fn conflict_row() -> Row {
    Row::from_iter([
      (APPLIED_COLUMN.to_string(), CqlValue::Boolean(false)),
      ("id".to_string(), CqlValue::BigInt(10)),
      ("name".to_string(), CqlValue::Text("name".into())),
      ("consistency_level".to_string(), CqlValue::Text("EACH_QUORUM".into())),
    ])
  }

  #[test]
  fn conflict_without_listener_is_an_error() {
    let err = resolve(CasOperation::Insert, Some(&conflict_row()), None).unwrap_err();
    let result = err.cas_result().expect("cas conflict");
    assert_eq!(result.operation(), CasOperation::Insert);
    assert_eq!(
      err.to_string(),
      "CAS operation INSERT cannot be applied. Current values are: {[applied]=false, consistency_level=EACH_QUORUM, id=10, name=name}"
    );
  }

  #[test]
  fn conflict_with_listener_is_reported_once() {
    let recorder = Recorder::default();
    let outcome = resolve(CasOperation::Update, Some(&conflict_row()), Some(&recorder)).unwrap();
    assert!(!outcome.is_applied());
    assert_eq!(recorder.errors.lock().len(), 1);
    assert_eq!(*recorder.successes.lock(), 0);
  }

  #[test]
  fn applied_row_notifies_success() {
    let recorder = Recorder::default();
    let row = Row::from_iter([(APPLIED_COLUMN.to_string(), CqlValue::Boolean(true))]);
    let outcome = resolve(CasOperation::Insert, Some(&row), Some(&recorder)).unwrap();
    assert_eq!(outcome, CasOutcome::Applied);
    assert_eq!(*recorder.successes.lock(), 1);
    assert!(recorder.errors.lock().is_empty());
  }
}
