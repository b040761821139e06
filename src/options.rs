//! Per-call write/read options and CAS conditions.

use crate::cas::CasResultListener;
use crate::error::{DaoError, DaoResult};
use crate::types::{ConsistencyLevel, CqlValue};

use once_cell::sync::OnceCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A `column = value` precondition attached to an update as an `IF` clause.
///
/// The value may be replaced once by its encoded column representation. After
/// that, [`CasCondition::value`] returns the encoded form.
pub struct CasCondition {
  column: String,
  raw_value: CqlValue,
  encoded: OnceCell<CqlValue>,
}

impl CasCondition {
  pub fn new(column: impl Into<String>, value: impl Into<CqlValue>) -> Self {
    Self {
      column: column.into(),
      raw_value: value.into(),
      encoded: OnceCell::new(),
    }
  }

  pub fn column(&self) -> &str {
    &self.column
  }

  pub fn raw_value(&self) -> &CqlValue {
    &self.raw_value
  }

  /// Effective value: the encoded form once set, the raw value before.
  pub fn value(&self) -> &CqlValue {
    self.encoded.get().unwrap_or(&self.raw_value)
  }

  pub fn is_encoded(&self) -> bool {
    self.encoded.get().is_some()
  }

  /// Replaces the value with its encoded form. Fails if already encoded.
  pub fn encode_value(&self, encoded: CqlValue) -> DaoResult<()> {
    self.encoded.set(encoded).map_err(|_| {
      DaoError::Other(format!(
        "CAS condition on column '{}' has already been encoded",
        self.column
      ))
    })
  }

  /// Encodes the raw value with `encoder` unless it already was; concurrent
  /// callers observe a single encoded value.
  pub fn encode_with<F>(&self, encoder: F) -> DaoResult<&CqlValue>
  where
    F: FnOnce(&CqlValue) -> DaoResult<CqlValue>,
  {
    self.encoded.get_or_try_init(|| encoder(&self.raw_value))
  }
}

impl Clone for CasCondition {
  fn clone(&self) -> Self {
    let encoded = OnceCell::new();
    if let Some(value) = self.encoded.get() {
      let _ = encoded.set(value.clone());
    }
    Self {
      column: self.column.clone(),
      raw_value: self.raw_value.clone(),
      encoded,
    }
  }
}

impl PartialEq for CasCondition {
  fn eq(&self, other: &Self) -> bool {
    self.column == other.column && self.value() == other.value()
  }
}

impl Eq for CasCondition {}

impl Hash for CasCondition {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.column.hash(state);
    self.value().hash(state);
  }
}

impl fmt::Debug for CasCondition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CasCondition")
      .field("column", &self.column)
      .field("value", self.value())
      .field("encoded", &self.is_encoded())
      .finish()
  }
}

/// Immutable per-call configuration. Build with [`OptionsBuilder`].
#[derive(Clone, Default)]
pub struct Options {
  consistency: Option<ConsistencyLevel>,
  ttl: Option<i32>,
  timestamp: Option<i64>,
  if_not_exists: bool,
  cas_conditions: Vec<CasCondition>,
  cas_result_listener: Option<Arc<dyn CasResultListener>>,
}

impl Options {
  pub fn builder() -> OptionsBuilder {
    OptionsBuilder::default()
  }

  /// Options with nothing set.
  pub fn none() -> Self {
    Self::default()
  }

  pub fn consistency_level(&self) -> Option<ConsistencyLevel> {
    self.consistency
  }

  pub fn ttl(&self) -> Option<i32> {
    self.ttl
  }

  pub fn timestamp(&self) -> Option<i64> {
    self.timestamp
  }

  pub fn is_if_not_exists(&self) -> bool {
    self.if_not_exists
  }

  pub fn cas_conditions(&self) -> &[CasCondition] {
    &self.cas_conditions
  }

  pub fn has_cas_conditions(&self) -> bool {
    !self.cas_conditions.is_empty()
  }

  pub fn cas_result_listener(&self) -> Option<&Arc<dyn CasResultListener>> {
    self.cas_result_listener.as_ref()
  }

  pub fn duplicate_without_ttl_and_timestamp(&self) -> Options {
    Options {
      ttl: None,
      timestamp: None,
      ..self.clone()
    }
  }

  pub fn duplicate_with_new_consistency_level(&self, consistency: ConsistencyLevel) -> Options {
    Options {
      consistency: Some(consistency),
      ..self.clone()
    }
  }

  pub fn duplicate_with_new_timestamp(&self, timestamp: i64) -> Options {
    Options {
      timestamp: Some(timestamp),
      ..self.clone()
    }
  }
}

impl fmt::Debug for Options {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Options")
      .field("consistency", &self.consistency)
      .field("ttl", &self.ttl)
      .field("timestamp", &self.timestamp)
      .field("if_not_exists", &self.if_not_exists)
      .field("cas_conditions", &self.cas_conditions)
      .field("cas_result_listener_is_some", &self.cas_result_listener.is_some())
      .finish()
  }
}

#[derive(Default)]
pub struct OptionsBuilder {
  options: Options,
}

impl OptionsBuilder {
  pub fn consistency(mut self, level: ConsistencyLevel) -> Self {
    self.options.consistency = Some(level);
    self
  }

  pub fn ttl(mut self, seconds: i32) -> Self {
    self.options.ttl = Some(seconds);
    self
  }

  /// Explicit write time, in microseconds since the epoch.
  pub fn timestamp(mut self, micros: i64) -> Self {
    self.options.timestamp = Some(micros);
    self
  }

  pub fn if_not_exists(mut self) -> Self {
    self.options.if_not_exists = true;
    self
  }

  pub fn if_condition(mut self, condition: CasCondition) -> Self {
    self.options.cas_conditions.push(condition);
    self
  }

  pub fn if_conditions<I>(mut self, conditions: I) -> Self
  where
    I: IntoIterator<Item = CasCondition>,
  {
    self.options.cas_conditions.extend(conditions);
    self
  }

  pub fn cas_result_listener(mut self, listener: Arc<dyn CasResultListener>) -> Self {
    self.options.cas_result_listener = Some(listener);
    self
  }

  pub fn build(self) -> DaoResult<Options> {
    if self.options.if_not_exists && self.options.has_cas_conditions() {
      return Err(DaoError::InvalidConfiguration(
        "IF NOT EXISTS cannot be combined with IF conditions".to_string(),
      ));
    }
    if let Some(ttl) = self.options.ttl {
      if ttl < 0 {
        return Err(DaoError::InvalidConfiguration(format!("TTL must not be negative, got {}", ttl)));
      }
    }
    Ok(self.options)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn conditions_are_structural() {
    let mut set = HashSet::new();
    set.insert(CasCondition::new("name", "John"));
    assert!(set.contains(&CasCondition::new("name", "John")));
    assert!(!set.contains(&CasCondition::new("name", "Helen")));
  }

  #[test]
  fn condition_value_encodes_once() {
    let condition = CasCondition::new("level", "EACH_QUORUM");
    condition.encode_value(CqlValue::Int(7)).unwrap();
    assert_eq!(condition.value(), &CqlValue::Int(7));
    assert!(condition.encode_value(CqlValue::Int(8)).is_err());
    let again = condition.encode_with(|_| Ok(CqlValue::Int(9))).unwrap();
    assert_eq!(again, &CqlValue::Int(7));
  }

  #[test]
  fn duplicates_leave_the_source_untouched() {
    let options = Options::builder().ttl(100).timestamp(42).consistency(ConsistencyLevel::One).build().unwrap();
    let stripped = options.duplicate_without_ttl_and_timestamp();
    assert_eq!(stripped.ttl(), None);
    assert_eq!(stripped.timestamp(), None);
    assert_eq!(stripped.consistency_level(), Some(ConsistencyLevel::One));
    assert_eq!(options.ttl(), Some(100));

    let quorum = options.duplicate_with_new_consistency_level(ConsistencyLevel::Quorum);
    assert_eq!(quorum.consistency_level(), Some(ConsistencyLevel::Quorum));
    assert_eq!(quorum.ttl(), Some(100));
    assert_eq!(options.duplicate_with_new_timestamp(7).timestamp(), Some(7));
  }

  #[test]
  fn insert_and_update_cas_styles_are_exclusive() {
    let result = Options::builder()
      .if_not_exists()
      .if_condition(CasCondition::new("name", "John"))
      .build();
    assert!(matches!(result, Err(DaoError::InvalidConfiguration(_))));
  }
}
