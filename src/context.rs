//! Per-call operation context: the entity being worked on, its options, and
//! the statements queued for deferred execution.

use crate::error::{DaoError, DaoResult};
use crate::meta::{EntityMeta, EntityType, EntityValues, PrimaryKey};
use crate::options::Options;
use crate::statement::ExecutableStatement;

use std::fmt;
use std::mem;
use std::sync::Arc;

pub struct OperationContext<'a> {
  meta: Arc<EntityMeta>,
  entity: Option<&'a dyn EntityValues>,
  primary_key: PrimaryKey,
  options: Options,
  statements: Vec<ExecutableStatement>,
  counter_statements: Vec<ExecutableStatement>,
}

impl<'a> OperationContext<'a> {
  /// Context for an entity instance. Fails if a primary key component is missing.
  pub fn new(meta: Arc<EntityMeta>, entity: &'a dyn EntityValues, options: Options) -> DaoResult<Self> {
    let primary_key = meta.primary_key_of(entity)?;
    Ok(Self {
      meta,
      entity: Some(entity),
      primary_key,
      options,
      statements: Vec::new(),
      counter_statements: Vec::new(),
    })
  }

  /// Context addressing a row by key only, for reads, removals and counters.
  pub fn for_key(meta: Arc<EntityMeta>, primary_key: PrimaryKey, options: Options) -> DaoResult<Self> {
    let expected = meta.key_properties().count();
    if primary_key.len() != expected {
      return Err(DaoError::Binding(format!(
        "Entity '{}' has {} primary key components, got {}",
        meta.entity_type(),
        expected,
        primary_key.len()
      )));
    }
    Ok(Self {
      meta,
      entity: None,
      primary_key,
      options,
      statements: Vec::new(),
      counter_statements: Vec::new(),
    })
  }

  pub fn meta(&self) -> &Arc<EntityMeta> {
    &self.meta
  }

  pub fn entity_type(&self) -> &EntityType {
    self.meta.entity_type()
  }

  pub fn entity(&self) -> DaoResult<&'a dyn EntityValues> {
    self.entity.ok_or_else(|| {
      DaoError::Binding(format!(
        "Context for '{}' {} carries no entity instance",
        self.meta.entity_type(),
        self.primary_key
      ))
    })
  }

  pub fn primary_key(&self) -> &PrimaryKey {
    &self.primary_key
  }

  pub fn options(&self) -> &Options {
    &self.options
  }

  pub fn set_options(&mut self, options: Options) {
    self.options = options;
  }

  pub(crate) fn push_statement(&mut self, statement: ExecutableStatement) {
    self.statements.push(statement);
  }

  pub(crate) fn push_counter_statement(&mut self, statement: ExecutableStatement) {
    self.counter_statements.push(statement);
  }

  pub fn pending_statements(&self) -> &[ExecutableStatement] {
    &self.statements
  }

  pub fn pending_counter_statements(&self) -> &[ExecutableStatement] {
    &self.counter_statements
  }

  pub fn has_pending(&self) -> bool {
    !self.statements.is_empty() || !self.counter_statements.is_empty()
  }

  /// Removes and returns the queued statements: regular ones, then counters.
  pub(crate) fn take_pending(&mut self) -> (Vec<ExecutableStatement>, Vec<ExecutableStatement>) {
    (mem::take(&mut self.statements), mem::take(&mut self.counter_statements))
  }

  /// Drops queued statements without executing them.
  pub fn discard_pending(&mut self) {
    self.statements.clear();
    self.counter_statements.clear();
  }
}

impl fmt::Debug for OperationContext<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OperationContext")
      .field("entity_type", self.meta.entity_type())
      .field("primary_key", &self.primary_key)
      .field("options", &self.options)
      .field("pending_statements", &self.statements.len())
      .field("pending_counter_statements", &self.counter_statements.len())
      .finish()
  }
}

impl Drop for OperationContext<'_> {
  fn drop(&mut self) {
    if self.has_pending() {
      log::warn!(
        "Context for '{}' {} dropped with {} statement(s) and {} counter statement(s) never flushed",
        self.meta.entity_type(),
        self.primary_key,
        self.statements.len(),
        self.counter_statements.len()
      );
    }
  }
}
