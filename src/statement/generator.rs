//! Per-call statement generation, used for conditional writes, explicit
//! timestamps and index-addressed list changes.

use super::query::{AssignOp, Query, QueryBuilder};
use super::ExecutableStatement;
use crate::cas::CasResultListener;
use crate::changeset::DirtyCheckChangeSet;
use crate::error::{DaoError, DaoResult};
use crate::meta::{EntityMeta, EntityValues, PropertyMeta};
use crate::options::CasCondition;
use crate::types::{ConsistencyLevel, CqlValue};

use std::sync::Arc;

/// A generated statement together with the values bound to it so far.
#[derive(Debug, Clone)]
pub struct GeneratedStatement {
  builder: QueryBuilder,
  values: Vec<CqlValue>,
}

impl GeneratedStatement {
  fn new(builder: QueryBuilder, values: Vec<CqlValue>) -> Self {
    Self { builder, values }
  }

  /// Appends `USING TTL`; its value goes to the end of the bound values.
  pub fn using_ttl(mut self, ttl: i32) -> Self {
    self.builder = self.builder.using_ttl();
    self.values.push(CqlValue::Int(ttl));
    self
  }

  /// Appends `USING TIMESTAMP`; call after [`GeneratedStatement::using_ttl`]
  /// so the timestamp is the last bound value.
  pub fn using_timestamp(mut self, timestamp: i64) -> Self {
    self.builder = self.builder.using_timestamp();
    self.values.push(CqlValue::BigInt(timestamp));
    self
  }

  pub fn values(&self) -> &[CqlValue] {
    &self.values
  }

  pub fn into_parts(self) -> (Query, Vec<CqlValue>) {
    (self.builder.build(), self.values)
  }

  pub fn into_statement(
    self,
    consistency: ConsistencyLevel,
    cas_listener: Option<Arc<dyn CasResultListener>>,
  ) -> ExecutableStatement {
    let (query, values) = self.into_parts();
    ExecutableStatement::regular(query, values, consistency, cas_listener)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatementGenerator;

impl StatementGenerator {
  pub fn new() -> Self {
    StatementGenerator
  }

  /// Insert of every non-counter column.
  pub fn generate_insert(
    &self,
    entity: &dyn EntityValues,
    meta: &EntityMeta,
    if_not_exists: bool,
  ) -> DaoResult<GeneratedStatement> {
    let key = meta.primary_key_of(entity)?;
    let mut builder = QueryBuilder::insert(meta.table(), meta.key_columns());
    let mut values = Vec::new();

    for (pm, component) in meta.key_properties().zip(key.components()) {
      builder = builder.value(pm.column());
      values.push(component.clone());
    }
    for pm in meta.value_properties() {
      builder = builder.value(pm.column());
      values.push(meta.encoded_value_of(pm, entity)?);
    }
    if if_not_exists {
      builder = builder.if_not_exists();
    }
    Ok(GeneratedStatement::new(builder, values))
  }

  /// Update of the changed properties only, guarded by the CAS conditions.
  pub fn generate_update_fields(
    &self,
    entity: &dyn EntityValues,
    meta: &EntityMeta,
    changed_properties: &[Arc<PropertyMeta>],
    cas_conditions: &[CasCondition],
  ) -> DaoResult<GeneratedStatement> {
    if changed_properties.is_empty() {
      return Err(DaoError::Binding(format!(
        "No property to update for entity '{}'",
        meta.entity_type()
      )));
    }
    let mut builder = QueryBuilder::update(meta.table());
    let mut values = Vec::with_capacity(changed_properties.len());
    for pm in changed_properties {
      builder = builder.assign(pm.column(), AssignOp::Assign);
      values.push(meta.encoded_value_of(pm, entity)?);
    }
    let (builder, values) = self.where_and_conditions(builder, values, entity, meta, cas_conditions)?;
    Ok(GeneratedStatement::new(builder, values))
  }

  pub fn generate_collection_and_map_update_operation(
    &self,
    change_set: &DirtyCheckChangeSet,
    entity: &dyn EntityValues,
    meta: &EntityMeta,
    cas_conditions: &[CasCondition],
  ) -> DaoResult<GeneratedStatement> {
    let change = change_set.change();
    let builder = QueryBuilder::update(meta.table()).assign(change_set.property().column(), change.assign_op());
    let values = vec![change.bound_value()];
    let (builder, values) = self.where_and_conditions(builder, values, entity, meta, cas_conditions)?;
    Ok(GeneratedStatement::new(builder, values))
  }

  fn where_and_conditions(
    &self,
    mut builder: QueryBuilder,
    mut values: Vec<CqlValue>,
    entity: &dyn EntityValues,
    meta: &EntityMeta,
    cas_conditions: &[CasCondition],
  ) -> DaoResult<(QueryBuilder, Vec<CqlValue>)> {
    let key = meta.primary_key_of(entity)?;
    builder = builder.where_keys(meta.key_columns());
    values.extend(key.components().iter().cloned());
    for condition in cas_conditions {
      builder = builder.condition(condition.column());
      values.push(condition.value().clone());
    }
    Ok((builder, values))
  }
}
