//! Binding of entity values onto prepared statements.
//!
//! Every bind walks the prepared statement's own marker list and resolves each
//! marker by name, so the produced value order is the order the statement was
//! prepared with.

use super::prepared::{COUNTER_ENTITY_TYPE, COUNTER_PRIMARY_KEY, COUNTER_PROPERTY_NAME, COUNTER_VALUE};
use super::query::{BindMarker, MarkerTarget};
use super::{ExecutableStatement, PreparedStatement};
use crate::changeset::DirtyCheckChangeSet;
use crate::error::{DaoError, DaoResult};
use crate::meta::{EntityMeta, EntityValues, PrimaryKey, PropertyMeta};
use crate::serialization;
use crate::types::{ConsistencyLevel, CqlValue};

use std::sync::Arc;

fn bind_with<F>(ps: &PreparedStatement, consistency: ConsistencyLevel, mut resolve: F) -> DaoResult<ExecutableStatement>
where
  F: FnMut(&BindMarker) -> DaoResult<CqlValue>,
{
  let values = ps
    .query()
    .markers()
    .iter()
    .map(|marker| resolve(marker))
    .collect::<DaoResult<Vec<_>>>()?;
  Ok(ExecutableStatement::bound(ps, values, consistency))
}

fn unexpected(ps: &PreparedStatement, marker: &BindMarker) -> DaoError {
  DaoError::Binding(format!("Unexpected bind marker ':{}' in '{}'", marker.name(), ps.cql()))
}

fn key_component(ps: &PreparedStatement, meta: &EntityMeta, key: &PrimaryKey, column: &str) -> DaoResult<CqlValue> {
  meta
    .key_columns()
    .iter()
    .position(|c| c == column)
    .and_then(|idx| key.components().get(idx))
    .cloned()
    .ok_or_else(|| {
      DaoError::Binding(format!(
        "No primary key value for column '{}' of entity '{}' in '{}'",
        column,
        meta.entity_type(),
        ps.cql()
      ))
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PreparedStatementBinder;

impl PreparedStatementBinder {
  pub fn new() -> Self {
    PreparedStatementBinder
  }

  /// Binds a whole-entity insert. A missing TTL binds as 0 (no expiry).
  pub fn bind_for_insert(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    entity: &dyn EntityValues,
    ttl: Option<i32>,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    let key = meta.primary_key_of(entity)?;
    bind_with(ps, consistency, |marker| match marker.target() {
      MarkerTarget::Column(column) | MarkerTarget::Key(column) => {
        match meta.property_by_column(column) {
          Some(pm) if pm.kind().is_key() => key_component(ps, meta, &key, column),
          Some(pm) => meta.encoded_value_of(pm, entity),
          None => Err(unexpected(ps, marker)),
        }
      }
      MarkerTarget::Ttl => Ok(CqlValue::Int(ttl.unwrap_or(0))),
      _ => Err(unexpected(ps, marker)),
    })
  }

  /// Binds an update of `properties`. The statement must assign exactly their
  /// columns, in any order.
  pub fn bind_for_update(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    entity: &dyn EntityValues,
    properties: &[Arc<PropertyMeta>],
    ttl: Option<i32>,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    // Values are resolved by marker, so only the set of columns has to agree.
    let mut written = ps.query().written_columns();
    let mut expected: Vec<&str> = properties.iter().map(|pm| pm.column()).collect();
    written.sort_unstable();
    expected.sort_unstable();
    if written != expected {
      return Err(DaoError::Binding(format!(
        "Statement '{}' assigns {:?} but properties {:?} were given",
        ps.cql(),
        written,
        expected
      )));
    }
    let key = meta.primary_key_of(entity)?;
    bind_with(ps, consistency, |marker| match marker.target() {
      MarkerTarget::Column(column) => match properties.iter().find(|pm| pm.column() == column) {
        Some(pm) => meta.encoded_value_of(pm, entity),
        None => Err(unexpected(ps, marker)),
      },
      MarkerTarget::Key(column) => key_component(ps, meta, &key, column),
      MarkerTarget::Ttl => Ok(CqlValue::Int(ttl.unwrap_or(0))),
      _ => Err(unexpected(ps, marker)),
    })
  }

  pub fn bind_for_collection_and_map_update(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    entity: &dyn EntityValues,
    change_set: &DirtyCheckChangeSet,
    ttl: Option<i32>,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    let key = meta.primary_key_of(entity)?;
    let column = change_set.property().column();
    bind_with(ps, consistency, |marker| match marker.target() {
      MarkerTarget::Column(c) if c == column => Ok(change_set.change().bound_value()),
      MarkerTarget::Key(c) => key_component(ps, meta, &key, c),
      MarkerTarget::Ttl => Ok(CqlValue::Int(ttl.unwrap_or(0))),
      _ => Err(unexpected(ps, marker)),
    })
  }

  /// Binds a statement whose only markers are the primary key columns
  /// (selects and deletes).
  pub fn bind_statement_with_only_pk_in_where_clause(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    bind_with(ps, consistency, |marker| match marker.target() {
      MarkerTarget::Key(c) => key_component(ps, meta, primary_key, c),
      _ => Err(unexpected(ps, marker)),
    })
  }

  // --- Simple counters ---

  fn simple_counter_key(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    property: &PropertyMeta,
    marker: &BindMarker,
  ) -> DaoResult<CqlValue> {
    match marker.target() {
      MarkerTarget::Key(c) if c == COUNTER_ENTITY_TYPE => Ok(CqlValue::Text(meta.entity_type().as_str().to_string())),
      MarkerTarget::Key(c) if c == COUNTER_PRIMARY_KEY => serialization::encode_primary_key(primary_key.components()),
      MarkerTarget::Key(c) if c == COUNTER_PROPERTY_NAME => Ok(CqlValue::Text(property.column().to_string())),
      _ => Err(unexpected(ps, marker)),
    }
  }

  /// Binds an INCR or DECR statement of the shared counter table. `delta` is
  /// the magnitude; the statement decides the sign.
  pub fn bind_for_simple_counter_increment_decrement(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    property: &PropertyMeta,
    delta: i64,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    bind_with(ps, consistency, |marker| match marker.target() {
      MarkerTarget::Column(c) if c == COUNTER_VALUE => Ok(CqlValue::Counter(delta)),
      _ => self.simple_counter_key(ps, meta, primary_key, property, marker),
    })
  }

  pub fn bind_for_simple_counter_select(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    property: &PropertyMeta,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    bind_with(ps, consistency, |marker| {
      self.simple_counter_key(ps, meta, primary_key, property, marker)
    })
  }

  pub fn bind_for_simple_counter_delete(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    property: &PropertyMeta,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    self.bind_for_simple_counter_select(ps, meta, primary_key, property, consistency)
  }

  // --- Clustered counters ---

  /// Binds the same `delta` to every counter column the statement adjusts.
  pub fn bind_for_clustered_counter_increment_decrement(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    delta: i64,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    bind_with(ps, consistency, |marker| match marker.target() {
      MarkerTarget::Column(c) if meta.property_by_column(c).is_some_and(|pm| pm.is_counter()) => {
        Ok(CqlValue::Counter(delta))
      }
      MarkerTarget::Key(c) => key_component(ps, meta, primary_key, c),
      _ => Err(unexpected(ps, marker)),
    })
  }

  pub fn bind_for_clustered_counter_select(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    self.bind_statement_with_only_pk_in_where_clause(ps, meta, primary_key, consistency)
  }

  pub fn bind_for_clustered_counter_delete(
    &self,
    ps: &PreparedStatement,
    meta: &EntityMeta,
    primary_key: &PrimaryKey,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    self.bind_statement_with_only_pk_in_where_clause(ps, meta, primary_key, consistency)
  }

  /// Binds caller-supplied values positionally.
  pub fn bind_with_values(
    &self,
    ps: &PreparedStatement,
    values: Vec<CqlValue>,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    let expected = ps.query().markers().len();
    if values.len() != expected {
      return Err(DaoError::Binding(format!(
        "Statement '{}' expects {} values, got {}",
        ps.cql(),
        expected,
        values.len()
      )));
    }
    Ok(ExecutableStatement::bound(ps, values, consistency))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::PreparedId;
  use crate::statement::prepared;
  use crate::statement::{AssignOp, QueryBuilder};
  use std::collections::BTreeMap;

  fn meta() -> EntityMeta {
    EntityMeta::builder("User", "users")
      .partition_key("id")
      .simple("name")
      .simple("age")
      .build()
      .unwrap()
  }

  fn entity() -> BTreeMap<String, CqlValue> {
    let mut entity = BTreeMap::new();
    entity.insert("id".to_string(), CqlValue::BigInt(7));
    entity.insert("name".to_string(), CqlValue::from("Ann"));
    entity.insert("age".to_string(), CqlValue::Int(40));
    entity
  }

  fn prepared(query: crate::statement::Query) -> PreparedStatement {
    PreparedStatement::new(PreparedId(vec![1]), query)
  }

  #[test]
  fn update_binds_values_then_ttl_then_keys() {
    let meta = meta();
    let age = Arc::clone(meta.property("age").unwrap());
    let ps = prepared(
      QueryBuilder::update("users")
        .assign("age", AssignOp::Assign)
        .using_ttl()
        .where_key("id")
        .build(),
    );
    let bound = PreparedStatementBinder::new()
      .bind_for_update(&ps, &meta, &entity(), &[age], Some(60), ConsistencyLevel::Quorum)
      .unwrap();
    assert_eq!(bound.values(), &[CqlValue::Int(40), CqlValue::Int(60), CqlValue::BigInt(7)]);
    assert_eq!(bound.consistency(), ConsistencyLevel::Quorum);
  }

  #[test]
  fn update_rejects_mismatched_properties() {
    let meta = meta();
    let name = Arc::clone(meta.property("name").unwrap());
    let ps = prepared(QueryBuilder::update("users").assign("age", AssignOp::Assign).where_key("id").build());
    let err = PreparedStatementBinder::new()
      .bind_for_update(&ps, &meta, &entity(), &[name], None, ConsistencyLevel::One)
      .unwrap_err();
    assert!(matches!(err, DaoError::Binding(_)));
  }

  #[test]
  fn update_binds_in_marker_order_whatever_the_property_order() {
    let meta = meta();
    let name = Arc::clone(meta.property("name").unwrap());
    let age = Arc::clone(meta.property("age").unwrap());
    let ps = prepared(
      QueryBuilder::update("users")
        .assign("name", AssignOp::Assign)
        .assign("age", AssignOp::Assign)
        .using_ttl()
        .where_key("id")
        .build(),
    );
    let bound = PreparedStatementBinder::new()
      .bind_for_update(&ps, &meta, &entity(), &[age, name], None, ConsistencyLevel::One)
      .unwrap();
    assert_eq!(
      bound.values(),
      &[CqlValue::from("Ann"), CqlValue::Int(40), CqlValue::Int(0), CqlValue::BigInt(7)]
    );
  }

  #[test]
  fn explicit_values_must_match_marker_count() {
    let ps = prepared(QueryBuilder::delete("users").where_key("id").build());
    let binder = PreparedStatementBinder::new();
    assert!(binder
      .bind_with_values(&ps, vec![CqlValue::BigInt(1)], ConsistencyLevel::One)
      .is_ok());
    let err = binder
      .bind_with_values(&ps, vec![], ConsistencyLevel::One)
      .unwrap_err();
    assert!(matches!(err, DaoError::Binding(_)));
  }

  #[test]
  fn simple_counter_binds_entity_key_property_and_delta() {
    let meta = EntityMeta::builder("User", "users")
      .partition_key("id")
      .simple("name")
      .counter("visits")
      .build()
      .unwrap();
    let visits = Arc::clone(meta.property("visits").unwrap());
    let key = meta.primary_key_of(&entity()).unwrap();
    let ps = prepared(
      QueryBuilder::update(prepared::SIMPLE_COUNTER_TABLE)
        .assign(COUNTER_VALUE, AssignOp::Add)
        .where_keys([COUNTER_ENTITY_TYPE, COUNTER_PRIMARY_KEY, COUNTER_PROPERTY_NAME])
        .build(),
    );
    let bound = PreparedStatementBinder::new()
      .bind_for_simple_counter_increment_decrement(&ps, &meta, &key, &visits, 3, ConsistencyLevel::One)
      .unwrap();
    let values = bound.values();
    assert_eq!(values[0], CqlValue::Counter(3));
    assert_eq!(values[1], CqlValue::from("User"));
    assert_eq!(
      serialization::decode_primary_key(&values[2]).unwrap(),
      vec![CqlValue::BigInt(7)]
    );
    assert_eq!(values[3], CqlValue::from("visits"));
  }
}
