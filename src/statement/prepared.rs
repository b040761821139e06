//! Prepare-time statement factories and the fixed lookup tables built once at
//! initialization.

use super::query::{AssignOp, Query, QueryBuilder, Selection};
use super::PreparedStatement;
use crate::changeset::DirtyCheckChangeSet;
use crate::error::{DaoError, DaoResult};
use crate::meta::{EntityMeta, EntityType, PropertyMeta};
use crate::session::Session;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// --- Shared simple counter table ---

pub const SIMPLE_COUNTER_TABLE: &str = "simple_counters";
pub const COUNTER_ENTITY_TYPE: &str = "entity_type";
pub const COUNTER_PRIMARY_KEY: &str = "primary_key";
pub const COUNTER_PROPERTY_NAME: &str = "property_name";
pub const COUNTER_VALUE: &str = "counter_value";

fn simple_counter_key_columns() -> [&'static str; 3] {
  [COUNTER_ENTITY_TYPE, COUNTER_PRIMARY_KEY, COUNTER_PROPERTY_NAME]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterQueryKind {
  Incr,
  Decr,
  Select,
  Delete,
}

impl fmt::Display for CounterQueryKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      CounterQueryKind::Incr => "INCR",
      CounterQueryKind::Decr => "DECR",
      CounterQueryKind::Select => "SELECT",
      CounterQueryKind::Delete => "DELETE",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterTarget {
  /// A single counter column.
  Column(String),
  /// Every counter column of the row.
  All,
}

/// Key of the counter statement table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterStatementKey {
  /// Statement against the shared simple counter table.
  Simple(CounterQueryKind),
  /// Statement against a clustered counter entity's own table.
  Clustered {
    entity: EntityType,
    kind: CounterQueryKind,
    target: CounterTarget,
  },
}

impl fmt::Display for CounterStatementKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CounterStatementKey::Simple(kind) => write!(f, "simple counter {}", kind),
      CounterStatementKey::Clustered { entity, kind, target } => match target {
        CounterTarget::Column(column) => write!(f, "clustered counter {} of '{}.{}'", kind, entity, column),
        CounterTarget::All => write!(f, "clustered counter {} of '{}' (all columns)", kind, entity),
      },
    }
  }
}

// --- Factories ---

/// Prepares `query` on the session and pairs the handle with its structure.
pub fn prepare_query(session: &dyn Session, query: Query) -> DaoResult<PreparedStatement> {
  let cql = query.cql();
  log::debug!("Preparing '{}'", cql);
  let id = session.prepare(&cql)?;
  Ok(PreparedStatement::new(id, query))
}

/// Whole-entity insert: key columns, then value columns, then TTL.
pub fn prepare_insert(session: &dyn Session, meta: &EntityMeta) -> DaoResult<PreparedStatement> {
  let builder = meta
    .key_properties()
    .chain(meta.value_properties())
    .fold(QueryBuilder::insert(meta.table(), meta.key_columns()), |b, pm| {
      b.value(pm.column())
    });
  prepare_query(session, builder.using_ttl().build())
}

/// Whole-entity select by primary key.
pub fn prepare_select(session: &dyn Session, meta: &EntityMeta) -> DaoResult<PreparedStatement> {
  let columns = meta
    .key_properties()
    .chain(meta.value_properties())
    .map(|pm| pm.column().to_string())
    .collect();
  let query = QueryBuilder::select(meta.table(), Selection::Columns(columns))
    .where_keys(meta.key_columns())
    .build();
  prepare_query(session, query)
}

pub fn prepare_remove(session: &dyn Session, meta: &EntityMeta, table: &str) -> DaoResult<PreparedStatement> {
  let query = QueryBuilder::delete(table).where_keys(meta.key_columns()).build();
  prepare_query(session, query)
}

/// Single column select used to lazily load one property.
pub fn prepare_select_field(
  session: &dyn Session,
  meta: &EntityMeta,
  property: &PropertyMeta,
) -> DaoResult<PreparedStatement> {
  let query = QueryBuilder::select(meta.table(), Selection::Columns(vec![property.column().to_string()]))
    .where_keys(meta.key_columns())
    .build();
  prepare_query(session, query)
}

/// Update of a subset of columns. Binds the assigned values, then TTL, then keys.
pub fn prepare_update_fields(
  session: &dyn Session,
  meta: &EntityMeta,
  properties: &[Arc<PropertyMeta>],
) -> DaoResult<PreparedStatement> {
  if properties.is_empty() {
    return Err(DaoError::Binding(format!(
      "No property to update for entity '{}'",
      meta.entity_type()
    )));
  }
  let builder = properties
    .iter()
    .fold(QueryBuilder::update(meta.table()), |b, pm| b.assign(pm.column(), AssignOp::Assign));
  let query = builder.using_ttl().where_keys(meta.key_columns()).build();
  prepare_query(session, query)
}

pub fn prepare_collection_and_map_update(
  session: &dyn Session,
  meta: &EntityMeta,
  change_set: &DirtyCheckChangeSet,
) -> DaoResult<PreparedStatement> {
  if change_set.change_type().is_index_addressed() {
    return Err(DaoError::CacheConfiguration(format!(
      "Change {:?} on '{}.{}' is index addressed and cannot be prepared",
      change_set.change_type(),
      meta.entity_type(),
      change_set.property().name()
    )));
  }
  let query = QueryBuilder::update(meta.table())
    .assign(change_set.property().column(), change_set.change().assign_op())
    .using_ttl()
    .where_keys(meta.key_columns())
    .build();
  prepare_query(session, query)
}

fn simple_counter_query(kind: CounterQueryKind) -> Query {
  let builder = match kind {
    CounterQueryKind::Incr => QueryBuilder::update(SIMPLE_COUNTER_TABLE).assign(COUNTER_VALUE, AssignOp::Add),
    CounterQueryKind::Decr => QueryBuilder::update(SIMPLE_COUNTER_TABLE).assign(COUNTER_VALUE, AssignOp::Subtract),
    CounterQueryKind::Select => {
      QueryBuilder::select(SIMPLE_COUNTER_TABLE, Selection::Columns(vec![COUNTER_VALUE.to_string()]))
    }
    CounterQueryKind::Delete => QueryBuilder::delete(SIMPLE_COUNTER_TABLE),
  };
  builder.where_keys(simple_counter_key_columns()).build()
}

fn clustered_counter_query(meta: &EntityMeta, kind: CounterQueryKind, target: &CounterTarget) -> Query {
  let all_counters = || meta.counter_properties().map(|pm| pm.column().to_string()).collect::<Vec<_>>();
  let builder = match (kind, target) {
    (CounterQueryKind::Incr, CounterTarget::Column(c)) => QueryBuilder::update(meta.table()).assign(c.clone(), AssignOp::Add),
    (CounterQueryKind::Decr, CounterTarget::Column(c)) => {
      QueryBuilder::update(meta.table()).assign(c.clone(), AssignOp::Subtract)
    }
    (CounterQueryKind::Select, CounterTarget::Column(c)) => {
      QueryBuilder::select(meta.table(), Selection::Columns(vec![c.clone()]))
    }
    (CounterQueryKind::Select, CounterTarget::All) => QueryBuilder::select(meta.table(), Selection::Columns(all_counters())),
    (CounterQueryKind::Delete, _) => QueryBuilder::delete(meta.table()),
    (CounterQueryKind::Incr | CounterQueryKind::Decr, CounterTarget::All) => {
      all_counters()
        .into_iter()
        .fold(QueryBuilder::update(meta.table()), |b, c| {
          let op = if kind == CounterQueryKind::Incr { AssignOp::Add } else { AssignOp::Subtract };
          b.assign(c, op)
        })
    }
  };
  builder.where_keys(meta.key_columns()).build()
}

// --- Fixed tables ---

/// Statements prepared once per entity when the context is created. Read-only
/// afterwards.
#[derive(Debug, Default)]
pub struct PreparedStatementTables {
  insert: HashMap<EntityType, PreparedStatement>,
  select: HashMap<EntityType, PreparedStatement>,
  remove: HashMap<(EntityType, String), PreparedStatement>,
  counters: HashMap<CounterStatementKey, PreparedStatement>,
}

impl PreparedStatementTables {
  pub fn initialize(session: &dyn Session, metas: &[Arc<EntityMeta>]) -> DaoResult<Self> {
    let mut tables = PreparedStatementTables::default();

    for meta in metas {
      let entity = meta.entity_type().clone();
      if meta.is_clustered_counter() {
        for pm in meta.counter_properties() {
          for kind in [CounterQueryKind::Incr, CounterQueryKind::Decr, CounterQueryKind::Select] {
            let target = CounterTarget::Column(pm.column().to_string());
            let ps = prepare_query(session, clustered_counter_query(meta, kind, &target))?;
            tables.counters.insert(
              CounterStatementKey::Clustered {
                entity: entity.clone(),
                kind,
                target,
              },
              ps,
            );
          }
        }
        for kind in [CounterQueryKind::Select, CounterQueryKind::Delete] {
          let ps = prepare_query(session, clustered_counter_query(meta, kind, &CounterTarget::All))?;
          tables.counters.insert(
            CounterStatementKey::Clustered {
              entity: entity.clone(),
              kind,
              target: CounterTarget::All,
            },
            ps,
          );
        }
      } else {
        tables.insert.insert(entity.clone(), prepare_insert(session, meta)?);
        tables.select.insert(entity.clone(), prepare_select(session, meta)?);
      }
      for table in meta.tables() {
        tables
          .remove
          .insert((entity.clone(), table.to_string()), prepare_remove(session, meta, table)?);
      }
    }

    if metas.iter().any(|meta| meta.has_simple_counters()) {
      for kind in [
        CounterQueryKind::Incr,
        CounterQueryKind::Decr,
        CounterQueryKind::Select,
        CounterQueryKind::Delete,
      ] {
        let ps = prepare_query(session, simple_counter_query(kind))?;
        tables.counters.insert(CounterStatementKey::Simple(kind), ps);
      }
    }

    log::debug!(
      "Prepared fixed statements for {} entities ({} counter statements)",
      metas.len(),
      tables.counters.len()
    );
    Ok(tables)
  }

  pub fn insert_for(&self, entity: &EntityType) -> DaoResult<&PreparedStatement> {
    self
      .insert
      .get(entity)
      .ok_or_else(|| DaoError::CacheConfiguration(format!("No insert statement prepared for entity '{}'", entity)))
  }

  pub fn select_for(&self, entity: &EntityType) -> DaoResult<&PreparedStatement> {
    self
      .select
      .get(entity)
      .ok_or_else(|| DaoError::CacheConfiguration(format!("No select statement prepared for entity '{}'", entity)))
  }

  pub fn remove_for(&self, entity: &EntityType, table: &str) -> DaoResult<&PreparedStatement> {
    self
      .remove
      .get(&(entity.clone(), table.to_string()))
      .ok_or_else(|| {
        DaoError::CacheConfiguration(format!(
          "No delete statement prepared for entity '{}' on table '{}'",
          entity, table
        ))
      })
  }

  pub fn counter(&self, key: &CounterStatementKey) -> DaoResult<&PreparedStatement> {
    self
      .counters
      .get(key)
      .ok_or_else(|| DaoError::CacheConfiguration(format!("No statement prepared for {}", key)))
  }

  pub fn len(&self) -> usize {
    self.insert.len() + self.select.len() + self.remove.len() + self.counters.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
