//! Bounded cache of prepared statements for ad-hoc column subsets.

use super::prepared;
use super::PreparedStatement;
use crate::changeset::{CollectionAndMapChangeType, DirtyCheckChangeSet};
use crate::config::DaoConfig;
use crate::error::DaoResult;
use crate::meta::{EntityMeta, EntityType, PropertyMeta};
use crate::session::Session;

use moka::sync::Cache;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
  SelectField,
  UpdateFields,
  CollectionAndMap(CollectionAndMapChangeType),
}

/// Identifies a cached statement. The property list is kept sorted, so updates
/// touching the same columns in any order share one statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementCacheKey {
  cache_type: CacheType,
  entity_type: EntityType,
  properties: Vec<String>,
}

impl StatementCacheKey {
  pub fn new(cache_type: CacheType, entity_type: EntityType, mut properties: Vec<String>) -> Self {
    properties.sort_unstable();
    Self {
      cache_type,
      entity_type,
      properties,
    }
  }

  pub fn cache_type(&self) -> CacheType {
    self.cache_type
  }

  pub fn entity_type(&self) -> &EntityType {
    &self.entity_type
  }

  pub fn properties(&self) -> &[String] {
    &self.properties
  }
}

impl fmt::Display for StatementCacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}:{}[{}]", self.cache_type, self.entity_type, self.properties.join(","))
  }
}

/// Evicting cache in front of `Session::prepare`.
///
/// The first caller for a key runs the factory; concurrent callers for the
/// same key wait for it and share its statement. A failed prepare is not
/// cached.
#[derive(Clone)]
pub struct StatementCache {
  inner: Cache<StatementCacheKey, PreparedStatement>,
}

impl StatementCache {
  pub fn new(config: &DaoConfig) -> Self {
    let mut builder = Cache::builder().max_capacity(config.statement_cache_size);
    if let Some(idle) = config.statement_cache_idle {
      builder = builder.time_to_idle(idle);
    }
    Self { inner: builder.build() }
  }

  pub fn get_or_create<F>(&self, key: StatementCacheKey, factory: F) -> DaoResult<PreparedStatement>
  where
    F: FnOnce() -> DaoResult<PreparedStatement>,
  {
    self.inner.try_get_with(key, factory).map_err(|arc| (*arc).clone())
  }

  pub fn field_select(
    &self,
    session: &dyn Session,
    meta: &EntityMeta,
    property: &PropertyMeta,
  ) -> DaoResult<PreparedStatement> {
    let key = StatementCacheKey::new(
      CacheType::SelectField,
      meta.entity_type().clone(),
      vec![property.name().to_string()],
    );
    self.get_or_create(key, || prepared::prepare_select_field(session, meta, property))
  }

  pub fn fields_update(
    &self,
    session: &dyn Session,
    meta: &EntityMeta,
    properties: &[Arc<PropertyMeta>],
  ) -> DaoResult<PreparedStatement> {
    let key = StatementCacheKey::new(
      CacheType::UpdateFields,
      meta.entity_type().clone(),
      properties.iter().map(|pm| pm.name().to_string()).collect(),
    );
    self.get_or_create(key, || prepared::prepare_update_fields(session, meta, properties))
  }

  pub fn collection_and_map_update(
    &self,
    session: &dyn Session,
    meta: &EntityMeta,
    change_set: &DirtyCheckChangeSet,
  ) -> DaoResult<PreparedStatement> {
    let key = StatementCacheKey::new(
      CacheType::CollectionAndMap(change_set.change_type()),
      meta.entity_type().clone(),
      vec![change_set.property().name().to_string()],
    );
    self.get_or_create(key, || prepared::prepare_collection_and_map_update(session, meta, change_set))
  }

  /// Number of cached statements once pending maintenance has run.
  pub fn entry_count(&self) -> u64 {
    self.inner.run_pending_tasks();
    self.inner.entry_count()
  }

  pub fn invalidate_all(&self) {
    self.inner.invalidate_all();
    self.inner.run_pending_tasks();
  }
}

impl fmt::Debug for StatementCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatementCache")
      .field("entry_count", &self.inner.entry_count())
      .field("max_capacity", &self.inner.policy().max_capacity())
      .finish()
  }
}
