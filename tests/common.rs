#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Once};

use cqlsolid::{
  CasResult, CasResultListener, ConsistencyLevel, CqlValue, DaoConfig, DaoContext, DaoResult, EntityMeta,
  MemorySession, PropertyKind, PropertyMeta, ValueCodec,
};
use parking_lot::Mutex;

static LOG_INIT: Once = Once::new();

pub fn setup_logging() {
  LOG_INIT.call_once(|| {
    env_logger::builder()
      .is_test(true)
      .try_init()
      .unwrap_or_else(|e| eprintln!("Failed to init logger: {}", e));
  });
}

pub type Entity = BTreeMap<String, CqlValue>;

pub fn entity<I, K, V>(values: I) -> Entity
where
  I: IntoIterator<Item = (K, V)>,
  K: Into<String>,
  V: Into<CqlValue>,
{
  values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// `users`: one partition key, plain columns, every collection kind and a
/// simple counter kept in the shared counter table.
pub fn user_meta() -> EntityMeta {
  EntityMeta::builder("User", "users")
    .partition_key("id")
    .simple("name")
    .simple("age")
    .simple("consistency_level")
    .property(PropertyMeta::new("address", PropertyKind::Simple).with_codec(ValueCodec::Packed))
    .list("friends")
    .set("tags")
    .map("preferences")
    .property(
      PropertyMeta::new("visits", PropertyKind::Counter).with_consistency(None, Some(ConsistencyLevel::Quorum)),
    )
    .build()
    .expect("user meta")
}

/// `clicks`: a clustered counter entity with two counter columns.
pub fn clicks_meta() -> EntityMeta {
  EntityMeta::builder("Clicks", "clicks")
    .partition_key("page")
    .clustering_key("day")
    .counter("score")
    .counter("views")
    .build()
    .expect("clicks meta")
}

pub struct Fixture {
  pub session: Arc<MemorySession>,
  pub dao: DaoContext,
}

impl Fixture {
  pub fn new() -> DaoResult<Self> {
    Self::with_config(DaoConfig::default())
  }

  pub fn with_config(config: DaoConfig) -> DaoResult<Self> {
    Self::build(config, vec![user_meta(), clicks_meta()])
  }

  /// Context registering only `metas`.
  pub fn with_metas(metas: Vec<EntityMeta>) -> DaoResult<Self> {
    Self::build(DaoConfig::default(), metas)
  }

  fn build(config: DaoConfig, metas: Vec<EntityMeta>) -> DaoResult<Self> {
    let session = Arc::new(MemorySession::new());
    let dao = DaoContext::new(session.clone(), config, metas)?;
    Ok(Self { session, dao })
  }

  pub fn meta(&self, entity_type: &str) -> Arc<EntityMeta> {
    Arc::clone(
      self
        .dao
        .entity_meta(&cqlsolid::EntityType::new(entity_type))
        .expect("entity registered"),
    )
  }

  pub fn user(&self) -> Arc<EntityMeta> {
    Arc::clone(self.dao.entity_meta(&cqlsolid::EntityType::new("User")).expect("User registered"))
  }

  pub fn clicks(&self) -> Arc<EntityMeta> {
    Arc::clone(self.dao.entity_meta(&cqlsolid::EntityType::new("Clicks")).expect("Clicks registered"))
  }
}

pub fn property(meta: &EntityMeta, name: &str) -> Arc<PropertyMeta> {
  Arc::clone(meta.property(name).expect("known property"))
}

#[derive(Default)]
pub struct RecordingListener {
  pub successes: Mutex<usize>,
  pub errors: Mutex<Vec<CasResult>>,
}

impl CasResultListener for RecordingListener {
  fn on_cas_success(&self) {
    *self.successes.lock() += 1;
  }

  fn on_cas_error(&self, result: CasResult) {
    self.errors.lock().push(result);
  }
}
