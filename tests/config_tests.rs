mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{entity, setup_logging, user_meta, Fixture};
use cqlsolid::{
  deserialize_value, serialize_value, ConsistencyLevel, ConsistencyOverrider, CqlValue, DaoConfig, DaoError,
  DaoResult, OperationContext, Options,
};

#[test]
fn test_default_config_is_valid() -> DaoResult<()> {
  setup_logging();
  let config = DaoConfig::default();
  config.validate()?;
  assert_eq!(config.statement_cache_size, 5000);
  assert_eq!(config.default_write_consistency, ConsistencyLevel::One);
  Ok(())
}

#[test]
fn test_invalid_config_is_rejected_at_startup() {
  setup_logging();
  let zero_cache = DaoConfig {
    statement_cache_size: 0,
    ..Default::default()
  };
  assert!(matches!(
    Fixture::with_config(zero_cache),
    Err(DaoError::InvalidConfiguration(_))
  ));

  let serial_write = DaoConfig {
    default_write_consistency: ConsistencyLevel::Serial,
    ..Default::default()
  };
  assert!(matches!(serial_write.validate(), Err(DaoError::InvalidConfiguration(_))));

  let zero_idle = DaoConfig {
    statement_cache_idle: Some(Duration::ZERO),
    ..Default::default()
  };
  assert!(matches!(zero_idle.validate(), Err(DaoError::InvalidConfiguration(_))));
}

#[test]
fn test_config_survives_messagepack() -> DaoResult<()> {
  setup_logging();
  let mut config = DaoConfig {
    statement_cache_idle: Some(Duration::from_secs(300)),
    default_read_consistency: ConsistencyLevel::LocalOne,
    ..Default::default()
  };
  config
    .write_consistency_by_table
    .insert("users".into(), ConsistencyLevel::EachQuorum);

  let bytes = serialize_value(&config)?;
  let restored: DaoConfig = deserialize_value(&bytes)?;
  assert_eq!(restored, config);
  Ok(())
}

#[test]
fn test_per_table_default_applies_when_entity_declares_none() -> DaoResult<()> {
  setup_logging();
  let mut config = DaoConfig::default();
  config
    .write_consistency_by_table
    .insert("users".into(), ConsistencyLevel::Two);
  let fx = Fixture::with_config(config)?;
  let user = entity([("id", CqlValue::BigInt(1))]);

  let mut ctx = OperationContext::new(fx.user(), &user, Options::none())?;
  fx.dao.push_insert_statement(&mut ctx)?;
  assert_eq!(ctx.pending_statements()[0].consistency(), ConsistencyLevel::Two);
  fx.dao.flush(&mut ctx)?;
  Ok(())
}

#[test]
fn test_consistency_resolution_is_idempotent() -> DaoResult<()> {
  setup_logging();
  let overrider = ConsistencyOverrider::default();
  let meta = Arc::new(user_meta());
  let visits = meta.property("visits").cloned().expect("counter");
  let options = Options::builder().ttl(10).build()?;

  let first = overrider.write_level(&options, &meta, Some(&*visits));
  for _ in 0..10 {
    assert_eq!(overrider.write_level(&options, &meta, Some(&*visits)), first);
  }
  assert_eq!(first, ConsistencyLevel::Quorum);

  let derived = options.duplicate_with_new_consistency_level(ConsistencyLevel::All);
  assert_eq!(overrider.write_level(&derived, &meta, Some(&*visits)), ConsistencyLevel::All);
  assert_eq!(overrider.write_level(&options, &meta, Some(&*visits)), ConsistencyLevel::Quorum);
  Ok(())
}
