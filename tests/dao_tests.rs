mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::{entity, property, setup_logging, Fixture};
use cqlsolid::statement::{BindMarker, QueryBuilder, Selection};
use cqlsolid::{
  BatchKind, CasCondition, CollectionChange, ConsistencyLevel, CqlValue, DaoError, DaoResult, DirtyCheckChangeSet,
  EntityMeta, OperationContext, Options, PrimaryKey,
};

#[test]
fn test_insert_then_load_entity() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let user = entity([
    ("id", CqlValue::BigInt(1)),
    ("name", CqlValue::from("John")),
    ("address", CqlValue::from("1 Main St")),
    ("friends", CqlValue::list(["Paul"])),
  ]);

  let mut ctx = OperationContext::new(fx.user(), &user, Options::none())?;
  fx.dao.push_insert_statement(&mut ctx)?;
  assert!(ctx.pending_statements()[0].is_prepared());
  fx.dao.flush(&mut ctx)?;

  let stored = fx.session.row("users", &[CqlValue::BigInt(1)]).expect("row");
  assert!(matches!(stored.get("address"), Some(CqlValue::Blob(_))));

  let row = fx.dao.load_entity(&ctx)?.expect("loaded");
  assert_eq!(row.get("name"), Some(&CqlValue::from("John")));
  assert_eq!(row.get("address"), Some(&CqlValue::from("1 Main St")));
  assert_eq!(row.get("friends"), Some(&CqlValue::list(["Paul"])));
  assert!(row.is_null("age"));
  Ok(())
}

#[test]
fn test_load_missing_entity_returns_none() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let ctx = OperationContext::for_key(fx.user(), PrimaryKey::new(vec![CqlValue::BigInt(404)]), Options::none())?;
  assert_eq!(fx.dao.load_entity(&ctx)?, None);
  Ok(())
}

#[test]
fn test_load_property_unpacks_packed_values() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let meta = fx.user();
  let user = entity([("id", CqlValue::BigInt(2)), ("address", CqlValue::from("2 High St"))]);
  let mut ctx = OperationContext::new(Arc::clone(&meta), &user, Options::none())?;
  fx.dao.push_insert_statement(&mut ctx)?;
  fx.dao.flush(&mut ctx)?;

  let address = fx.dao.load_property(&ctx, &property(&meta, "address"))?;
  assert_eq!(address, Some(CqlValue::from("2 High St")));
  let statement = fx.session.last_executed().expect("select executed");
  assert_eq!(statement.cql, "SELECT address FROM users WHERE id = :id");
  Ok(())
}

#[test]
fn test_ttl_then_timestamp_are_bound_last() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let meta = fx.user();
  let write_time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap().timestamp_micros();
  let user = entity([("id", CqlValue::BigInt(5)), ("name", CqlValue::from("Eve"))]);
  let options = Options::builder().ttl(3600).timestamp(write_time).build()?;

  let mut ctx = OperationContext::new(Arc::clone(&meta), &user, options)?;
  fx.dao.push_update_statement(&mut ctx, &[property(&meta, "name")])?;
  let statement = &ctx.pending_statements()[0];

  assert!(!statement.is_prepared());
  assert_eq!(
    statement.cql(),
    "UPDATE users USING TTL :using_ttl AND TIMESTAMP :using_timestamp SET name = :name WHERE id = :id"
  );
  let values = statement.values();
  assert_eq!(values[values.len() - 2], CqlValue::Int(3600));
  assert_eq!(values[values.len() - 1], CqlValue::BigInt(write_time));
  fx.dao.flush(&mut ctx)?;
  Ok(())
}

#[test]
fn test_timestamp_without_ttl_binds_only_the_timestamp() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let user = entity([("id", CqlValue::BigInt(6))]);
  let write_time = Utc::now().timestamp_micros();
  let options = Options::builder().timestamp(write_time).build()?;

  let mut ctx = OperationContext::new(fx.user(), &user, options)?;
  fx.dao.push_insert_statement(&mut ctx)?;
  let statement = &ctx.pending_statements()[0];
  assert!(statement.cql().ends_with("USING TIMESTAMP :using_timestamp"));
  assert_eq!(statement.values().last(), Some(&CqlValue::BigInt(write_time)));
  assert!(!statement.values().contains(&CqlValue::Int(0)));
  ctx.discard_pending();
  Ok(())
}

#[test]
fn test_collection_and_map_updates() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let meta = fx.user();
  let user = entity([("id", CqlValue::BigInt(7))]);
  let mut ctx = OperationContext::new(Arc::clone(&meta), &user, Options::none())?;

  let changes = [
    DirtyCheckChangeSet::new(
      property(&meta, "friends"),
      CollectionChange::AssignList(vec!["a".into(), "b".into(), "c".into()]),
    ),
    DirtyCheckChangeSet::new(
      property(&meta, "friends"),
      CollectionChange::SetToListAtIndex {
        index: 1,
        element: "B".into(),
      },
    ),
    DirtyCheckChangeSet::new(property(&meta, "friends"), CollectionChange::RemoveFromListAtIndex { index: 0 }),
    DirtyCheckChangeSet::new(property(&meta, "tags"), CollectionChange::AddToSet(vec!["x".into(), "y".into()])),
    DirtyCheckChangeSet::new(property(&meta, "tags"), CollectionChange::RemoveFromSet(vec!["x".into()])),
    DirtyCheckChangeSet::new(
      property(&meta, "preferences"),
      CollectionChange::AddToMap(vec![("lang".into(), "fr".into()), ("tz".into(), "UTC".into())]),
    ),
    DirtyCheckChangeSet::new(property(&meta, "preferences"), CollectionChange::RemoveFromMap(vec!["tz".into()])),
  ];
  for change in &changes {
    fx.dao.push_collection_and_map_update_statement(&mut ctx, change)?;
  }

  let prepared: Vec<bool> = ctx.pending_statements().iter().map(|s| s.is_prepared()).collect();
  assert_eq!(prepared, vec![true, false, false, true, true, true, true]);
  fx.dao.flush(&mut ctx)?;

  let row = fx.session.row("users", &[CqlValue::BigInt(7)]).expect("row");
  assert_eq!(row.get("friends"), Some(&CqlValue::list(["B", "c"])));
  assert_eq!(row.get("tags"), Some(&CqlValue::set(["y"])));
  assert_eq!(row.get("preferences"), Some(&CqlValue::map([("lang", "fr")])));
  Ok(())
}

#[test]
fn test_collection_change_on_plain_property_is_rejected() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let meta = fx.user();
  let user = entity([("id", CqlValue::BigInt(8))]);
  let mut ctx = OperationContext::new(Arc::clone(&meta), &user, Options::none())?;
  let change = DirtyCheckChangeSet::new(property(&meta, "name"), CollectionChange::AppendToList(vec![]));

  let err = fx.dao.push_collection_and_map_update_statement(&mut ctx, &change).unwrap_err();
  assert!(matches!(err, DaoError::Binding(_)));
  Ok(())
}

#[test]
fn test_removal_deletes_the_row() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let user = entity([("id", CqlValue::BigInt(9)), ("name", CqlValue::from("Zoe"))]);
  let mut ctx = OperationContext::new(fx.user(), &user, Options::none())?;
  fx.dao.push_insert_statement(&mut ctx)?;
  fx.dao.flush(&mut ctx)?;
  assert_eq!(fx.session.row_count("users"), 1);

  fx.dao.bind_for_removal(&mut ctx, "users")?;
  fx.dao.flush(&mut ctx)?;
  assert_eq!(fx.session.row_count("users"), 0);
  Ok(())
}

#[test]
fn test_flush_executes_single_statement_directly_and_several_as_logged_batch() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let meta = fx.user();
  let user = entity([("id", CqlValue::BigInt(11)), ("name", CqlValue::from("Max")), ("age", CqlValue::Int(20))]);

  let mut ctx = OperationContext::new(Arc::clone(&meta), &user, Options::none())?;
  fx.dao.push_insert_statement(&mut ctx)?;
  fx.dao.flush(&mut ctx)?;
  assert_eq!(fx.session.batch_count(), 0);

  fx.dao.push_update_statement(&mut ctx, &[property(&meta, "name")])?;
  fx.dao.push_update_statement(&mut ctx, &[property(&meta, "age")])?;
  fx.session.clear_executed();
  fx.dao.flush(&mut ctx)?;

  assert_eq!(fx.session.batch_count(), 1);
  assert!(fx
    .session
    .executed()
    .iter()
    .all(|s| s.batch == Some(BatchKind::Logged)));
  assert!(!ctx.has_pending());
  Ok(())
}

#[test]
fn test_explicit_consistency_overrides_entity_default() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let user = entity([("id", CqlValue::BigInt(12))]);
  let options = Options::builder().consistency(ConsistencyLevel::LocalQuorum).build()?;

  let mut ctx = OperationContext::new(fx.user(), &user, options)?;
  fx.dao.push_insert_statement(&mut ctx)?;
  fx.dao.flush(&mut ctx)?;

  let statement = fx.session.last_executed().expect("insert executed");
  assert_eq!(statement.consistency, ConsistencyLevel::LocalQuorum);
  Ok(())
}

#[test]
fn test_driver_errors_propagate_unchanged() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let user = entity([("id", CqlValue::BigInt(13))]);
  let mut ctx = OperationContext::new(fx.user(), &user, Options::none())?;
  fx.dao.push_insert_statement(&mut ctx)?;

  fx.session.fail_next("node unavailable");
  let err = fx.dao.flush(&mut ctx).unwrap_err();
  match err {
    DaoError::Driver(source) => assert_eq!(source.to_string(), "Injected failure: node unavailable"),
    other => panic!("unexpected error: {:?}", other),
  }
  assert_eq!(fx.session.row_count("users"), 0);
  Ok(())
}

#[test]
fn test_raw_prepare_and_bind_checks_value_count() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let ps = fx.dao.prepare(
    QueryBuilder::select("users", Selection::Columns(vec!["name".into()]))
      .where_key("id")
      .build(),
  )?;

  let result = fx.dao.bind_and_execute(&ps, vec![CqlValue::BigInt(1)], ConsistencyLevel::One)?;
  assert!(result.is_empty());

  let err = fx
    .dao
    .bind_and_execute(&ps, vec![CqlValue::BigInt(1), CqlValue::BigInt(2)], ConsistencyLevel::One)
    .unwrap_err();
  assert!(matches!(err, DaoError::Binding(_)));
  Ok(())
}

#[test]
fn test_context_without_primary_key_is_rejected() {
  setup_logging();
  let fx = Fixture::new().expect("fixture");
  let user = entity([("name", CqlValue::from("Nobody"))]);
  let err = OperationContext::new(fx.user(), &user, Options::none()).unwrap_err();
  assert!(matches!(err, DaoError::Binding(_)));
}

#[test]
fn test_update_without_properties_is_rejected() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::new()?;
  let user = entity([("id", CqlValue::BigInt(14)), ("name", CqlValue::from("Lea"))]);

  let mut ctx = OperationContext::new(fx.user(), &user, Options::none())?;
  let err = fx.dao.push_update_statement(&mut ctx, &[]).unwrap_err();
  assert!(matches!(err, DaoError::Binding(_)));
  assert_eq!(fx.dao.statement_cache().entry_count(), 0);

  ctx.set_options(Options::builder().if_condition(CasCondition::new("name", "Lea")).build()?);
  let err = fx.dao.push_update_statement(&mut ctx, &[]).unwrap_err();
  assert!(matches!(err, DaoError::Binding(_)));
  assert!(!ctx.has_pending());
  Ok(())
}

fn events_meta() -> DaoResult<EntityMeta> {
  EntityMeta::builder("Event", "events")
    .partition_key("id")
    .simple("ttl")
    .simple("timestamp")
    .build()
}

fn marker_names_are_unique(names: &[String]) -> bool {
  names.iter().collect::<HashSet<_>>().len() == names.len()
}

#[test]
fn test_columns_named_ttl_and_timestamp_keep_distinct_markers() -> DaoResult<()> {
  setup_logging();
  let fx = Fixture::with_metas(vec![events_meta()?])?;
  let meta = fx.meta("Event");
  let event = entity([
    ("id", CqlValue::BigInt(1)),
    ("ttl", CqlValue::Int(7)),
    ("timestamp", CqlValue::BigInt(99)),
  ]);

  let mut ctx = OperationContext::new(Arc::clone(&meta), &event, Options::builder().ttl(60).build()?)?;
  fx.dao.push_update_statement(&mut ctx, &[property(&meta, "ttl")])?;
  let prepared = &ctx.pending_statements()[0];
  assert!(prepared.is_prepared());
  assert_eq!(prepared.cql(), "UPDATE events USING TTL :using_ttl SET ttl = :ttl WHERE id = :id");
  let names: Vec<String> = prepared.query().markers().iter().map(BindMarker::name).collect();
  assert!(marker_names_are_unique(&names));
  fx.dao.flush(&mut ctx)?;

  ctx.set_options(Options::builder().timestamp(1_000).build()?);
  fx.dao.push_update_statement(&mut ctx, &[property(&meta, "timestamp")])?;
  let generated = &ctx.pending_statements()[0];
  assert!(!generated.is_prepared());
  assert_eq!(
    generated.cql(),
    "UPDATE events USING TIMESTAMP :using_timestamp SET timestamp = :timestamp WHERE id = :id"
  );
  let names: Vec<String> = generated.query().markers().iter().map(BindMarker::name).collect();
  assert!(marker_names_are_unique(&names));
  fx.dao.flush(&mut ctx)?;

  let row = fx.session.row("events", &[CqlValue::BigInt(1)]).expect("row");
  assert_eq!(row.get("ttl"), Some(&CqlValue::Int(7)));
  assert_eq!(row.get("timestamp"), Some(&CqlValue::BigInt(99)));
  Ok(())
}

#[test]
fn test_reserved_marker_names_are_rejected_as_columns() {
  setup_logging();
  let using_ttl = EntityMeta::builder("Bad", "bad").partition_key("id").simple("using_ttl").build();
  assert!(matches!(using_ttl, Err(DaoError::InvalidConfiguration(_))));

  let using_timestamp = EntityMeta::builder("Bad", "bad")
    .partition_key("id")
    .simple("using_timestamp")
    .build();
  assert!(matches!(using_timestamp, Err(DaoError::InvalidConfiguration(_))));

  let shadows_condition = EntityMeta::builder("Bad", "bad")
    .partition_key("id")
    .simple("name")
    .simple("if_name")
    .build();
  assert!(matches!(shadows_condition, Err(DaoError::InvalidConfiguration(_))));
}

#[test]
fn test_removal_from_extra_table() -> DaoResult<()> {
  setup_logging();
  let account = EntityMeta::builder("Account", "accounts")
    .extra_table("accounts_by_id_archive")
    .partition_key("id")
    .simple("email")
    .build()?;
  let fx = Fixture::with_metas(vec![account])?;
  let meta = fx.meta("Account");
  assert_eq!(meta.tables().collect::<Vec<_>>(), vec!["accounts", "accounts_by_id_archive"]);

  let archive_insert = fx.dao.prepare(
    QueryBuilder::insert("accounts_by_id_archive", vec!["id".into()])
      .value("id")
      .value("email")
      .build(),
  )?;
  fx.dao.bind_and_execute(
    &archive_insert,
    vec![CqlValue::BigInt(1), CqlValue::from("a@b.c")],
    ConsistencyLevel::One,
  )?;
  let account = entity([("id", CqlValue::BigInt(1)), ("email", CqlValue::from("a@b.c"))]);
  let mut ctx = OperationContext::new(Arc::clone(&meta), &account, Options::none())?;
  fx.dao.push_insert_statement(&mut ctx)?;
  fx.dao.flush(&mut ctx)?;

  fx.dao.bind_for_removal(&mut ctx, "accounts_by_id_archive")?;
  assert_eq!(ctx.pending_statements()[0].cql(), "DELETE FROM accounts_by_id_archive WHERE id = :id");
  fx.dao.flush(&mut ctx)?;

  assert_eq!(fx.session.row_count("accounts_by_id_archive"), 0);
  assert_eq!(fx.session.row_count("accounts"), 1);
  Ok(())
}
