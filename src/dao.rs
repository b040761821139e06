//! Statement execution façade.
//!
//! [`DaoContext`] decides, per operation, whether a statement is generated on
//! the fly or taken from a cache and bound, resolves its consistency level,
//! and either queues it on the [`OperationContext`] or runs it right away.
//!
//! Writes carrying CAS conditions, `IF NOT EXISTS` or an explicit timestamp are
//! always generated. Everything else goes through a prepared statement.

use crate::cas::{self, CasOperation, CasOutcome};
use crate::changeset::DirtyCheckChangeSet;
use crate::config::DaoConfig;
use crate::consistency::ConsistencyOverrider;
use crate::context::OperationContext;
use crate::error::{DaoError, DaoResult};
use crate::meta::{EntityMeta, EntityType, PropertyMeta, ValueCodec};
use crate::options::Options;
use crate::serialization;
use crate::session::{BatchKind, ResultSet, Row, Session};
use crate::statement::prepared::{self, COUNTER_VALUE};
use crate::statement::{
  CounterQueryKind, CounterStatementKey, CounterTarget, ExecutableStatement, GeneratedStatement, PreparedStatement,
  PreparedStatementBinder, PreparedStatementTables, Query, StatementCache, StatementGenerator,
};
use crate::types::{ConsistencyLevel, CqlValue};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

fn ensure_counter(meta: &EntityMeta, property: &PropertyMeta) -> DaoResult<()> {
  if property.is_counter() && meta.property(property.name()).is_some() {
    Ok(())
  } else {
    Err(DaoError::Binding(format!(
      "Property '{}' is not a counter of entity '{}'",
      property.name(),
      meta.entity_type()
    )))
  }
}

fn with_statement_options(mut generated: GeneratedStatement, options: &Options) -> GeneratedStatement {
  if let Some(ttl) = options.ttl() {
    generated = generated.using_ttl(ttl);
  }
  if let Some(timestamp) = options.timestamp() {
    generated = generated.using_timestamp(timestamp);
  }
  generated
}

fn cas_operation(statement: &ExecutableStatement) -> CasOperation {
  if statement.query().is_insert() {
    CasOperation::Insert
  } else {
    CasOperation::Update
  }
}

/// Shared entry point for every entity statement. Cheap to share behind an
/// `Arc`; all state is either immutable or internally synchronized.
pub struct DaoContext {
  session: Arc<dyn Session>,
  config: DaoConfig,
  metas: HashMap<EntityType, Arc<EntityMeta>>,
  tables: PreparedStatementTables,
  cache: StatementCache,
  overrider: ConsistencyOverrider,
  generator: StatementGenerator,
  binder: PreparedStatementBinder,
}

impl DaoContext {
  /// Validates `config` and prepares the fixed statements of every entity.
  pub fn new(session: Arc<dyn Session>, config: DaoConfig, metas: Vec<EntityMeta>) -> DaoResult<Self> {
    config.validate()?;
    let metas: Vec<Arc<EntityMeta>> = metas.into_iter().map(Arc::new).collect();
    let tables = PreparedStatementTables::initialize(session.as_ref(), &metas)?;
    let cache = StatementCache::new(&config);
    let overrider = ConsistencyOverrider::from_config(&config);
    log::debug!(
      "DaoContext ready: {} entities, {} fixed statements, cache bound {}",
      metas.len(),
      tables.len(),
      config.statement_cache_size
    );
    Ok(Self {
      session,
      config,
      metas: metas.into_iter().map(|m| (m.entity_type().clone(), m)).collect(),
      tables,
      cache,
      overrider,
      generator: StatementGenerator::new(),
      binder: PreparedStatementBinder::new(),
    })
  }

  pub fn config(&self) -> &DaoConfig {
    &self.config
  }

  pub fn session(&self) -> &Arc<dyn Session> {
    &self.session
  }

  pub fn statement_cache(&self) -> &StatementCache {
    &self.cache
  }

  pub fn prepared_tables(&self) -> &PreparedStatementTables {
    &self.tables
  }

  pub fn consistency_overrider(&self) -> &ConsistencyOverrider {
    &self.overrider
  }

  pub fn entity_meta(&self, entity_type: &EntityType) -> DaoResult<&Arc<EntityMeta>> {
    self.metas.get(entity_type).ok_or_else(|| {
      DaoError::CacheConfiguration(format!("Entity '{}' was not registered with this context", entity_type))
    })
  }

  // --- Entity writes (queued) ---

  pub fn push_insert_statement(&self, ctx: &mut OperationContext<'_>) -> DaoResult<()> {
    let meta = Arc::clone(ctx.meta());
    let entity = ctx.entity()?;
    let options = ctx.options();
    let consistency = self.overrider.write_level(options, &meta, None);
    log::debug!(
      "Push insert of '{}' {} at {}",
      meta.entity_type(),
      ctx.primary_key(),
      consistency
    );

    let statement = if options.is_if_not_exists() || options.timestamp().is_some() {
      let generated = self.generator.generate_insert(entity, &meta, options.is_if_not_exists())?;
      with_statement_options(generated, options).into_statement(consistency, options.cas_result_listener().cloned())
    } else {
      let ps = self.tables.insert_for(meta.entity_type())?;
      self.binder.bind_for_insert(ps, &meta, entity, options.ttl(), consistency)?
    };
    ctx.push_statement(statement);
    Ok(())
  }

  /// Queues an update of `properties` only. Any order of the same properties
  /// shares one cached statement.
  pub fn push_update_statement(
    &self,
    ctx: &mut OperationContext<'_>,
    properties: &[Arc<PropertyMeta>],
  ) -> DaoResult<()> {
    let meta = Arc::clone(ctx.meta());
    let entity = ctx.entity()?;
    let options = ctx.options();
    if properties.is_empty() {
      return Err(DaoError::Binding(format!(
        "No property to update for entity '{}'",
        meta.entity_type()
      )));
    }
    if let Some(pm) = properties.iter().find(|pm| pm.is_counter() || pm.kind().is_key()) {
      return Err(DaoError::Binding(format!(
        "Property '{}' of entity '{}' cannot be updated as a field",
        pm.name(),
        meta.entity_type()
      )));
    }
    let consistency = self.overrider.write_level(options, &meta, None);
    log::debug!(
      "Push update of {:?} on '{}' {} at {}",
      properties.iter().map(|pm| pm.name()).collect::<Vec<_>>(),
      meta.entity_type(),
      ctx.primary_key(),
      consistency
    );

    let statement = if options.has_cas_conditions() || options.timestamp().is_some() {
      for condition in options.cas_conditions() {
        meta.encode_cas_condition(condition)?;
      }
      let generated = self
        .generator
        .generate_update_fields(entity, &meta, properties, options.cas_conditions())?;
      with_statement_options(generated, options).into_statement(consistency, options.cas_result_listener().cloned())
    } else {
      let ps = self.cache.fields_update(self.session.as_ref(), &meta, properties)?;
      self
        .binder
        .bind_for_update(&ps, &meta, entity, properties, options.ttl(), consistency)?
    };
    ctx.push_statement(statement);
    Ok(())
  }

  pub fn push_collection_and_map_update_statement(
    &self,
    ctx: &mut OperationContext<'_>,
    change_set: &DirtyCheckChangeSet,
  ) -> DaoResult<()> {
    let meta = Arc::clone(ctx.meta());
    let entity = ctx.entity()?;
    let options = ctx.options();
    if !change_set.property().kind().is_collection() {
      return Err(DaoError::Binding(format!(
        "Property '{}' of entity '{}' is not a collection or map",
        change_set.property().name(),
        meta.entity_type()
      )));
    }
    let consistency = self.overrider.write_level(options, &meta, None);
    log::debug!(
      "Push {:?} on '{}.{}' {} at {}",
      change_set.change_type(),
      meta.entity_type(),
      change_set.property().name(),
      ctx.primary_key(),
      consistency
    );

    let dynamic = options.has_cas_conditions()
      || options.timestamp().is_some()
      || change_set.change_type().is_index_addressed();
    let statement = if dynamic {
      for condition in options.cas_conditions() {
        meta.encode_cas_condition(condition)?;
      }
      let generated = self.generator.generate_collection_and_map_update_operation(
        change_set,
        entity,
        &meta,
        options.cas_conditions(),
      )?;
      with_statement_options(generated, options).into_statement(consistency, options.cas_result_listener().cloned())
    } else {
      let ps = self
        .cache
        .collection_and_map_update(self.session.as_ref(), &meta, change_set)?;
      self
        .binder
        .bind_for_collection_and_map_update(&ps, &meta, entity, change_set, options.ttl(), consistency)?
    };
    ctx.push_statement(statement);
    Ok(())
  }

  /// Queues deletion of the row from `table`.
  pub fn bind_for_removal(&self, ctx: &mut OperationContext<'_>, table: &str) -> DaoResult<()> {
    let meta = Arc::clone(ctx.meta());
    let consistency = self.overrider.write_level(ctx.options(), &meta, None);
    log::debug!("Push removal of '{}' {} from '{}'", meta.entity_type(), ctx.primary_key(), table);
    let ps = self.tables.remove_for(meta.entity_type(), table)?;
    let statement = self
      .binder
      .bind_statement_with_only_pk_in_where_clause(ps, &meta, ctx.primary_key(), consistency)?;
    ctx.push_statement(statement);
    Ok(())
  }

  // --- Reads (immediate) ---

  /// Loads the whole row, `None` when absent. `Packed` columns are unpacked.
  pub fn load_entity(&self, ctx: &OperationContext<'_>) -> DaoResult<Option<Row>> {
    let meta = ctx.meta();
    let consistency = self.overrider.read_level(ctx.options(), meta, None);
    log::debug!("Load '{}' {} at {}", meta.entity_type(), ctx.primary_key(), consistency);
    let ps = if meta.is_clustered_counter() {
      self.tables.counter(&CounterStatementKey::Clustered {
        entity: meta.entity_type().clone(),
        kind: CounterQueryKind::Select,
        target: CounterTarget::All,
      })?
    } else {
      self.tables.select_for(meta.entity_type())?
    };
    let statement = self
      .binder
      .bind_statement_with_only_pk_in_where_clause(ps, meta, ctx.primary_key(), consistency)?;
    match self.execute(&statement)?.into_first() {
      Some(row) => self.decode_row(meta, row).map(Some),
      None => Ok(None),
    }
  }

  /// Loads one property. Counters are read from wherever they live.
  pub fn load_property(&self, ctx: &OperationContext<'_>, property: &PropertyMeta) -> DaoResult<Option<CqlValue>> {
    let meta = ctx.meta();
    if property.is_counter() {
      let value = if meta.is_clustered_counter() {
        self.get_clustered_counter_column(ctx, property)?
      } else {
        self.get_simple_counter(ctx, property)?
      };
      return Ok(value.map(CqlValue::Counter));
    }
    let consistency = self.overrider.read_level(ctx.options(), meta, Some(property));
    log::debug!(
      "Load property '{}' of '{}' {} at {}",
      property.name(),
      meta.entity_type(),
      ctx.primary_key(),
      consistency
    );
    let ps = self.cache.field_select(self.session.as_ref(), meta, property)?;
    let statement = self
      .binder
      .bind_statement_with_only_pk_in_where_clause(&ps, meta, ctx.primary_key(), consistency)?;
    let row = self.execute(&statement)?.into_first();
    match row.and_then(|r| r.get(property.column()).cloned()) {
      Some(value) if property.codec() == ValueCodec::Packed => serialization::unpack_value(&value).map(Some),
      other => Ok(other),
    }
  }

  fn decode_row(&self, meta: &EntityMeta, row: Row) -> DaoResult<Row> {
    let mut decoded = Row::new();
    for (column, value) in row.iter() {
      let value = match meta.property_by_column(column) {
        Some(pm) if pm.codec() == ValueCodec::Packed => serialization::unpack_value(value)?,
        _ => value.clone(),
      };
      decoded.push(column, value);
    }
    Ok(decoded)
  }

  // --- Simple counters ---

  fn bind_simple_counter_delta(
    &self,
    ctx: &OperationContext<'_>,
    property: &PropertyMeta,
    kind: CounterQueryKind,
    delta: i64,
  ) -> DaoResult<ExecutableStatement> {
    let meta = ctx.meta();
    ensure_counter(meta, property)?;
    let consistency = self.overrider.write_level(ctx.options(), meta, Some(property));
    log::debug!(
      "{} simple counter '{}.{}' {} by {} at {}",
      kind,
      meta.entity_type(),
      property.name(),
      ctx.primary_key(),
      delta,
      consistency
    );
    let ps = self.tables.counter(&CounterStatementKey::Simple(kind))?;
    self
      .binder
      .bind_for_simple_counter_increment_decrement(ps, meta, ctx.primary_key(), property, delta, consistency)
  }

  /// Queues an increment of a simple counter.
  pub fn bind_for_simple_counter_increment(
    &self,
    ctx: &mut OperationContext<'_>,
    property: &PropertyMeta,
    increment: i64,
  ) -> DaoResult<()> {
    let statement = self.bind_simple_counter_delta(ctx, property, CounterQueryKind::Incr, increment)?;
    ctx.push_counter_statement(statement);
    Ok(())
  }

  pub fn increment_simple_counter(
    &self,
    ctx: &OperationContext<'_>,
    property: &PropertyMeta,
    increment: i64,
  ) -> DaoResult<()> {
    let statement = self.bind_simple_counter_delta(ctx, property, CounterQueryKind::Incr, increment)?;
    self.execute(&statement).map(|_| ())
  }

  pub fn decrement_simple_counter(
    &self,
    ctx: &OperationContext<'_>,
    property: &PropertyMeta,
    decrement: i64,
  ) -> DaoResult<()> {
    let statement = self.bind_simple_counter_delta(ctx, property, CounterQueryKind::Decr, decrement)?;
    self.execute(&statement).map(|_| ())
  }

  /// Current value of a simple counter, `None` if it was never written.
  pub fn get_simple_counter(&self, ctx: &OperationContext<'_>, property: &PropertyMeta) -> DaoResult<Option<i64>> {
    let meta = ctx.meta();
    ensure_counter(meta, property)?;
    let consistency = self.overrider.read_level(ctx.options(), meta, Some(property));
    log::debug!(
      "Get simple counter '{}.{}' {} at {}",
      meta.entity_type(),
      property.name(),
      ctx.primary_key(),
      consistency
    );
    let ps = self.tables.counter(&CounterStatementKey::Simple(CounterQueryKind::Select))?;
    let statement = self
      .binder
      .bind_for_simple_counter_select(ps, meta, ctx.primary_key(), property, consistency)?;
    match self.execute(&statement)?.into_first() {
      Some(row) => row.get_i64(COUNTER_VALUE),
      None => Ok(None),
    }
  }

  /// Queues deletion of a simple counter.
  pub fn bind_for_simple_counter_delete(
    &self,
    ctx: &mut OperationContext<'_>,
    property: &PropertyMeta,
  ) -> DaoResult<()> {
    let meta = Arc::clone(ctx.meta());
    ensure_counter(&meta, property)?;
    let consistency = self.overrider.write_level(ctx.options(), &meta, Some(property));
    log::debug!(
      "Push delete of simple counter '{}.{}' {}",
      meta.entity_type(),
      property.name(),
      ctx.primary_key()
    );
    let ps = self.tables.counter(&CounterStatementKey::Simple(CounterQueryKind::Delete))?;
    let statement = self
      .binder
      .bind_for_simple_counter_delete(ps, &meta, ctx.primary_key(), property, consistency)?;
    ctx.push_counter_statement(statement);
    Ok(())
  }

  // --- Clustered counters ---

  fn push_clustered_counter_delta(
    &self,
    ctx: &mut OperationContext<'_>,
    property: &PropertyMeta,
    kind: CounterQueryKind,
    delta: i64,
  ) -> DaoResult<()> {
    let meta = Arc::clone(ctx.meta());
    ensure_counter(&meta, property)?;
    let consistency = self.overrider.write_level(ctx.options(), &meta, Some(property));
    log::debug!(
      "Push {} of clustered counter '{}.{}' {} by {} at {}",
      kind,
      meta.entity_type(),
      property.name(),
      ctx.primary_key(),
      delta,
      consistency
    );
    let ps = self.tables.counter(&CounterStatementKey::Clustered {
      entity: meta.entity_type().clone(),
      kind,
      target: CounterTarget::Column(property.column().to_string()),
    })?;
    let statement = self
      .binder
      .bind_for_clustered_counter_increment_decrement(ps, &meta, ctx.primary_key(), delta, consistency)?;
    ctx.push_counter_statement(statement);
    Ok(())
  }

  pub fn push_clustered_counter_increment_statement(
    &self,
    ctx: &mut OperationContext<'_>,
    property: &PropertyMeta,
    increment: i64,
  ) -> DaoResult<()> {
    self.push_clustered_counter_delta(ctx, property, CounterQueryKind::Incr, increment)
  }

  pub fn push_clustered_counter_decrement_statement(
    &self,
    ctx: &mut OperationContext<'_>,
    property: &PropertyMeta,
    decrement: i64,
  ) -> DaoResult<()> {
    self.push_clustered_counter_delta(ctx, property, CounterQueryKind::Decr, decrement)
  }

  /// Every counter column of a clustered counter row.
  pub fn get_clustered_counter(&self, ctx: &OperationContext<'_>) -> DaoResult<Option<Row>> {
    let meta = ctx.meta();
    let consistency = self.overrider.read_level(ctx.options(), meta, None);
    log::debug!("Get clustered counters of '{}' {} at {}", meta.entity_type(), ctx.primary_key(), consistency);
    let ps = self.tables.counter(&CounterStatementKey::Clustered {
      entity: meta.entity_type().clone(),
      kind: CounterQueryKind::Select,
      target: CounterTarget::All,
    })?;
    let statement = self
      .binder
      .bind_for_clustered_counter_select(ps, meta, ctx.primary_key(), consistency)?;
    Ok(self.execute(&statement)?.into_first())
  }

  pub fn get_clustered_counter_column(
    &self,
    ctx: &OperationContext<'_>,
    property: &PropertyMeta,
  ) -> DaoResult<Option<i64>> {
    let meta = ctx.meta();
    ensure_counter(meta, property)?;
    let consistency = self.overrider.read_level(ctx.options(), meta, Some(property));
    log::debug!(
      "Get clustered counter '{}.{}' {} at {}",
      meta.entity_type(),
      property.name(),
      ctx.primary_key(),
      consistency
    );
    let ps = self.tables.counter(&CounterStatementKey::Clustered {
      entity: meta.entity_type().clone(),
      kind: CounterQueryKind::Select,
      target: CounterTarget::Column(property.column().to_string()),
    })?;
    let statement = self
      .binder
      .bind_for_clustered_counter_select(ps, meta, ctx.primary_key(), consistency)?;
    match self.execute(&statement)?.into_first() {
      Some(row) => row.get_i64(property.column()),
      None => Ok(None),
    }
  }

  /// Queues deletion of every counter of a clustered counter row.
  pub fn bind_for_clustered_counter_delete(&self, ctx: &mut OperationContext<'_>) -> DaoResult<()> {
    let meta = Arc::clone(ctx.meta());
    let consistency = self.overrider.write_level(ctx.options(), &meta, None);
    log::debug!("Push delete of clustered counters '{}' {}", meta.entity_type(), ctx.primary_key());
    let ps = self.tables.counter(&CounterStatementKey::Clustered {
      entity: meta.entity_type().clone(),
      kind: CounterQueryKind::Delete,
      target: CounterTarget::All,
    })?;
    let statement = self
      .binder
      .bind_for_clustered_counter_delete(ps, &meta, ctx.primary_key(), consistency)?;
    ctx.push_counter_statement(statement);
    Ok(())
  }

  // --- Raw access ---

  /// Runs one statement now. A conditional statement that was not applied
  /// notifies its listener, or fails with [`DaoError::CasConflict`] when it
  /// has none.
  pub fn execute(&self, statement: &ExecutableStatement) -> DaoResult<ResultSet> {
    let result = self.run(statement)?;
    if statement.is_conditional() {
      let listener = statement.cas_listener().map(|l| &**l);
      cas::resolve(cas_operation(statement), result.one(), listener)?;
    }
    Ok(result)
  }

  fn run(&self, statement: &ExecutableStatement) -> DaoResult<ResultSet> {
    log::debug!("Execute '{}' at {}", statement.cql(), statement.consistency());
    self.session.execute(statement)
  }

  pub fn prepare(&self, query: Query) -> DaoResult<PreparedStatement> {
    prepared::prepare_query(self.session.as_ref(), query)
  }

  /// Binds `values` positionally, in the statement's marker order.
  pub fn bind(
    &self,
    ps: &PreparedStatement,
    values: Vec<CqlValue>,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ExecutableStatement> {
    self.binder.bind_with_values(ps, values, consistency)
  }

  pub fn bind_and_execute(
    &self,
    ps: &PreparedStatement,
    values: Vec<CqlValue>,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ResultSet> {
    let statement = self.bind(ps, values, consistency)?;
    self.execute(&statement)
  }

  pub fn execute_batch(
    &self,
    statements: &[ExecutableStatement],
    kind: BatchKind,
    consistency: ConsistencyLevel,
  ) -> DaoResult<ResultSet> {
    log::debug!("Execute {:?} batch of {} statements at {}", kind, statements.len(), consistency);
    self.session.execute_batch(statements, kind, consistency)
  }

  // --- Flush ---

  /// Runs everything queued on `ctx`, in queue order.
  ///
  /// Plain statements are grouped into logged batches; each conditional
  /// statement runs on its own and has its outcome resolved. Counter
  /// statements follow as one counter batch. Returns the CAS outcomes in the
  /// order the conditional statements were queued.
  ///
  /// The queue is emptied up front: after an error the statements not yet run
  /// are discarded.
  pub fn flush(&self, ctx: &mut OperationContext<'_>) -> DaoResult<Vec<CasOutcome>> {
    let (statements, counters) = ctx.take_pending();
    log::debug!(
      "Flush '{}' {}: {} statement(s), {} counter statement(s)",
      ctx.entity_type(),
      ctx.primary_key(),
      statements.len(),
      counters.len()
    );

    let mut outcomes = Vec::new();
    let mut plain: Vec<ExecutableStatement> = Vec::new();
    for statement in statements {
      if statement.is_conditional() {
        self.run_grouped(&mut plain, BatchKind::Logged)?;
        let result = self.run(&statement)?;
        let listener = statement.cas_listener().map(|l| &**l);
        outcomes.push(cas::resolve(cas_operation(&statement), result.one(), listener)?);
      } else {
        plain.push(statement);
      }
    }
    self.run_grouped(&mut plain, BatchKind::Logged)?;

    let mut counters = counters;
    self.run_grouped(&mut counters, BatchKind::Counter)?;
    Ok(outcomes)
  }

  fn run_grouped(&self, statements: &mut Vec<ExecutableStatement>, kind: BatchKind) -> DaoResult<()> {
    match statements.len() {
      0 => {}
      1 => {
        self.run(&statements[0])?;
      }
      _ => {
        let consistency = statements[0].consistency();
        self.execute_batch(statements, kind, consistency)?;
      }
    }
    statements.clear();
    Ok(())
  }
}

impl fmt::Debug for DaoContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DaoContext")
      .field("config", &self.config)
      .field("entities", &self.metas.keys().collect::<Vec<_>>())
      .field("fixed_statements", &self.tables.len())
      .field("statement_cache", &self.cache)
      .finish()
  }
}
