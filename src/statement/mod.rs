//! Statement construction, caching and binding.

pub mod binder;
pub mod cache;
pub mod generator;
pub mod prepared;
pub mod query;

use crate::cas::CasResultListener;
use crate::session::PreparedId;
use crate::types::{ConsistencyLevel, CqlValue};

use std::fmt::{self, Debug};
use std::sync::Arc;

pub use binder::PreparedStatementBinder;
pub use cache::{CacheType, StatementCache, StatementCacheKey};
pub use generator::{GeneratedStatement, StatementGenerator};
pub use prepared::{CounterQueryKind, CounterStatementKey, CounterTarget, PreparedStatementTables};
pub use query::{AssignOp, BindMarker, MarkerTarget, Query, QueryBuilder, QueryKind, Selection};

/// A statement prepared on the server. Clones share the same handle;
/// [`PreparedStatement::same_as`] compares handle identity.
#[derive(Clone)]
pub struct PreparedStatement {
  inner: Arc<PreparedInner>,
}

struct PreparedInner {
  id: PreparedId,
  query: Arc<Query>,
  cql: String,
}

impl PreparedStatement {
  pub fn new(id: PreparedId, query: Query) -> Self {
    let cql = query.cql();
    Self {
      inner: Arc::new(PreparedInner {
        id,
        query: Arc::new(query),
        cql,
      }),
    }
  }

  pub fn id(&self) -> &PreparedId {
    &self.inner.id
  }

  pub fn query(&self) -> &Arc<Query> {
    &self.inner.query
  }

  pub fn cql(&self) -> &str {
    &self.inner.cql
  }

  pub fn same_as(&self, other: &PreparedStatement) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl Debug for PreparedStatement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PreparedStatement")
      .field("id", &self.inner.id)
      .field("cql", &self.inner.cql)
      .finish()
  }
}

/// A statement ready to be sent: either a bound prepared statement or a
/// freshly generated one together with its values.
#[derive(Clone)]
pub struct ExecutableStatement {
  query: Arc<Query>,
  cql: String,
  prepared_id: Option<PreparedId>,
  values: Vec<CqlValue>,
  consistency: ConsistencyLevel,
  cas_listener: Option<Arc<dyn CasResultListener>>,
}

impl ExecutableStatement {
  /// Values must already follow the marker order of `prepared`.
  pub(crate) fn bound(prepared: &PreparedStatement, values: Vec<CqlValue>, consistency: ConsistencyLevel) -> Self {
    Self {
      query: Arc::clone(prepared.query()),
      cql: prepared.cql().to_string(),
      prepared_id: Some(prepared.id().clone()),
      values,
      consistency,
      cas_listener: None,
    }
  }

  pub(crate) fn regular(
    query: Query,
    values: Vec<CqlValue>,
    consistency: ConsistencyLevel,
    cas_listener: Option<Arc<dyn CasResultListener>>,
  ) -> Self {
    let cql = query.cql();
    Self {
      query: Arc::new(query),
      cql,
      prepared_id: None,
      values,
      consistency,
      cas_listener,
    }
  }

  /// Routes the outcome of a conditional statement to `listener` instead of
  /// failing with a conflict error.
  pub fn with_cas_listener(mut self, listener: Arc<dyn CasResultListener>) -> Self {
    self.cas_listener = Some(listener);
    self
  }

  pub fn query(&self) -> &Query {
    &self.query
  }

  pub fn cql(&self) -> &str {
    &self.cql
  }

  pub fn prepared_id(&self) -> Option<&PreparedId> {
    self.prepared_id.as_ref()
  }

  pub fn is_prepared(&self) -> bool {
    self.prepared_id.is_some()
  }

  pub fn values(&self) -> &[CqlValue] {
    &self.values
  }

  /// Values paired with the marker they bind to.
  pub fn named_values(&self) -> impl Iterator<Item = (&BindMarker, &CqlValue)> {
    self.query.markers().iter().zip(self.values.iter())
  }

  pub fn consistency(&self) -> ConsistencyLevel {
    self.consistency
  }

  pub fn is_conditional(&self) -> bool {
    self.query.is_conditional()
  }

  pub fn cas_listener(&self) -> Option<&Arc<dyn CasResultListener>> {
    self.cas_listener.as_ref()
  }
}

impl Debug for ExecutableStatement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutableStatement")
      .field("cql", &self.cql)
      .field("values", &self.values)
      .field("consistency", &self.consistency)
      .field("prepared", &self.prepared_id.is_some())
      .field("cas_listener_is_some", &self.cas_listener.is_some())
      .finish()
  }
}
