//! Structured CQL statements with named bind markers.
//!
//! A [`Query`] keeps its bind markers in *bind order*: the order in which the
//! builder was told about them, which is also the order of the value sequence
//! bound to it. CQL text uses named markers, so bind order is free to differ
//! from the textual position of each marker (`USING TTL` precedes `SET` in an
//! update, yet its value is bound after the assigned columns).

use std::fmt::{self, Write as _};

/// Marker names of the `USING` clause. Entity columns may not take these names.
pub const USING_TTL_MARKER: &str = "using_ttl";
pub const USING_TIMESTAMP_MARKER: &str = "using_timestamp";
/// Prefix of IF-condition marker names.
pub const CONDITION_MARKER_PREFIX: &str = "if_";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerTarget {
  /// Value written to (or delta applied to) a column.
  Column(String),
  /// Primary key component in the WHERE clause.
  Key(String),
  /// Expected value of an IF condition.
  Condition(String),
  Ttl,
  Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindMarker {
  target: MarkerTarget,
}

impl BindMarker {
  pub fn new(target: MarkerTarget) -> Self {
    Self { target }
  }

  pub fn target(&self) -> &MarkerTarget {
    &self.target
  }

  /// Name used in the CQL text (`:name`).
  pub fn name(&self) -> String {
    match &self.target {
      MarkerTarget::Column(c) | MarkerTarget::Key(c) => c.clone(),
      MarkerTarget::Condition(c) => format!("{}{}", CONDITION_MARKER_PREFIX, c),
      MarkerTarget::Ttl => USING_TTL_MARKER.to_string(),
      MarkerTarget::Timestamp => USING_TIMESTAMP_MARKER.to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
  /// `c = :c`
  Assign,
  /// `c = c + :c` (append, add elements, put entries, increment)
  Add,
  /// `c = c - :c` (remove elements or keys, decrement)
  Subtract,
  /// `c = :c + c`
  Prepend,
  /// `c[i] = :c`
  AssignAtIndex(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment {
  pub column: String,
  pub op: AssignOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selection {
  All,
  Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKind {
  Insert { columns: Vec<String>, if_not_exists: bool },
  Update { assignments: Vec<Assignment>, conditions: Vec<String> },
  Select { selection: Selection },
  Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Using {
  pub ttl: bool,
  pub timestamp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
  table: String,
  kind: QueryKind,
  key_columns: Vec<String>,
  using: Using,
  markers: Vec<BindMarker>,
}

impl Query {
  pub fn table(&self) -> &str {
    &self.table
  }

  pub fn kind(&self) -> &QueryKind {
    &self.kind
  }

  pub fn key_columns(&self) -> &[String] {
    &self.key_columns
  }

  pub fn using(&self) -> Using {
    self.using
  }

  pub fn markers(&self) -> &[BindMarker] {
    &self.markers
  }

  pub fn is_insert(&self) -> bool {
    matches!(self.kind, QueryKind::Insert { .. })
  }

  /// Whether the store evaluates this statement as a lightweight transaction.
  pub fn is_conditional(&self) -> bool {
    match &self.kind {
      QueryKind::Insert { if_not_exists, .. } => *if_not_exists,
      QueryKind::Update { conditions, .. } => !conditions.is_empty(),
      _ => false,
    }
  }

  /// Columns written by an insert or assigned by an update.
  pub fn written_columns(&self) -> Vec<&str> {
    match &self.kind {
      QueryKind::Insert { columns, .. } => columns.iter().map(String::as_str).collect(),
      QueryKind::Update { assignments, .. } => assignments.iter().map(|a| a.column.as_str()).collect(),
      _ => Vec::new(),
    }
  }

  pub fn condition_columns(&self) -> &[String] {
    match &self.kind {
      QueryKind::Update { conditions, .. } => conditions,
      _ => &[],
    }
  }

  pub fn cql(&self) -> String {
    self.to_string()
  }

  fn write_where(&self, out: &mut String) -> fmt::Result {
    if self.key_columns.is_empty() {
      return Ok(());
    }
    out.push_str(" WHERE ");
    for (i, column) in self.key_columns.iter().enumerate() {
      if i > 0 {
        out.push_str(" AND ");
      }
      write!(out, "{} = :{}", column, BindMarker::new(MarkerTarget::Key(column.clone())).name())?;
    }
    Ok(())
  }

  fn write_using(&self, out: &mut String) -> fmt::Result {
    match (self.using.ttl, self.using.timestamp) {
      (true, true) => write!(out, " USING TTL :{} AND TIMESTAMP :{}", USING_TTL_MARKER, USING_TIMESTAMP_MARKER),
      (true, false) => write!(out, " USING TTL :{}", USING_TTL_MARKER),
      (false, true) => write!(out, " USING TIMESTAMP :{}", USING_TIMESTAMP_MARKER),
      (false, false) => Ok(()),
    }
  }
}

impl fmt::Display for Query {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut out = String::new();
    match &self.kind {
      QueryKind::Insert { columns, if_not_exists } => {
        let names: Vec<String> = columns
          .iter()
          .map(|c| format!(":{}", BindMarker::new(MarkerTarget::Column(c.clone())).name()))
          .collect();
        write!(out, "INSERT INTO {} ({}) VALUES ({})", self.table, columns.join(", "), names.join(", "))?;
        if *if_not_exists {
          out.push_str(" IF NOT EXISTS");
        }
        self.write_using(&mut out)?;
      }
      QueryKind::Update { assignments, conditions } => {
        write!(out, "UPDATE {}", self.table)?;
        self.write_using(&mut out)?;
        out.push_str(" SET ");
        for (i, a) in assignments.iter().enumerate() {
          if i > 0 {
            out.push_str(", ");
          }
          let marker = BindMarker::new(MarkerTarget::Column(a.column.clone())).name();
          match a.op {
            AssignOp::Assign => write!(out, "{c} = :{m}", c = a.column, m = marker)?,
            AssignOp::Add => write!(out, "{c} = {c} + :{m}", c = a.column, m = marker)?,
            AssignOp::Subtract => write!(out, "{c} = {c} - :{m}", c = a.column, m = marker)?,
            AssignOp::Prepend => write!(out, "{c} = :{m} + {c}", c = a.column, m = marker)?,
            AssignOp::AssignAtIndex(idx) => write!(out, "{c}[{i}] = :{m}", c = a.column, i = idx, m = marker)?,
          }
        }
        self.write_where(&mut out)?;
        if !conditions.is_empty() {
          out.push_str(" IF ");
          for (i, c) in conditions.iter().enumerate() {
            if i > 0 {
              out.push_str(" AND ");
            }
            write!(out, "{} = :{}", c, BindMarker::new(MarkerTarget::Condition(c.clone())).name())?;
          }
        }
      }
      QueryKind::Select { selection } => {
        match selection {
          Selection::All => write!(out, "SELECT * FROM {}", self.table)?,
          Selection::Columns(columns) => write!(out, "SELECT {} FROM {}", columns.join(", "), self.table)?,
        }
        self.write_where(&mut out)?;
      }
      QueryKind::Delete => {
        write!(out, "DELETE FROM {}", self.table)?;
        self.write_using(&mut out)?;
        self.write_where(&mut out)?;
      }
    }
    f.write_str(&out)
  }
}

/// Accumulates clauses and their bind markers in bind order.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
  table: String,
  kind: QueryKind,
  key_columns: Vec<String>,
  using: Using,
  markers: Vec<BindMarker>,
}

impl QueryBuilder {
  fn new(table: impl Into<String>, kind: QueryKind) -> Self {
    Self {
      table: table.into(),
      kind,
      key_columns: Vec::new(),
      using: Using::default(),
      markers: Vec::new(),
    }
  }

  /// Insert into `table`. Key columns are written like any other value, so
  /// they are only recorded here to identify the row.
  pub fn insert(table: impl Into<String>, key_columns: Vec<String>) -> Self {
    let mut builder = Self::new(
      table,
      QueryKind::Insert {
        columns: Vec::new(),
        if_not_exists: false,
      },
    );
    builder.key_columns = key_columns;
    builder
  }

  pub fn update(table: impl Into<String>) -> Self {
    Self::new(
      table,
      QueryKind::Update {
        assignments: Vec::new(),
        conditions: Vec::new(),
      },
    )
  }

  pub fn select(table: impl Into<String>, selection: Selection) -> Self {
    Self::new(table, QueryKind::Select { selection })
  }

  pub fn delete(table: impl Into<String>) -> Self {
    Self::new(table, QueryKind::Delete)
  }

  pub fn value(mut self, column: impl Into<String>) -> Self {
    let column = column.into();
    if let QueryKind::Insert { columns, .. } = &mut self.kind {
      columns.push(column.clone());
      self.markers.push(BindMarker::new(MarkerTarget::Column(column)));
    }
    self
  }

  pub fn if_not_exists(mut self) -> Self {
    if let QueryKind::Insert { if_not_exists, .. } = &mut self.kind {
      *if_not_exists = true;
    }
    self
  }

  pub fn assign(mut self, column: impl Into<String>, op: AssignOp) -> Self {
    let column = column.into();
    if let QueryKind::Update { assignments, .. } = &mut self.kind {
      assignments.push(Assignment {
        column: column.clone(),
        op,
      });
      self.markers.push(BindMarker::new(MarkerTarget::Column(column)));
    }
    self
  }

  pub fn where_key(mut self, column: impl Into<String>) -> Self {
    let column = column.into();
    self.key_columns.push(column.clone());
    self.markers.push(BindMarker::new(MarkerTarget::Key(column)));
    self
  }

  pub fn where_keys<I, S>(self, columns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    columns.into_iter().fold(self, |b, c| b.where_key(c))
  }

  pub fn condition(mut self, column: impl Into<String>) -> Self {
    let column = column.into();
    if let QueryKind::Update { conditions, .. } = &mut self.kind {
      conditions.push(column.clone());
      self.markers.push(BindMarker::new(MarkerTarget::Condition(column)));
    }
    self
  }

  pub fn using_ttl(mut self) -> Self {
    if !self.using.ttl {
      self.using.ttl = true;
      self.markers.push(BindMarker::new(MarkerTarget::Ttl));
    }
    self
  }

  pub fn using_timestamp(mut self) -> Self {
    if !self.using.timestamp {
      self.using.timestamp = true;
      self.markers.push(BindMarker::new(MarkerTarget::Timestamp));
    }
    self
  }

  pub fn build(self) -> Query {
    Query {
      table: self.table,
      kind: self.kind,
      key_columns: self.key_columns,
      using: self.using,
      markers: self.markers,
    }
  }
}
