//! Read-only entity and property descriptors.
//!
//! These tables are produced by the metadata layer (outside this crate) and
//! handed in as plain data. Nothing here inspects entity instances beyond
//! asking an [`EntityValues`] implementation for a named value.

use crate::error::{DaoError, DaoResult};
use crate::options::CasCondition;
use crate::serialization;
use crate::session::Row;
use crate::statement::query::{CONDITION_MARKER_PREFIX, USING_TIMESTAMP_MARKER, USING_TTL_MARKER};
use crate::types::{ConsistencyLevel, CqlValue};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Identity of an entity type. Plays the role of a class handle in lookup tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityType(Arc<str>);

impl EntityType {
  pub fn new(name: impl AsRef<str>) -> Self {
    EntityType(Arc::from(name.as_ref()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
  /// Partition key component.
  PartitionKey,
  /// Clustering column, part of the primary key.
  ClusteringKey,
  Simple,
  List,
  Set,
  Map,
  Counter,
}

impl PropertyKind {
  pub fn is_key(self) -> bool {
    matches!(self, PropertyKind::PartitionKey | PropertyKind::ClusteringKey)
  }

  pub fn is_collection(self) -> bool {
    matches!(self, PropertyKind::List | PropertyKind::Set | PropertyKind::Map)
  }
}

/// How a property's values are represented in its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueCodec {
  /// Stored as the driver's native type.
  #[default]
  Native,
  /// Stored as a MessagePack blob.
  Packed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMeta {
  name: String,
  column: String,
  kind: PropertyKind,
  codec: ValueCodec,
  read_consistency: Option<ConsistencyLevel>,
  write_consistency: Option<ConsistencyLevel>,
}

impl PropertyMeta {
  pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
    let name = name.into();
    Self {
      column: name.clone(),
      name,
      kind,
      codec: ValueCodec::Native,
      read_consistency: None,
      write_consistency: None,
    }
  }

  pub fn with_column(mut self, column: impl Into<String>) -> Self {
    self.column = column.into();
    self
  }

  pub fn with_codec(mut self, codec: ValueCodec) -> Self {
    self.codec = codec;
    self
  }

  pub fn with_consistency(mut self, read: Option<ConsistencyLevel>, write: Option<ConsistencyLevel>) -> Self {
    self.read_consistency = read;
    self.write_consistency = write;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn column(&self) -> &str {
    &self.column
  }

  pub fn kind(&self) -> PropertyKind {
    self.kind
  }

  pub fn codec(&self) -> ValueCodec {
    self.codec
  }

  pub fn read_consistency(&self) -> Option<ConsistencyLevel> {
    self.read_consistency
  }

  pub fn write_consistency(&self) -> Option<ConsistencyLevel> {
    self.write_consistency
  }

  pub fn is_counter(&self) -> bool {
    self.kind == PropertyKind::Counter
  }

  /// Converts a raw value into its column representation.
  pub fn encode(&self, value: &CqlValue) -> DaoResult<CqlValue> {
    match self.codec {
      ValueCodec::Native => Ok(value.clone()),
      ValueCodec::Packed if value.is_null() => Ok(CqlValue::Null),
      ValueCodec::Packed => serialization::pack_value(value),
    }
  }
}

/// Source of property values for one entity instance.
pub trait EntityValues {
  fn value_of(&self, property: &str) -> Option<CqlValue>;
}

impl EntityValues for BTreeMap<String, CqlValue> {
  fn value_of(&self, property: &str) -> Option<CqlValue> {
    self.get(property).cloned()
  }
}

impl EntityValues for HashMap<String, CqlValue> {
  fn value_of(&self, property: &str) -> Option<CqlValue> {
    self.get(property).cloned()
  }
}

impl EntityValues for Row {
  fn value_of(&self, property: &str) -> Option<CqlValue> {
    self.get(property).cloned()
  }
}

/// Ordered primary key tuple, one component per key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey(Vec<CqlValue>);

impl PrimaryKey {
  pub fn new(components: Vec<CqlValue>) -> Self {
    PrimaryKey(components)
  }

  pub fn components(&self) -> &[CqlValue] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for PrimaryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("(")?;
    for (i, c) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{}", c)?;
    }
    f.write_str(")")
  }
}

/// Descriptor of one entity type and the tables it maps to.
#[derive(Debug, Clone)]
pub struct EntityMeta {
  entity_type: EntityType,
  table: String,
  /// Further tables keyed by the same primary key, e.g. denormalized views.
  extra_tables: Vec<String>,
  properties: Vec<Arc<PropertyMeta>>,
  read_consistency: Option<ConsistencyLevel>,
  write_consistency: Option<ConsistencyLevel>,
}

impl EntityMeta {
  pub fn builder(entity_type: impl AsRef<str>, table: impl Into<String>) -> EntityMetaBuilder {
    EntityMetaBuilder {
      entity_type: EntityType::new(entity_type),
      table: table.into(),
      extra_tables: Vec::new(),
      properties: Vec::new(),
      read_consistency: None,
      write_consistency: None,
    }
  }

  pub fn entity_type(&self) -> &EntityType {
    &self.entity_type
  }

  pub fn table(&self) -> &str {
    &self.table
  }

  /// Main table first, then the extra tables in declaration order.
  pub fn tables(&self) -> impl Iterator<Item = &str> {
    std::iter::once(self.table.as_str()).chain(self.extra_tables.iter().map(String::as_str))
  }

  pub fn read_consistency(&self) -> Option<ConsistencyLevel> {
    self.read_consistency
  }

  pub fn write_consistency(&self) -> Option<ConsistencyLevel> {
    self.write_consistency
  }

  pub fn properties(&self) -> &[Arc<PropertyMeta>] {
    &self.properties
  }

  pub fn property(&self, name: &str) -> Option<&Arc<PropertyMeta>> {
    self.properties.iter().find(|pm| pm.name() == name)
  }

  pub fn property_by_column(&self, column: &str) -> Option<&Arc<PropertyMeta>> {
    self.properties.iter().find(|pm| pm.column() == column)
  }

  /// Key columns: partition components first, then clustering columns.
  pub fn key_properties(&self) -> impl Iterator<Item = &Arc<PropertyMeta>> {
    let partition = self.properties.iter().filter(|pm| pm.kind() == PropertyKind::PartitionKey);
    let clustering = self.properties.iter().filter(|pm| pm.kind() == PropertyKind::ClusteringKey);
    partition.chain(clustering)
  }

  pub fn key_columns(&self) -> Vec<String> {
    self.key_properties().map(|pm| pm.column().to_string()).collect()
  }

  /// Non-key, non-counter properties.
  pub fn value_properties(&self) -> impl Iterator<Item = &Arc<PropertyMeta>> {
    self
      .properties
      .iter()
      .filter(|pm| !pm.kind().is_key() && !pm.is_counter())
  }

  pub fn counter_properties(&self) -> impl Iterator<Item = &Arc<PropertyMeta>> {
    self.properties.iter().filter(|pm| pm.is_counter())
  }

  /// A clustered counter entity has clustering columns in its primary key and
  /// only counters outside it. It lives in its own table, unlike simple
  /// counters kept in the shared table.
  pub fn is_clustered_counter(&self) -> bool {
    self.properties.iter().any(|pm| pm.kind() == PropertyKind::ClusteringKey)
      && self.counter_properties().next().is_some()
      && self.value_properties().next().is_none()
  }

  pub fn has_simple_counters(&self) -> bool {
    self.counter_properties().next().is_some() && !self.is_clustered_counter()
  }

  /// Reads the primary key out of an entity instance.
  pub fn primary_key_of(&self, entity: &dyn EntityValues) -> DaoResult<PrimaryKey> {
    let mut components = Vec::new();
    for pm in self.key_properties() {
      match entity.value_of(pm.name()) {
        Some(value) if !value.is_null() => components.push(pm.encode(&value)?),
        _ => {
          return Err(DaoError::Binding(format!(
            "Entity '{}' has no value for primary key component '{}'",
            self.entity_type,
            pm.name()
          )))
        }
      }
    }
    Ok(PrimaryKey::new(components))
  }

  /// Value of a property in its column representation, `Null` when absent.
  pub fn encoded_value_of(&self, pm: &PropertyMeta, entity: &dyn EntityValues) -> DaoResult<CqlValue> {
    match entity.value_of(pm.name()) {
      Some(value) => pm.encode(&value),
      None => Ok(CqlValue::Null),
    }
  }

  /// Encodes a CAS condition value with the codec of the property owning the
  /// condition column. Conditions on unknown columns keep their raw value.
  pub fn encode_cas_condition(&self, condition: &CasCondition) -> DaoResult<()> {
    match self.property_by_column(condition.column()) {
      Some(pm) => condition.encode_with(|raw| pm.encode(raw)).map(|_| ()),
      None => condition.encode_with(|raw| Ok(raw.clone())).map(|_| ()),
    }
  }
}

pub struct EntityMetaBuilder {
  entity_type: EntityType,
  table: String,
  extra_tables: Vec<String>,
  properties: Vec<Arc<PropertyMeta>>,
  read_consistency: Option<ConsistencyLevel>,
  write_consistency: Option<ConsistencyLevel>,
}

impl EntityMetaBuilder {
  pub fn property(mut self, pm: PropertyMeta) -> Self {
    self.properties.push(Arc::new(pm));
    self
  }

  pub fn partition_key(self, name: impl Into<String>) -> Self {
    self.property(PropertyMeta::new(name, PropertyKind::PartitionKey))
  }

  pub fn clustering_key(self, name: impl Into<String>) -> Self {
    self.property(PropertyMeta::new(name, PropertyKind::ClusteringKey))
  }

  pub fn simple(self, name: impl Into<String>) -> Self {
    self.property(PropertyMeta::new(name, PropertyKind::Simple))
  }

  pub fn list(self, name: impl Into<String>) -> Self {
    self.property(PropertyMeta::new(name, PropertyKind::List))
  }

  pub fn set(self, name: impl Into<String>) -> Self {
    self.property(PropertyMeta::new(name, PropertyKind::Set))
  }

  pub fn map(self, name: impl Into<String>) -> Self {
    self.property(PropertyMeta::new(name, PropertyKind::Map))
  }

  pub fn counter(self, name: impl Into<String>) -> Self {
    self.property(PropertyMeta::new(name, PropertyKind::Counter))
  }

  /// Declares another table holding rows of this entity under the same key.
  pub fn extra_table(mut self, table: impl Into<String>) -> Self {
    self.extra_tables.push(table.into());
    self
  }

  pub fn consistency(mut self, read: Option<ConsistencyLevel>, write: Option<ConsistencyLevel>) -> Self {
    self.read_consistency = read;
    self.write_consistency = write;
    self
  }

  pub fn build(self) -> DaoResult<EntityMeta> {
    if !self.properties.iter().any(|pm| pm.kind() == PropertyKind::PartitionKey) {
      return Err(DaoError::InvalidConfiguration(format!(
        "Entity '{}' declares no partition key",
        self.entity_type
      )));
    }
    let mut seen = HashSet::new();
    for pm in &self.properties {
      if !seen.insert(pm.column()) {
        return Err(DaoError::InvalidConfiguration(format!(
          "Entity '{}' maps column '{}' more than once",
          self.entity_type,
          pm.column()
        )));
      }
    }
    // Column names double as bind marker names.
    for pm in &self.properties {
      let column = pm.column();
      let shadows_condition = column
        .strip_prefix(CONDITION_MARKER_PREFIX)
        .map_or(false, |rest| seen.contains(rest));
      if column == USING_TTL_MARKER || column == USING_TIMESTAMP_MARKER || shadows_condition {
        return Err(DaoError::InvalidConfiguration(format!(
          "Entity '{}' column '{}' clashes with a reserved bind marker name",
          self.entity_type, column
        )));
      }
    }
    let mut tables = HashSet::new();
    tables.insert(self.table.as_str());
    for table in &self.extra_tables {
      if !tables.insert(table.as_str()) {
        return Err(DaoError::InvalidConfiguration(format!(
          "Entity '{}' maps table '{}' more than once",
          self.entity_type, table
        )));
      }
    }
    Ok(EntityMeta {
      entity_type: self.entity_type,
      table: self.table,
      extra_tables: self.extra_tables,
      properties: self.properties,
      read_consistency: self.read_consistency,
      write_consistency: self.write_consistency,
    })
  }
}
