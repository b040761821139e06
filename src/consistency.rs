//! Effective consistency level resolution.

use crate::config::DaoConfig;
use crate::meta::{EntityMeta, PropertyMeta};
use crate::options::Options;
use crate::types::ConsistencyLevel;

use std::collections::HashMap;

/// Picks the consistency level of an operation. First match wins:
/// the call's [`Options`], the property default, the entity default, the
/// per-table default, then the process default.
#[derive(Debug, Clone)]
pub struct ConsistencyOverrider {
  default_read: ConsistencyLevel,
  default_write: ConsistencyLevel,
  read_by_table: HashMap<String, ConsistencyLevel>,
  write_by_table: HashMap<String, ConsistencyLevel>,
}

impl Default for ConsistencyOverrider {
  fn default() -> Self {
    Self::from_config(&DaoConfig::default())
  }
}

impl ConsistencyOverrider {
  pub fn from_config(config: &DaoConfig) -> Self {
    Self {
      default_read: config.default_read_consistency,
      default_write: config.default_write_consistency,
      read_by_table: config.read_consistency_by_table.clone(),
      write_by_table: config.write_consistency_by_table.clone(),
    }
  }

  pub fn write_level(
    &self,
    options: &Options,
    entity_meta: &EntityMeta,
    property: Option<&PropertyMeta>,
  ) -> ConsistencyLevel {
    options
      .consistency_level()
      .or_else(|| property.and_then(PropertyMeta::write_consistency))
      .or_else(|| entity_meta.write_consistency())
      .or_else(|| self.write_by_table.get(entity_meta.table()).copied())
      .unwrap_or(self.default_write)
  }

  pub fn read_level(
    &self,
    options: &Options,
    entity_meta: &EntityMeta,
    property: Option<&PropertyMeta>,
  ) -> ConsistencyLevel {
    options
      .consistency_level()
      .or_else(|| property.and_then(PropertyMeta::read_consistency))
      .or_else(|| entity_meta.read_consistency())
      .or_else(|| self.read_by_table.get(entity_meta.table()).copied())
      .unwrap_or(self.default_read)
  }
}
