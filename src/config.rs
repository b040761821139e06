//! Configuration for the statement layer.

use crate::error::{DaoError, DaoResult};
use crate::types::ConsistencyLevel;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default bound of the ad-hoc statement cache.
pub const DEFAULT_STATEMENT_CACHE_SIZE: u64 = 5000;

/// Process-wide settings consumed by [`crate::DaoContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaoConfig {
  /// Maximum number of prepared statements kept for field-subset queries.
  pub statement_cache_size: u64,
  /// Evict cached statements not used for this long.
  pub statement_cache_idle: Option<Duration>,
  pub default_read_consistency: ConsistencyLevel,
  pub default_write_consistency: ConsistencyLevel,
  /// Per-table read defaults, consulted when the entity declares none.
  pub read_consistency_by_table: HashMap<String, ConsistencyLevel>,
  /// Per-table write defaults, consulted when the entity declares none.
  pub write_consistency_by_table: HashMap<String, ConsistencyLevel>,
}

impl Default for DaoConfig {
  fn default() -> Self {
    Self {
      statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
      statement_cache_idle: None,
      default_read_consistency: ConsistencyLevel::One,
      default_write_consistency: ConsistencyLevel::One,
      read_consistency_by_table: HashMap::new(),
      write_consistency_by_table: HashMap::new(),
    }
  }
}

impl DaoConfig {
  pub fn validate(&self) -> DaoResult<()> {
    if self.statement_cache_size == 0 {
      return Err(DaoError::InvalidConfiguration(
        "statement_cache_size must be greater than zero".to_string(),
      ));
    }
    if let Some(idle) = self.statement_cache_idle {
      if idle.is_zero() {
        return Err(DaoError::InvalidConfiguration(
          "statement_cache_idle must be greater than zero when set".to_string(),
        ));
      }
    }
    let serial_write = [&self.default_write_consistency]
      .into_iter()
      .chain(self.write_consistency_by_table.values())
      .find(|level| matches!(level, ConsistencyLevel::Serial | ConsistencyLevel::LocalSerial));
    if let Some(level) = serial_write {
      return Err(DaoError::InvalidConfiguration(format!(
        "{} is a serial consistency and cannot be used as a write level",
        level
      )));
    }
    Ok(())
  }
}
