use crate::cas::CasResult;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DaoError {
  #[error("{0}")]
  CasConflict(CasResult),

  #[error("Prepared statement not configured: {0}")]
  CacheConfiguration(String),

  #[error("Statement binding failed: {0}")]
  Binding(String),

  #[error("Driver operation failed: {0}")]
  Driver(Arc<dyn std::error::Error + Send + Sync>),

  #[error("Serialization failed: {0}")]
  Serialization(String),

  #[error("Deserialization failed: {0}")]
  Deserialization(String),

  #[error("Invalid configuration: {0}")]
  InvalidConfiguration(String),

  #[error("Operation failed: {0}")]
  Other(String),
}

impl DaoError {
  /// Wraps an error raised by the underlying driver. Driver errors are passed
  /// through to the caller untouched; this layer never retries them.
  pub fn driver<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Driver(Arc::new(err))
  }

  /// Returns the conflict snapshot when this error is a rejected CAS write.
  pub fn cas_result(&self) -> Option<&CasResult> {
    match self {
      Self::CasConflict(result) => Some(result),
      _ => None,
    }
  }
}

// Helper type alias
pub type DaoResult<T> = Result<T, DaoError>;
