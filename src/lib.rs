//! Statement compilation and execution core for entity persistence over a
//! Cassandra-style column store.
//!
//! Turns "insert this entity", "update these changed fields" or "increment this
//! counter" into bound statements, reusing prepared statements wherever the set
//! of touched columns is stable, resolves consistency levels, and handles
//! conditional (CAS) writes.

extern crate rmp_serde as rmps;

pub mod cas;
pub mod changeset;
pub mod config;
pub mod consistency;
pub mod context;
pub mod dao;
pub mod error;
pub mod memory;
pub mod meta;
pub mod options;
pub mod serialization;
pub mod session;
pub mod statement;
pub mod types;

// --- Re-exports ---
pub use cas::{CasOperation, CasOutcome, CasResult, CasResultListener, APPLIED_COLUMN};
pub use changeset::{CollectionAndMapChangeType, CollectionChange, DirtyCheckChangeSet};
pub use config::DaoConfig;
pub use consistency::ConsistencyOverrider;
pub use context::OperationContext;
pub use dao::DaoContext;
pub use error::{DaoError, DaoResult};
pub use memory::MemorySession;
pub use meta::{EntityMeta, EntityType, EntityValues, PrimaryKey, PropertyKind, PropertyMeta, ValueCodec};
pub use options::{CasCondition, Options, OptionsBuilder};
pub use serialization::{deserialize_value, serialize_value};
pub use session::{BatchKind, PreparedId, ResultSet, Row, Session};
pub use statement::{ExecutableStatement, PreparedStatement};
pub use types::{ConsistencyLevel, CqlValue};
