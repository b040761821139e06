use crate::error::{DaoError, DaoResult};
use crate::types::CqlValue;
use rmps::{Deserializer, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

// --- Value Serialization (MessagePack) ---

#[inline]
pub fn serialize_value<Val>(val: &Val) -> DaoResult<Vec<u8>>
where
  Val: Serialize,
{
  let mut serialized_value = Vec::new();
  match val.serialize(&mut Serializer::new(&mut serialized_value).with_struct_map()) {
    Ok(_) => Ok(serialized_value),
    Err(e) => Err(DaoError::Serialization(e.to_string())),
  }
}

#[inline]
pub fn deserialize_value<Val>(bytes: &[u8]) -> DaoResult<Val>
where
  Val: for<'de> Deserialize<'de> + Debug,
{
  match Deserialize::deserialize(&mut Deserializer::new(bytes)) {
    Ok(content) => Ok(content),
    Err(e) => Err(DaoError::Deserialization(e.to_string())),
  }
}

// --- Column Encodings ---

/// Packs a value into the blob form used by `Packed` columns.
pub fn pack_value(value: &CqlValue) -> DaoResult<CqlValue> {
  serialize_value(value).map(CqlValue::Blob)
}

pub fn unpack_value(value: &CqlValue) -> DaoResult<CqlValue> {
  match value {
    CqlValue::Blob(bytes) => deserialize_value(bytes),
    CqlValue::Null => Ok(CqlValue::Null),
    other => Err(DaoError::Deserialization(format!(
      "Expected a packed blob, found '{}'",
      other
    ))),
  }
}

/// Encodes a primary key tuple for storage in the shared simple-counter table,
/// where keys of every entity type share a single blob column.
pub fn encode_primary_key(components: &[CqlValue]) -> DaoResult<CqlValue> {
  serialize_value(&components).map(CqlValue::Blob)
}

pub fn decode_primary_key(encoded: &CqlValue) -> DaoResult<Vec<CqlValue>> {
  match encoded {
    CqlValue::Blob(bytes) => deserialize_value(bytes),
    other => Err(DaoError::Deserialization(format!(
      "Expected an encoded primary key blob, found '{}'",
      other
    ))),
  }
}
