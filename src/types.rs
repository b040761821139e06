use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

// --- Consistency Levels ---

/// Replica acknowledgement policy for a read or a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
  Any,
  One,
  Two,
  Three,
  Quorum,
  All,
  LocalQuorum,
  EachQuorum,
  Serial,
  LocalSerial,
  LocalOne,
}

impl ConsistencyLevel {
  pub const ALL_LEVELS: [ConsistencyLevel; 11] = [
    ConsistencyLevel::Any,
    ConsistencyLevel::One,
    ConsistencyLevel::Two,
    ConsistencyLevel::Three,
    ConsistencyLevel::Quorum,
    ConsistencyLevel::All,
    ConsistencyLevel::LocalQuorum,
    ConsistencyLevel::EachQuorum,
    ConsistencyLevel::Serial,
    ConsistencyLevel::LocalSerial,
    ConsistencyLevel::LocalOne,
  ];

  /// Native protocol code sent on the wire.
  pub const fn protocol_code(self) -> u16 {
    match self {
      ConsistencyLevel::Any => 0x0000,
      ConsistencyLevel::One => 0x0001,
      ConsistencyLevel::Two => 0x0002,
      ConsistencyLevel::Three => 0x0003,
      ConsistencyLevel::Quorum => 0x0004,
      ConsistencyLevel::All => 0x0005,
      ConsistencyLevel::LocalQuorum => 0x0006,
      ConsistencyLevel::EachQuorum => 0x0007,
      ConsistencyLevel::Serial => 0x0008,
      ConsistencyLevel::LocalSerial => 0x0009,
      ConsistencyLevel::LocalOne => 0x000A,
    }
  }

  pub fn from_protocol_code(code: u16) -> Option<Self> {
    Self::ALL_LEVELS.iter().copied().find(|level| level.protocol_code() == code)
  }

  pub const fn name(self) -> &'static str {
    match self {
      ConsistencyLevel::Any => "ANY",
      ConsistencyLevel::One => "ONE",
      ConsistencyLevel::Two => "TWO",
      ConsistencyLevel::Three => "THREE",
      ConsistencyLevel::Quorum => "QUORUM",
      ConsistencyLevel::All => "ALL",
      ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
      ConsistencyLevel::EachQuorum => "EACH_QUORUM",
      ConsistencyLevel::Serial => "SERIAL",
      ConsistencyLevel::LocalSerial => "LOCAL_SERIAL",
      ConsistencyLevel::LocalOne => "LOCAL_ONE",
    }
  }
}

impl fmt::Display for ConsistencyLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

// --- Column Values ---

/// A single column value as exchanged with the driver.
///
/// Sets and maps keep their elements in a `Vec`; the store is responsible for
/// uniqueness. Doubles compare and hash by bit pattern so that values can be
/// used structurally (CAS conditions, partition keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CqlValue {
  Null,
  Boolean(bool),
  Int(i32),
  BigInt(i64),
  Counter(i64),
  Double(f64),
  Text(String),
  Blob(Vec<u8>),
  Timestamp(i64),
  List(Vec<CqlValue>),
  Set(Vec<CqlValue>),
  Map(Vec<(CqlValue, CqlValue)>),
}

impl CqlValue {
  pub fn is_null(&self) -> bool {
    matches!(self, CqlValue::Null)
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      CqlValue::BigInt(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => Some(*v),
      CqlValue::Int(v) => Some(i64::from(*v)),
      _ => None,
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      CqlValue::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      CqlValue::Boolean(b) => Some(*b),
      _ => None,
    }
  }

  pub fn list<I, V>(items: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<CqlValue>,
  {
    CqlValue::List(items.into_iter().map(Into::into).collect())
  }

  pub fn set<I, V>(items: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<CqlValue>,
  {
    CqlValue::Set(items.into_iter().map(Into::into).collect())
  }

  pub fn map<I, K, V>(entries: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<CqlValue>,
    V: Into<CqlValue>,
  {
    CqlValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }

  fn discriminant(&self) -> u8 {
    match self {
      CqlValue::Null => 0,
      CqlValue::Boolean(_) => 1,
      CqlValue::Int(_) => 2,
      CqlValue::BigInt(_) => 3,
      CqlValue::Counter(_) => 4,
      CqlValue::Double(_) => 5,
      CqlValue::Text(_) => 6,
      CqlValue::Blob(_) => 7,
      CqlValue::Timestamp(_) => 8,
      CqlValue::List(_) => 9,
      CqlValue::Set(_) => 10,
      CqlValue::Map(_) => 11,
    }
  }
}

impl PartialEq for CqlValue {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (CqlValue::Null, CqlValue::Null) => true,
      (CqlValue::Boolean(a), CqlValue::Boolean(b)) => a == b,
      (CqlValue::Int(a), CqlValue::Int(b)) => a == b,
      (CqlValue::BigInt(a), CqlValue::BigInt(b)) => a == b,
      (CqlValue::Counter(a), CqlValue::Counter(b)) => a == b,
      (CqlValue::Double(a), CqlValue::Double(b)) => a.to_bits() == b.to_bits(),
      (CqlValue::Text(a), CqlValue::Text(b)) => a == b,
      (CqlValue::Blob(a), CqlValue::Blob(b)) => a == b,
      (CqlValue::Timestamp(a), CqlValue::Timestamp(b)) => a == b,
      (CqlValue::List(a), CqlValue::List(b)) => a == b,
      (CqlValue::Set(a), CqlValue::Set(b)) => a == b,
      (CqlValue::Map(a), CqlValue::Map(b)) => a == b,
      _ => false,
    }
  }
}

impl Eq for CqlValue {}

impl Hash for CqlValue {
  fn hash<H: Hasher>(&self, state: &mut H) {
    state.write_u8(self.discriminant());
    match self {
      CqlValue::Null => {}
      CqlValue::Boolean(v) => v.hash(state),
      CqlValue::Int(v) => v.hash(state),
      CqlValue::BigInt(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => v.hash(state),
      CqlValue::Double(v) => v.to_bits().hash(state),
      CqlValue::Text(v) => v.hash(state),
      CqlValue::Blob(v) => v.hash(state),
      CqlValue::List(v) | CqlValue::Set(v) => v.hash(state),
      CqlValue::Map(v) => v.hash(state),
    }
  }
}

impl fmt::Display for CqlValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CqlValue::Null => f.write_str("null"),
      CqlValue::Boolean(v) => write!(f, "{}", v),
      CqlValue::Int(v) => write!(f, "{}", v),
      CqlValue::BigInt(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => write!(f, "{}", v),
      CqlValue::Double(v) => write!(f, "{}", v),
      CqlValue::Text(v) => f.write_str(v),
      CqlValue::Blob(v) => {
        f.write_str("0x")?;
        for b in v {
          write!(f, "{:02x}", b)?;
        }
        Ok(())
      }
      CqlValue::List(items) => write_seq(f, "[", "]", items),
      CqlValue::Set(items) => write_seq(f, "[", "]", items),
      CqlValue::Map(entries) => {
        f.write_str("{")?;
        for (i, (k, v)) in entries.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
      }
    }
  }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, close: &str, items: &[CqlValue]) -> fmt::Result {
  f.write_str(open)?;
  for (i, item) in items.iter().enumerate() {
    if i > 0 {
      f.write_str(", ")?;
    }
    write!(f, "{}", item)?;
  }
  f.write_str(close)
}

impl From<bool> for CqlValue {
  fn from(v: bool) -> Self {
    CqlValue::Boolean(v)
  }
}

impl From<i32> for CqlValue {
  fn from(v: i32) -> Self {
    CqlValue::Int(v)
  }
}

impl From<i64> for CqlValue {
  fn from(v: i64) -> Self {
    CqlValue::BigInt(v)
  }
}

impl From<f64> for CqlValue {
  fn from(v: f64) -> Self {
    CqlValue::Double(v)
  }
}

impl From<&str> for CqlValue {
  fn from(v: &str) -> Self {
    CqlValue::Text(v.to_string())
  }
}

impl From<String> for CqlValue {
  fn from(v: String) -> Self {
    CqlValue::Text(v)
  }
}

impl From<Vec<u8>> for CqlValue {
  fn from(v: Vec<u8>) -> Self {
    CqlValue::Blob(v)
  }
}

/// Enumerated columns are stored by name.
impl From<ConsistencyLevel> for CqlValue {
  fn from(v: ConsistencyLevel) -> Self {
    CqlValue::Text(v.name().to_string())
  }
}

impl<T: Into<CqlValue>> From<Option<T>> for CqlValue {
  fn from(v: Option<T>) -> Self {
    v.map_or(CqlValue::Null, Into::into)
  }
}
