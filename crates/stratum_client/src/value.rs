//! Runtime value representation and column type identifiers.
//!
//! `Value` is the tagged union stored in record fields; `ColumnType` is the
//! wire-level type id carried by schema columns. The two deliberately do not
//! coerce into each other: the codec checks the runtime tag against the
//! declared column type and fails on disagreement instead of converting.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Column type identifiers as published by the cluster in schema definitions.
///
/// Ids outside the supported set are preserved in `Other` so a schema can be
/// cached as observed; serialization of such a column fails with
/// [`Error::TypeUnsupported`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Uuid,
    String,
    Binary,
    /// A type id this client does not understand.
    Other(i32),
}

impl ColumnType {
    /// Decode a wire type id. Unknown ids are preserved, not rejected.
    pub fn from_id(id: i32) -> ColumnType {
        match id {
            1 => ColumnType::Int8,
            2 => ColumnType::Int16,
            3 => ColumnType::Int32,
            4 => ColumnType::Int64,
            5 => ColumnType::Float,
            6 => ColumnType::Double,
            7 => ColumnType::Uuid,
            8 => ColumnType::String,
            9 => ColumnType::Binary,
            other => ColumnType::Other(other),
        }
    }

    /// The wire type id for this column type.
    pub fn id(self) -> i32 {
        match self {
            ColumnType::Int8 => 1,
            ColumnType::Int16 => 2,
            ColumnType::Int32 => 3,
            ColumnType::Int64 => 4,
            ColumnType::Float => 5,
            ColumnType::Double => 6,
            ColumnType::Uuid => 7,
            ColumnType::String => 8,
            ColumnType::Binary => 9,
            ColumnType::Other(id) => id,
        }
    }

    /// Human-readable name used in error messages.
    pub fn type_name(self) -> &'static str {
        match self {
            ColumnType::Int8 => "int8",
            ColumnType::Int16 => "int16",
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Uuid => "uuid",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Other(_) => "unsupported",
        }
    }
}

/// A single field value inside a record.
///
/// `Null` is an explicit null payload; "the record has no such field" is
/// expressed by the field being absent from the record entirely, which is
/// what the no-value bitset reports to the server.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Uuid(Uuid),
    String(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Runtime tag name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Uuid(_) => "uuid",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Binary(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Value {
        Value::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Value {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Value {
        Value::Uuid(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::Binary(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Value {
        Value::Binary(v.to_vec())
    }
}

/// Typed extraction from a [`Value`], used by the record's `get` accessor.
pub trait FromValue: Sized {
    fn from_value(column: &str, value: &Value) -> Result<Self>;
}

fn mismatch(column: &str, expected: &'static str, value: &Value) -> Error {
    Error::TypeMismatch {
        column: column.to_owned(),
        expected,
        actual: value.type_name(),
    }
}

macro_rules! impl_from_value {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl FromValue for $ty {
            fn from_value(column: &str, value: &Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(v.clone()),
                    other => Err(mismatch(column, $name, other)),
                }
            }
        }
    };
}

impl_from_value!(i8, Int8, "int8");
impl_from_value!(i16, Int16, "int16");
impl_from_value!(i32, Int32, "int32");
impl_from_value!(i64, Int64, "int64");
impl_from_value!(f32, Float, "float");
impl_from_value!(f64, Double, "double");
impl_from_value!(Uuid, Uuid, "uuid");
impl_from_value!(String, String, "string");
impl_from_value!(Vec<u8>, Binary, "binary");

/// `Option<T>` maps `Null` to `None` and otherwise defers to `T`.
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(column: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(column, other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_type_ids_round_trip() {
        for id in 1..=9 {
            assert_eq!(ColumnType::from_id(id).id(), id);
        }
        assert_eq!(ColumnType::from_id(42), ColumnType::Other(42));
        assert_eq!(ColumnType::Other(42).id(), 42);
    }

    #[test]
    fn typed_extraction_checks_the_tag() {
        let value = Value::Int64(7);
        assert_eq!(i64::from_value("id", &value).unwrap(), 7);
        let err = String::from_value("id", &value).unwrap_err();
        match err {
            Error::TypeMismatch {
                column,
                expected,
                actual,
            } => {
                assert_eq!(column, "id");
                assert_eq!(expected, "string");
                assert_eq!(actual, "int64");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn option_extraction_maps_null_to_none() {
        assert_eq!(Option::<i32>::from_value("n", &Value::Null).unwrap(), None);
        assert_eq!(
            Option::<i32>::from_value("n", &Value::Int32(3)).unwrap(),
            Some(3)
        );
    }
}
