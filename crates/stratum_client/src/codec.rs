//! Serialization of records against a table schema.
//!
//! Packing walks the schema's columns (all of them, or only the key
//! projection) and looks each one up in the record by name. A column the
//! record does not contain is claimed as a null field and its bit is set in
//! the *no-value bitset* that travels next to the tuple; that is how the
//! server tells "field intentionally omitted by the client" apart from
//! "field present with a value", including values that happen to serialize
//! to zero bytes. An explicit `Value::Null` is a null field with a clear
//! no-value bit.

use bytes::Bytes;
use smallvec::{smallvec, SmallVec};

use crate::binary_tuple::{BinaryTupleBuilder, BinaryTupleParser};
use crate::error::{Error, Result};
use crate::protocol::{Reader, Writer};
use crate::schema::{Column, Schema};
use crate::tuple::Tuple;
use crate::value::{ColumnType, Value};

/// Stack-first no-value bitset; heap only for schemas wider than 64 columns.
pub(crate) type NoValueBitset = SmallVec<[u8; 8]>;

fn mismatch(column: &Column, value: &Value) -> Error {
    Error::TypeMismatch {
        column: column.name.clone(),
        expected: column.column_type.type_name(),
        actual: value.type_name(),
    }
}

/// Claim space for one column's value.
fn claim_column(builder: &mut BinaryTupleBuilder, column: &Column, value: &Value) -> Result<()> {
    if value.is_null() {
        builder.claim(None);
        return Ok(());
    }
    let size = match (column.column_type, value) {
        (ColumnType::Int8, Value::Int8(_)) => 1,
        (ColumnType::Int16, Value::Int16(_)) => 2,
        (ColumnType::Int32, Value::Int32(_)) => 4,
        (ColumnType::Int64, Value::Int64(_)) => 8,
        (ColumnType::Float, Value::Float(_)) => 4,
        (ColumnType::Double, Value::Double(_)) => 8,
        (ColumnType::Uuid, Value::Uuid(_)) => 16,
        (ColumnType::String, Value::String(s)) => s.len(),
        (ColumnType::Binary, Value::Binary(b)) => b.len(),
        (ColumnType::Other(id), _) => return Err(Error::TypeUnsupported(id)),
        (_, value) => return Err(mismatch(column, value)),
    };
    builder.claim(Some(size));
    Ok(())
}

/// Append one column's value. Must mirror [`claim_column`].
fn append_column(builder: &mut BinaryTupleBuilder, column: &Column, value: &Value) -> Result<()> {
    if value.is_null() {
        return builder.append(None);
    }
    match (column.column_type, value) {
        (ColumnType::Int8, Value::Int8(v)) => builder.append(Some(&v.to_le_bytes())),
        (ColumnType::Int16, Value::Int16(v)) => builder.append(Some(&v.to_le_bytes())),
        (ColumnType::Int32, Value::Int32(v)) => builder.append(Some(&v.to_le_bytes())),
        (ColumnType::Int64, Value::Int64(v)) => builder.append(Some(&v.to_le_bytes())),
        (ColumnType::Float, Value::Float(v)) => builder.append(Some(&v.to_le_bytes())),
        (ColumnType::Double, Value::Double(v)) => builder.append(Some(&v.to_le_bytes())),
        (ColumnType::Uuid, Value::Uuid(v)) => builder.append(Some(v.as_bytes())),
        (ColumnType::String, Value::String(s)) => builder.append(Some(s.as_bytes())),
        (ColumnType::Binary, Value::Binary(b)) => builder.append(Some(b)),
        (ColumnType::Other(id), _) => Err(Error::TypeUnsupported(id)),
        (_, value) => Err(mismatch(column, value)),
    }
}

fn fixed_width(field: &Bytes, width: usize, column: &Column) -> Result<()> {
    if field.len() != width {
        return Err(Error::protocol(format!(
            "column '{}': expected {} payload bytes, got {}",
            column.name,
            width,
            field.len()
        )));
    }
    Ok(())
}

/// Decode one column's value from a parsed tuple field.
fn decode_column(field: Option<Bytes>, column: &Column) -> Result<Value> {
    let Some(field) = field else {
        return Ok(Value::Null);
    };
    let value = match column.column_type {
        ColumnType::Int8 => {
            fixed_width(&field, 1, column)?;
            Value::Int8(field[0] as i8)
        }
        ColumnType::Int16 => {
            fixed_width(&field, 2, column)?;
            Value::Int16(i16::from_le_bytes([field[0], field[1]]))
        }
        ColumnType::Int32 => {
            fixed_width(&field, 4, column)?;
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&field);
            Value::Int32(i32::from_le_bytes(bytes))
        }
        ColumnType::Int64 => {
            fixed_width(&field, 8, column)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&field);
            Value::Int64(i64::from_le_bytes(bytes))
        }
        ColumnType::Float => {
            fixed_width(&field, 4, column)?;
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&field);
            Value::Float(f32::from_le_bytes(bytes))
        }
        ColumnType::Double => {
            fixed_width(&field, 8, column)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&field);
            Value::Double(f64::from_le_bytes(bytes))
        }
        ColumnType::Uuid => {
            fixed_width(&field, 16, column)?;
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&field);
            Value::Uuid(uuid::Uuid::from_bytes(bytes))
        }
        ColumnType::String => Value::String(
            String::from_utf8(field.to_vec())
                .map_err(|_| Error::protocol(format!("column '{}' is not UTF-8", column.name)))?,
        ),
        ColumnType::Binary => Value::Binary(field.to_vec()),
        ColumnType::Other(id) => return Err(Error::TypeUnsupported(id)),
    };
    Ok(value)
}

/// Serialize a record against a schema into binary tuple bytes.
///
/// Bit `i` of `no_value` is set for every schema column the record does not
/// contain.
pub(crate) fn pack_tuple(
    schema: &Schema,
    tuple: &Tuple,
    key_only: bool,
    no_value: &mut [u8],
) -> Result<Bytes> {
    let count = schema.column_count(key_only);
    let mut builder = BinaryTupleBuilder::new(count);

    for column in &schema.columns[..count] {
        match tuple.column_ordinal(&column.name).and_then(|ord| tuple.value(ord)) {
            Some(value) => claim_column(&mut builder, column, value)?,
            None => builder.claim(None),
        }
    }

    builder.layout()?;
    for (i, column) in schema.columns[..count].iter().enumerate() {
        match tuple.column_ordinal(&column.name).and_then(|ord| tuple.value(ord)) {
            Some(value) => append_column(&mut builder, column, value)?,
            None => {
                builder.append(None)?;
                no_value[i / 8] |= 1 << (i % 8);
            }
        }
    }

    builder.build()
}

/// Emit one tuple payload: the no-value bitset blob, then the tuple blob.
pub(crate) fn write_tuple(
    writer: &mut Writer,
    schema: &Schema,
    tuple: &Tuple,
    key_only: bool,
) -> Result<()> {
    let count = schema.column_count(key_only);
    let mut no_value: NoValueBitset = smallvec![0u8; count.div_ceil(8)];
    let data = pack_tuple(schema, tuple, key_only, &mut no_value)?;
    writer.write_bitset(&no_value);
    writer.write_binary(&data);
    Ok(())
}

/// Emit a counted sequence of tuple payloads of one `key_only` mode.
pub(crate) fn write_tuples(
    writer: &mut Writer,
    schema: &Schema,
    tuples: &[Tuple],
    key_only: bool,
) -> Result<()> {
    writer.write_i32(tuples.len() as i32);
    for tuple in tuples {
        write_tuple(writer, schema, tuple, key_only)?;
    }
    Ok(())
}

/// Read one tuple covering the schema's columns (or only its key projection).
pub(crate) fn read_tuple(reader: &mut Reader, schema: &Schema, key_only: bool) -> Result<Tuple> {
    let data = reader.read_binary()?;
    let count = schema.column_count(key_only);
    let mut parser = BinaryTupleParser::new(count, data)?;
    let mut tuple = Tuple::with_capacity(count);
    for column in &schema.columns[..count] {
        let value = decode_column(parser.next_field()?, column)?;
        tuple.set(column.name.clone(), value);
    }
    Ok(tuple)
}

/// Read a tuple whose key fields the server elided.
///
/// The wire payload carries only value columns; key columns are copied from
/// the request's key record by name.
pub(crate) fn read_tuple_with_key(
    reader: &mut Reader,
    schema: &Schema,
    key: &Tuple,
) -> Result<Tuple> {
    let data = reader.read_binary()?;
    let mut parser = BinaryTupleParser::new(schema.columns.len() - schema.key_column_count, data)?;
    let mut tuple = Tuple::with_capacity(schema.columns.len());
    for (i, column) in schema.columns.iter().enumerate() {
        if i < schema.key_column_count {
            if let Some(value) = key.get_value(&column.name) {
                tuple.set(column.name.clone(), value.clone());
            }
        } else {
            let value = decode_column(parser.next_field()?, column)?;
            tuple.set(column.name.clone(), value);
        }
    }
    Ok(tuple)
}

/// Read a counted sequence of tuples.
pub(crate) fn read_tuples(
    reader: &mut Reader,
    schema: &Schema,
    key_only: bool,
) -> Result<Vec<Tuple>> {
    let count = reader.read_i32()?;
    let mut tuples = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        tuples.push(read_tuple(reader, schema, key_only)?);
    }
    Ok(tuples)
}

/// Read a counted sequence where each entry is prefixed by an "exists" flag.
pub(crate) fn read_tuples_opt(
    reader: &mut Reader,
    schema: &Schema,
    key_only: bool,
) -> Result<Vec<Option<Tuple>>> {
    let count = reader.read_i32()?;
    let mut tuples = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        if reader.read_bool()? {
            tuples.push(Some(read_tuple(reader, schema, key_only)?));
        } else {
            tuples.push(None);
        }
    }
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn column(name: &str, column_type: ColumnType, key: bool) -> Column {
        Column {
            name: name.to_owned(),
            column_type,
            nullable: !key,
            key,
        }
    }

    fn wide_schema() -> Schema {
        Schema {
            version: 1,
            key_column_count: 1,
            columns: vec![
                column("id", ColumnType::Int64, true),
                column("i8", ColumnType::Int8, false),
                column("i16", ColumnType::Int16, false),
                column("i32", ColumnType::Int32, false),
                column("f", ColumnType::Float, false),
                column("d", ColumnType::Double, false),
                column("u", ColumnType::Uuid, false),
                column("s", ColumnType::String, false),
                column("b", ColumnType::Binary, false),
            ],
        }
    }

    fn full_record(id: Uuid) -> Tuple {
        Tuple::new()
            .with("id", 42i64)
            .with("i8", -7i8)
            .with("i16", 300i16)
            .with("i32", -70_000i32)
            .with("f", 1.5f32)
            .with("d", -2.25f64)
            .with("u", id)
            .with("s", "alice")
            .with("b", vec![0xde, 0xad])
    }

    fn round_trip(schema: &Schema, record: &Tuple, key_only: bool) -> Tuple {
        let mut writer = Writer::new();
        write_tuple(&mut writer, schema, record, key_only).unwrap();
        let mut reader = Reader::new(writer.into_bytes());
        let _bitset = reader.read_binary().unwrap();
        read_tuple(&mut reader, schema, key_only).unwrap()
    }

    #[test]
    fn every_supported_type_round_trips() {
        let schema = wide_schema();
        let id = Uuid::new_v4();
        let record = full_record(id);
        let decoded = round_trip(&schema, &record, false);
        for (name, value) in record.iter() {
            assert_eq!(decoded.get_value(name), Some(value), "column {name}");
        }
    }

    #[test]
    fn key_only_mode_serializes_the_key_projection() {
        let schema = wide_schema();
        let record = full_record(Uuid::new_v4());
        let decoded = round_trip(&schema, &record, true);
        assert_eq!(decoded.column_count(), 1);
        assert_eq!(decoded.get::<i64>("id").unwrap(), 42);
    }

    #[test]
    fn omitted_columns_set_the_no_value_bit() {
        let schema = wide_schema();
        // Only columns 0 and 7 present: bits 1..=6 and 8 must be set.
        let record = Tuple::new().with("id", 42i64).with("s", "x");
        let count = schema.columns.len();
        let mut no_value = vec![0u8; count.div_ceil(8)];
        let data = pack_tuple(&schema, &record, false, &mut no_value).unwrap();
        assert_eq!(no_value, vec![0b0111_1110, 0b0000_0001]);

        // Every set bit parses back as an absent field.
        let mut parser = BinaryTupleParser::new(count, data).unwrap();
        for i in 0..count {
            let field = parser.next_field().unwrap();
            let omitted = no_value[i / 8] & (1 << (i % 8)) != 0;
            assert_eq!(field.is_none(), omitted, "field {i}");
        }
    }

    #[test]
    fn explicit_null_is_not_reported_as_omitted() {
        let schema = wide_schema();
        let record = Tuple::new().with("id", 1i64).with("s", Value::Null);
        let mut no_value = vec![0u8; 2];
        pack_tuple(&schema, &record, false, &mut no_value).unwrap();
        // Column 7 holds an explicit null: its no-value bit stays clear.
        assert_eq!(no_value[0] & 0x80, 0);
        // The rest of the value columns were omitted.
        assert_eq!(no_value, vec![0b0111_1110, 0b0000_0001]);
    }

    #[test]
    fn empty_string_is_a_present_value() {
        let schema = Schema {
            version: 1,
            key_column_count: 1,
            columns: vec![
                column("id", ColumnType::Int64, true),
                column("s", ColumnType::String, false),
            ],
        };
        let record = Tuple::new().with("id", 1i64).with("s", "");
        let mut no_value = vec![0u8; 1];
        let data = pack_tuple(&schema, &record, false, &mut no_value).unwrap();
        assert_eq!(no_value[0], 0);
        let mut parser = BinaryTupleParser::new(2, data).unwrap();
        parser.next_field().unwrap();
        assert_eq!(parser.next_field().unwrap().as_deref(), Some(&[][..]));
    }

    #[test]
    fn type_mismatch_names_the_column() {
        let schema = wide_schema();
        let record = Tuple::new().with("id", "not an int");
        let mut no_value = vec![0u8; 2];
        match pack_tuple(&schema, &record, false, &mut no_value) {
            Err(Error::TypeMismatch {
                column,
                expected,
                actual,
            }) => {
                assert_eq!(column, "id");
                assert_eq!(expected, "int64");
                assert_eq!(actual, "string");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unsupported_column_type_fails_before_layout() {
        let schema = Schema {
            version: 1,
            key_column_count: 1,
            columns: vec![
                column("id", ColumnType::Int64, true),
                column("x", ColumnType::Other(33), false),
            ],
        };
        let record = Tuple::new().with("id", 1i64).with("x", 1i64);
        let mut no_value = vec![0u8; 1];
        match pack_tuple(&schema, &record, false, &mut no_value) {
            Err(Error::TypeUnsupported(id)) => assert_eq!(id, 33),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn merged_key_fields_come_from_the_request() {
        let schema = Schema {
            version: 1,
            key_column_count: 1,
            columns: vec![
                column("id", ColumnType::Int64, true),
                column("name", ColumnType::String, false),
            ],
        };
        // Server payload carries only the value column.
        let mut builder = BinaryTupleBuilder::new(1);
        builder.claim(Some(5));
        builder.layout().unwrap();
        builder.append(Some(b"alice")).unwrap();
        let mut writer = Writer::new();
        writer.write_binary(&builder.build().unwrap());

        let key = Tuple::new().with("id", 42i64);
        let mut reader = Reader::new(writer.into_bytes());
        let row = read_tuple_with_key(&mut reader, &schema, &key).unwrap();
        assert_eq!(row.get::<i64>("id").unwrap(), 42);
        assert_eq!(row.get::<String>("name").unwrap(), "alice");
    }

    #[test]
    fn optional_tuple_lists_honor_the_exists_flag() {
        let schema = Schema {
            version: 1,
            key_column_count: 1,
            columns: vec![column("id", ColumnType::Int64, true)],
        };
        let mut writer = Writer::new();
        writer.write_i32(3);
        writer.write_bool(true);
        write_tuple(&mut writer, &schema, &Tuple::new().with("id", 1i64), false).unwrap();
        writer.write_bool(false);
        writer.write_bool(true);
        write_tuple(&mut writer, &schema, &Tuple::new().with("id", 3i64), false).unwrap();
        let mut reader = Reader::new(writer.into_bytes());
        let rows = read_tuples_opt(&mut reader, &schema, false).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_ref().unwrap().get::<i64>("id").unwrap(), 1);
        assert!(rows[1].is_none());
        assert_eq!(rows[2].as_ref().unwrap().get::<i64>("id").unwrap(), 3);
    }
}
