//! Table schemas and the per-table versioned schema registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::protocol::Reader;
use crate::value::ColumnType;

/// One column of a table schema. Immutable once part of a schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub key: bool,
}

/// One immutable snapshot of a table's columns.
///
/// Key columns precede value columns; `columns[..key_column_count]` is the
/// key projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub version: i32,
    pub key_column_count: usize,
    pub columns: Vec<Column>,
}

impl Schema {
    /// Serialized field count for the given mode.
    pub fn column_count(&self, key_only: bool) -> usize {
        if key_only {
            self.key_column_count
        } else {
            self.columns.len()
        }
    }

    /// Decode a schema from a `SCHEMAS_GET` map entry value.
    ///
    /// Wire shape: array of columns, each an array of
    /// `[name: str, type_id: int, nullable: bool, key: bool]`.
    pub fn read(version: i32, reader: &mut Reader) -> Result<Schema> {
        let column_count = reader.read_array_len()?;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let fields = reader.read_array_len()?;
            if fields != 4 {
                return Err(Error::protocol(format!(
                    "column descriptor has {fields} fields, expected 4"
                )));
            }
            let name = reader.read_str()?;
            let type_id = reader.read_i32()?;
            let nullable = reader.read_bool()?;
            let key = reader.read_bool()?;
            columns.push(Column {
                name,
                column_type: ColumnType::from_id(type_id),
                nullable,
                key,
            });
        }
        let key_column_count = columns.iter().take_while(|c| c.key).count();
        if key_column_count == 0 {
            return Err(Error::protocol(format!(
                "schema version {version} has no key columns"
            )));
        }
        if columns.iter().skip(key_column_count).any(|c| c.key) {
            return Err(Error::protocol(format!(
                "schema version {version} interleaves key and value columns"
            )));
        }
        Ok(Schema {
            version,
            key_column_count,
            columns,
        })
    }
}

/// Versioned schema cache for one table.
///
/// Versions are inserted on first observation and never mutated or evicted.
/// `latest_version` only moves forward, even when a stale load delivers an
/// older version than one already seen.
pub(crate) struct SchemaRegistry {
    schemas: Mutex<HashMap<i32, Arc<Schema>>>,
    /// Highest version ever inserted; -1 while the registry is empty.
    latest_version: AtomicI32,
}

impl SchemaRegistry {
    pub fn new() -> SchemaRegistry {
        SchemaRegistry {
            schemas: Mutex::new(HashMap::new()),
            latest_version: AtomicI32::new(-1),
        }
    }

    /// Record a schema. The first observation of a version wins; the latest
    /// marker is bumped only after the map holds the entry.
    pub fn insert(&self, schema: Arc<Schema>) {
        let version = schema.version;
        if let Ok(mut schemas) = self.schemas.lock() {
            schemas.entry(version).or_insert(schema);
            self.latest_version.fetch_max(version, Ordering::AcqRel);
        }
    }

    pub fn get(&self, version: i32) -> Option<Arc<Schema>> {
        self.schemas.lock().ok()?.get(&version).cloned()
    }

    /// The schema for the highest version seen so far, if any.
    pub fn latest(&self) -> Option<Arc<Schema>> {
        let version = self.latest_version.load(Ordering::Acquire);
        if version < 0 {
            return None;
        }
        self.get(version)
    }
}
