//! Table resolution and the per-name handle cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::connection::ClusterConnection;
use crate::error::Result;
use crate::protocol::{Operation, Reader, Writer};
use crate::table::Table;

/// Name-keyed registry of table handles.
///
/// Handles are cached on first resolution so every caller shares one schema
/// cache per table. The cache key is the lower-cased name.
pub struct Tables {
    connection: Arc<dyn ClusterConnection>,
    cache: Mutex<HashMap<String, Table>>,
}

impl Tables {
    pub fn new(connection: Arc<dyn ClusterConnection>) -> Tables {
        Tables {
            connection,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a table by name; `None` when the cluster has no such table.
    pub async fn table(&self, name: &str) -> Result<Option<Table>> {
        let cache_key = name.to_ascii_lowercase();
        if let Ok(cache) = self.cache.lock() {
            if let Some(table) = cache.get(&cache_key) {
                return Ok(Some(table.clone()));
            }
        }

        let mut writer = Writer::new();
        writer.write_str(name);
        let response = self
            .connection
            .perform_request(Operation::TableGet, writer.into_bytes())
            .await?;
        let mut reader = Reader::new(response);
        if reader.try_read_nil()? {
            return Ok(None);
        }
        let id = reader.read_uuid()?;
        debug!(table = name, %id, "table resolved");

        let table = Table::new(id, name.to_owned(), self.connection.clone());
        // A concurrent resolution may have won the race; keep the first
        // handle so its schema cache is the shared one.
        let table = match self.cache.lock() {
            Ok(mut cache) => cache.entry(cache_key).or_insert(table).clone(),
            Err(_) => table,
        };
        Ok(Some(table))
    }

    /// Names of all tables known to the cluster.
    pub async fn names(&self) -> Result<Vec<String>> {
        let response = self
            .connection
            .perform_request(Operation::TablesGet, Writer::new().into_bytes())
            .await?;
        let mut reader = Reader::new(response);
        let count = reader.read_array_len()?;
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(reader.read_str()?);
        }
        Ok(names)
    }
}
