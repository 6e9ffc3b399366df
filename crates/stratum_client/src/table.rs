//! Per-table data operations.
//!
//! Every operation follows the same chain: reject transaction handles,
//! resolve the latest schema (cache hit or `SCHEMAS_GET`), serialize the
//! operation header and tuples, issue the RPC, then decode the response.
//! When the body carries tuples, the response's schema reference is
//! resolved before any tuple is decoded. Serialization errors surface
//! before anything is written to the network.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::codec;
use crate::connection::ClusterConnection;
use crate::error::{Error, Result};
use crate::protocol::{Operation, Reader, Writer};
use crate::schema::{Schema, SchemaRegistry};
use crate::transaction::{ensure_no_transaction, Transaction};
use crate::tuple::Tuple;

struct TableInner {
    id: Uuid,
    name: String,
    connection: Arc<dyn ClusterConnection>,
    schemas: SchemaRegistry,
}

/// Handle to one table. Cheap to clone; clones share the schema cache and
/// the cluster connection, and in-flight operations keep the handle alive.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    pub(crate) fn new(id: Uuid, name: String, connection: Arc<dyn ClusterConnection>) -> Table {
        Table {
            inner: Arc::new(TableInner {
                id,
                name,
                connection,
                schemas: SchemaRegistry::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Latest schema known for this table, fetching it on first use.
    pub async fn schema(&self) -> Result<Arc<Schema>> {
        self.latest_schema().await
    }

    /// Get a row by key.
    pub async fn get(&self, tx: Option<&Transaction>, key: &Tuple) -> Result<Option<Tuple>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, key, true)?;
        let response = self.request(Operation::TupleGet, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(None);
        };
        codec::read_tuple_with_key(&mut reader, &schema, key).map(Some)
    }

    /// Get rows for several keys; entries are `None` where the key has no row.
    pub async fn get_all(
        &self,
        tx: Option<&Transaction>,
        keys: Vec<Tuple>,
    ) -> Result<Vec<Option<Tuple>>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuples(&mut writer, &schema, &keys, true)?;
        let response = self.request(Operation::TupleGetAll, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(Vec::new());
        };
        codec::read_tuples_opt(&mut reader, &schema, false)
    }

    /// Insert or overwrite a row.
    pub async fn upsert(&self, tx: Option<&Transaction>, record: &Tuple) -> Result<()> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, record, false)?;
        self.request(Operation::TupleUpsert, writer).await?;
        Ok(())
    }

    /// Insert or overwrite several rows.
    pub async fn upsert_all(&self, tx: Option<&Transaction>, records: Vec<Tuple>) -> Result<()> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuples(&mut writer, &schema, &records, false)?;
        self.request(Operation::TupleUpsertAll, writer).await?;
        Ok(())
    }

    /// Insert or overwrite a row, returning the previous row if any.
    pub async fn get_and_upsert(
        &self,
        tx: Option<&Transaction>,
        record: &Tuple,
    ) -> Result<Option<Tuple>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, record, false)?;
        let response = self.request(Operation::TupleGetAndUpsert, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(None);
        };
        codec::read_tuple_with_key(&mut reader, &schema, record).map(Some)
    }

    /// Insert a row only if its key is vacant. Returns whether it was inserted.
    pub async fn insert(&self, tx: Option<&Transaction>, record: &Tuple) -> Result<bool> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, record, false)?;
        let response = self.request(Operation::TupleInsert, writer).await?;
        Reader::new(response).read_bool()
    }

    /// Insert several rows, returning the ones that were rejected because
    /// their key already had a row.
    pub async fn insert_all(
        &self,
        tx: Option<&Transaction>,
        records: Vec<Tuple>,
    ) -> Result<Vec<Tuple>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuples(&mut writer, &schema, &records, false)?;
        let response = self.request(Operation::TupleInsertAll, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(Vec::new());
        };
        codec::read_tuples(&mut reader, &schema, false)
    }

    /// Overwrite a row only if its key already has one.
    pub async fn replace(&self, tx: Option<&Transaction>, record: &Tuple) -> Result<bool> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, record, false)?;
        let response = self.request(Operation::TupleReplace, writer).await?;
        Reader::new(response).read_bool()
    }

    /// Overwrite a row only if the stored row equals `expected`.
    pub async fn replace_exact(
        &self,
        tx: Option<&Transaction>,
        expected: &Tuple,
        new: &Tuple,
    ) -> Result<bool> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, expected, false)?;
        codec::write_tuple(&mut writer, &schema, new, false)?;
        let response = self.request(Operation::TupleReplaceExact, writer).await?;
        Reader::new(response).read_bool()
    }

    /// Overwrite a row, returning the previous row if any.
    pub async fn get_and_replace(
        &self,
        tx: Option<&Transaction>,
        record: &Tuple,
    ) -> Result<Option<Tuple>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, record, false)?;
        let response = self.request(Operation::TupleGetAndReplace, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(None);
        };
        codec::read_tuple_with_key(&mut reader, &schema, record).map(Some)
    }

    /// Delete a row by key. Returns whether a row was deleted.
    pub async fn remove(&self, tx: Option<&Transaction>, key: &Tuple) -> Result<bool> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, key, true)?;
        let response = self.request(Operation::TupleDelete, writer).await?;
        Reader::new(response).read_bool()
    }

    /// Delete a row only if the stored row equals `record`.
    pub async fn remove_exact(&self, tx: Option<&Transaction>, record: &Tuple) -> Result<bool> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, record, false)?;
        let response = self.request(Operation::TupleDeleteExact, writer).await?;
        Reader::new(response).read_bool()
    }

    /// Delete a row by key, returning it if it existed.
    pub async fn get_and_remove(
        &self,
        tx: Option<&Transaction>,
        key: &Tuple,
    ) -> Result<Option<Tuple>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuple(&mut writer, &schema, key, true)?;
        let response = self.request(Operation::TupleGetAndDelete, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(None);
        };
        codec::read_tuple_with_key(&mut reader, &schema, key).map(Some)
    }

    /// Delete rows for several keys, returning the keys that had no row.
    pub async fn remove_all(
        &self,
        tx: Option<&Transaction>,
        keys: Vec<Tuple>,
    ) -> Result<Vec<Tuple>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuples(&mut writer, &schema, &keys, true)?;
        let response = self.request(Operation::TupleDeleteAll, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(Vec::new());
        };
        codec::read_tuples(&mut reader, &schema, true)
    }

    /// Delete exactly-matching rows, returning the ones that did not match.
    pub async fn remove_all_exact(
        &self,
        tx: Option<&Transaction>,
        records: Vec<Tuple>,
    ) -> Result<Vec<Tuple>> {
        ensure_no_transaction(tx)?;
        let schema = self.latest_schema().await?;
        let mut writer = self.operation_header(&schema);
        codec::write_tuples(&mut writer, &schema, &records, false)?;
        let response = self.request(Operation::TupleDeleteAllExact, writer).await?;
        let mut reader = Reader::new(response);
        let Some(schema) = self.response_schema(&mut reader).await? else {
            return Ok(Vec::new());
        };
        codec::read_tuples(&mut reader, &schema, false)
    }

    async fn request(&self, op: Operation, writer: Writer) -> Result<Bytes> {
        self.inner
            .connection
            .perform_request(op, writer.into_bytes())
            .await
    }

    /// Writer pre-loaded with the data-operation header:
    /// `(table id, transaction: nil, schema version)`.
    fn operation_header(&self, schema: &Schema) -> Writer {
        let mut writer = Writer::new();
        writer.write_uuid(self.inner.id);
        writer.write_nil();
        writer.write_i32(schema.version);
        writer
    }

    /// Latest schema from the cache, loading it from the cluster on a miss.
    ///
    /// Concurrent misses may each issue a `SCHEMAS_GET`; the loads are
    /// idempotent inserts, so the duplicates are tolerated rather than
    /// coalesced.
    async fn latest_schema(&self) -> Result<Arc<Schema>> {
        if let Some(schema) = self.inner.schemas.latest() {
            return Ok(schema);
        }
        self.load_schemas(None).await
    }

    /// Fetch schemas from the cluster: all of them, or one specific version.
    ///
    /// Parsing completes before anything is inserted, so a malformed reply
    /// leaves the cache untouched.
    async fn load_schemas(&self, version: Option<i32>) -> Result<Arc<Schema>> {
        let mut writer = Writer::new();
        writer.write_uuid(self.inner.id);
        match version {
            Some(version) => writer.write_i32(version),
            None => writer.write_nil(),
        }
        let response = self.request(Operation::SchemasGet, writer).await?;

        let mut reader = Reader::new(response);
        let entries = reader.read_map_len()?;
        let mut parsed = Vec::with_capacity(entries);
        for _ in 0..entries {
            let version = reader.read_i32()?;
            parsed.push(Arc::new(Schema::read(version, &mut reader)?));
        }
        let Some(last) = parsed.last().cloned() else {
            return Err(Error::SchemaMissing {
                table: self.inner.name.clone(),
            });
        };
        for schema in parsed {
            self.inner.schemas.insert(schema);
        }
        debug!(table = %self.inner.name, version = last.version, "schemas loaded");
        Ok(last)
    }

    /// Resolve the schema reference leading every tuple-carrying response.
    ///
    /// `nil` means the body carries no payload. A version this client has
    /// not seen yet is learned with a follow-up `SCHEMAS_GET`.
    async fn response_schema(&self, reader: &mut Reader) -> Result<Option<Arc<Schema>>> {
        if reader.try_read_nil()? {
            return Ok(None);
        }
        let version = reader.read_i32()?;
        if let Some(schema) = self.inner.schemas.get(version) {
            return Ok(Some(schema));
        }
        self.load_schemas(Some(version)).await?;
        match self.inner.schemas.get(version) {
            Some(schema) => Ok(Some(schema)),
            None => Err(Error::protocol(format!(
                "cluster did not return schema version {version}"
            ))),
        }
    }
}
