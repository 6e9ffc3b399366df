//! Shared helpers for integration tests: an in-process mock cluster and
//! wire-payload builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use stratum_client::binary_tuple::BinaryTupleBuilder;
use stratum_client::connection::MAGIC;
use stratum_client::protocol::{Operation, Reader, Writer};

pub type Handler = Box<dyn Fn(Bytes) -> Result<Bytes, String> + Send + Sync>;

type HandlerMap = Arc<Mutex<HashMap<Operation, Handler>>>;
type RequestLog = Arc<Mutex<Vec<(Operation, Bytes)>>>;

/// Scripted cluster node listening on an ephemeral port.
///
/// Speaks the real handshake and framing; request bodies are routed to
/// per-operation handlers and recorded for assertions.
pub struct MockCluster {
    addr: SocketAddr,
    handlers: HandlerMap,
    log: RequestLog,
    task: JoinHandle<()>,
}

impl MockCluster {
    pub async fn start() -> MockCluster {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handlers: HandlerMap = Arc::new(Mutex::new(HashMap::new()));
        let log: RequestLog = Arc::new(Mutex::new(Vec::new()));

        let accept_handlers = handlers.clone();
        let accept_log = log.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve(stream, accept_handlers.clone(), accept_log.clone()));
            }
        });

        MockCluster {
            addr,
            handlers,
            log,
            task,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Install the handler for one operation.
    pub fn on(
        &self,
        op: Operation,
        handler: impl Fn(Bytes) -> Result<Bytes, String> + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert(op, Box::new(handler));
    }

    /// Everything received so far, in arrival order.
    pub fn requests(&self) -> Vec<(Operation, Bytes)> {
        self.log.lock().unwrap().clone()
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, handlers: HandlerMap, log: RequestLog) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    // Handshake: magic + version in, magic + nil out.
    let Some(Ok(frame)) = framed.next().await else {
        return;
    };
    let mut reader = Reader::new(frame.freeze());
    let mut magic = [0u8; 4];
    reader.read_raw(&mut magic).unwrap();
    assert_eq!(magic, MAGIC, "client sent bad magic");
    reader.read_i64().unwrap();
    let mut hello = Writer::new();
    hello.write_raw(&MAGIC);
    hello.write_nil();
    framed.send(hello.into_bytes()).await.unwrap();

    while let Some(Ok(frame)) = framed.next().await {
        let mut reader = Reader::new(frame.freeze());
        let code = reader.read_i32().unwrap();
        let request_id = reader.read_i64().unwrap();
        let body = reader.into_remaining();
        let op = Operation::from_code(code).expect("unknown opcode");
        log.lock().unwrap().push((op, body.clone()));

        let result = {
            let handlers = handlers.lock().unwrap();
            match handlers.get(&op) {
                Some(handler) => handler(body),
                None => Err(format!("no handler for {op:?}")),
            }
        };

        let mut response = Writer::new();
        response.write_i64(request_id);
        match result {
            Ok(payload) => {
                response.write_nil();
                response.write_raw(&payload);
            }
            Err(message) => response.write_str(&message),
        }
        if framed.send(response.into_bytes()).await.is_err() {
            break;
        }
    }
}

/// `TABLE_GET` reply carrying a table id.
pub fn table_reply(id: Uuid) -> Bytes {
    let mut writer = Writer::new();
    writer.write_uuid(id);
    writer.into_bytes()
}

/// One column descriptor for [`schemas_reply`].
pub struct ColumnSpec {
    pub name: &'static str,
    pub type_id: i32,
    pub nullable: bool,
    pub key: bool,
}

pub fn key_column(name: &'static str, type_id: i32) -> ColumnSpec {
    ColumnSpec {
        name,
        type_id,
        nullable: false,
        key: true,
    }
}

pub fn value_column(name: &'static str, type_id: i32) -> ColumnSpec {
    ColumnSpec {
        name,
        type_id,
        nullable: true,
        key: false,
    }
}

/// `SCHEMAS_GET` reply: a map of one or more schema versions.
pub fn schemas_reply(versions: &[(i32, &[ColumnSpec])]) -> Bytes {
    let mut writer = Writer::new();
    writer.write_map_len(versions.len());
    for (version, columns) in versions {
        writer.write_i32(*version);
        writer.write_array_len(columns.len());
        for column in *columns {
            writer.write_array_len(4);
            writer.write_str(column.name);
            writer.write_i32(column.type_id);
            writer.write_bool(column.nullable);
            writer.write_bool(column.key);
        }
    }
    writer.into_bytes()
}

/// Build a binary tuple from raw field payloads and emit it as a bin blob.
pub fn write_row(writer: &mut Writer, fields: &[Option<&[u8]>]) {
    let mut builder = BinaryTupleBuilder::new(fields.len());
    for field in fields {
        builder.claim(field.map(<[u8]>::len));
    }
    builder.layout().unwrap();
    for field in fields {
        builder.append(*field).unwrap();
    }
    writer.write_binary(&builder.build().unwrap());
}

/// Tuple-carrying response body: schema version reference plus one row.
pub fn row_reply(version: i32, fields: &[Option<&[u8]>]) -> Bytes {
    let mut writer = Writer::new();
    writer.write_i32(version);
    write_row(&mut writer, fields);
    writer.into_bytes()
}

/// Response body for "no row".
pub fn no_row_reply() -> Bytes {
    let mut writer = Writer::new();
    writer.write_nil();
    writer.into_bytes()
}

/// Response body carrying a bare bool.
pub fn bool_reply(value: bool) -> Bytes {
    let mut writer = Writer::new();
    writer.write_bool(value);
    writer.into_bytes()
}
