//! Cluster connection: framing, handshake and in-flight request tracking.
//!
//! Frames are 4-byte big-endian length-delimited. A request frame is
//! `int opcode, int request_id, body...`; a response frame is
//! `int request_id, nil | str error, body...`. Requests are correlated by
//! id, so responses may arrive in any order and any number of requests can
//! be in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{Operation, Reader, Writer};

/// Leading bytes of the handshake frame in both directions.
pub const MAGIC: [u8; 4] = *b"STRM";
/// Wire protocol revision negotiated during the handshake.
pub const PROTOCOL_VERSION: i32 = 1;

/// Request/response transport shared by every table handle.
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    /// Send a request body for `op` and wait for the raw response body.
    async fn perform_request(&self, op: Operation, request: Bytes) -> Result<Bytes>;
}

type PendingMap = HashMap<i64, oneshot::Sender<Result<Bytes>>>;

/// In-flight request table. `None` means the connection is closed and every
/// new request fails fast.
struct Pending {
    inner: Mutex<Option<PendingMap>>,
}

impl Pending {
    fn new() -> Pending {
        Pending {
            inner: Mutex::new(Some(HashMap::new())),
        }
    }

    fn register(&self, request_id: i64) -> Result<oneshot::Receiver<Result<Bytes>>> {
        let Ok(mut guard) = self.inner.lock() else {
            return Err(Error::ConnectionClosed);
        };
        let Some(map) = guard.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        let (tx, rx) = oneshot::channel();
        map.insert(request_id, tx);
        Ok(rx)
    }

    fn remove(&self, request_id: i64) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(map) = guard.as_mut() {
                map.remove(&request_id);
            }
        }
    }

    /// Complete one request; false when the id is unknown.
    fn complete(&self, request_id: i64, result: Result<Bytes>) -> bool {
        let Ok(mut guard) = self.inner.lock() else {
            return false;
        };
        let Some(map) = guard.as_mut() else {
            return false;
        };
        match map.remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail everything in flight and reject all future registrations.
    fn close_all(&self) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        if let Some(map) = guard.take() {
            for (_, tx) in map {
                let _ = tx.send(Err(Error::ConnectionClosed));
            }
        }
    }
}

/// TCP implementation of [`ClusterConnection`].
///
/// One write loop drains an unbounded queue into the socket; one read loop
/// parses response frames and completes the matching pending request. Both
/// loops stop on connection loss, which drains the pending table with
/// [`Error::ConnectionClosed`].
pub struct TcpClusterConnection {
    tx: mpsc::UnboundedSender<Bytes>,
    pending: Arc<Pending>,
    next_request_id: AtomicI64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpClusterConnection {
    /// Connect and run the handshake.
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<TcpClusterConnection> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {address} timed out"),
                ))
            })??;
        let _ = stream.set_nodelay(true);
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        let mut hello = Writer::new();
        hello.write_raw(&MAGIC);
        hello.write_i32(PROTOCOL_VERSION);
        framed.send(hello.into_bytes()).await?;

        let frame = framed.next().await.ok_or(Error::ConnectionClosed)??;
        let mut reader = Reader::new(frame.freeze());
        let mut magic = [0u8; 4];
        reader.read_raw(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::protocol("handshake reply carries bad magic bytes"));
        }
        if !reader.try_read_nil()? {
            return Err(Error::Server(reader.read_str()?));
        }
        debug!(address, "connected to cluster");

        let pending = Arc::new(Pending::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let (mut sink, mut stream) = framed.split();

        let write_pending = pending.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = sink.send(frame).await {
                    warn!(error = %err, "cluster connection write failed");
                    break;
                }
            }
            write_pending.close_all();
        });

        let read_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(frame)) => {
                        if !dispatch_response(&read_pending, frame.freeze()) {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "cluster connection read failed");
                        break;
                    }
                    None => break,
                }
            }
            read_pending.close_all();
        });

        Ok(TcpClusterConnection {
            tx,
            pending,
            next_request_id: AtomicI64::new(1),
            tasks: Mutex::new(vec![writer_task, reader_task]),
        })
    }

    /// Stop both loops and fail everything in flight.
    pub fn close(&self) {
        self.pending.close_all();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for TcpClusterConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse one response frame and complete its pending request.
///
/// Returns false when the frame is malformed, which tears the connection
/// down; the stream offset can no longer be trusted.
fn dispatch_response(pending: &Pending, frame: Bytes) -> bool {
    let mut reader = Reader::new(frame);
    let request_id = match reader.read_i64() {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "malformed response frame");
            return false;
        }
    };
    let result = match reader.try_read_nil() {
        Ok(true) => Ok(reader.into_remaining()),
        Ok(false) => match reader.read_str() {
            Ok(message) => Err(Error::Server(message)),
            Err(err) => {
                warn!(error = %err, request_id, "malformed error frame");
                return false;
            }
        },
        Err(err) => {
            warn!(error = %err, request_id, "truncated response frame");
            return false;
        }
    };
    if !pending.complete(request_id, result) {
        warn!(request_id, "response for unknown request id");
    }
    true
}

#[async_trait]
impl ClusterConnection for TcpClusterConnection {
    async fn perform_request(&self, op: Operation, request: Bytes) -> Result<Bytes> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(request_id)?;

        let mut frame = Writer::new();
        frame.write_i32(op.code());
        frame.write_i64(request_id);
        frame.write_raw(&request);
        if self.tx.send(frame.into_bytes()).is_err() {
            self.pending.remove(request_id);
            return Err(Error::ConnectionClosed);
        }
        debug!(?op, request_id, "request dispatched");

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }
}
