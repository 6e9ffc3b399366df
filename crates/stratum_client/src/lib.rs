//! Asynchronous thin client for the Stratum distributed SQL/KV cluster.
//!
//! The client resolves tables by name, caches the server-published schema
//! for each table by version, serializes user records into the cluster's
//! binary tuple format, and dispatches typed RPCs over one shared framed
//! TCP connection. Responses are reassembled into records, with key fields
//! recovered from the request when the server elides them.
//!
//! ```no_run
//! use std::time::Duration;
//! use stratum_client::{Client, ClientConfig, Tuple};
//!
//! # async fn example() -> stratum_client::Result<()> {
//! let config = ClientConfig::new("127.0.0.1:5800").connect_timeout(Duration::from_secs(3));
//! let client = Client::connect(&config).await?;
//! let table = client.tables().table("users").await?.expect("table exists");
//! table.upsert(None, &Tuple::new().with("id", 42i64).with("name", "alice")).await?;
//! let row = table.get(None, &Tuple::new().with("id", 42i64)).await?;
//! # let _ = row;
//! # Ok(())
//! # }
//! ```

pub mod binary_tuple;
pub mod client;
mod codec;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod table;
pub mod tables;
pub mod transaction;
pub mod tuple;
pub mod value;

pub use client::{Client, ClientConfig};
pub use connection::{ClusterConnection, TcpClusterConnection};
pub use error::{Error, Result};
pub use schema::{Column, Schema};
pub use table::Table;
pub use tables::Tables;
pub use transaction::Transaction;
pub use tuple::Tuple;
pub use value::{ColumnType, FromValue, Value};
