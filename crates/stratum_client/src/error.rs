//! Error surface shared by every client operation.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type returned by all client operations.
///
/// No operation retries internally; every failure surfaces to the caller
/// exactly once.
#[derive(Debug, Error)]
pub enum Error {
    /// A transaction handle was passed to an operation.
    #[error("transactions are not supported yet")]
    TransactionsUnsupported,

    /// The cluster returned an empty schema map for a table.
    #[error("no schema found for table '{table}'")]
    SchemaMissing { table: String },

    /// The codec met a column type outside the supported set.
    #[error("column type with id {0} is not supported")]
    TypeUnsupported(i32),

    /// A record value's runtime type disagrees with its schema column type.
    #[error("column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A typed accessor was used on a field the record does not contain.
    #[error("field '{0}' not found")]
    FieldNotFound(String),

    /// Malformed frame, unexpected tag, short read or bounds violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O failure while connecting to or talking to the cluster.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The cluster rejected the request with an error frame.
    #[error("server error: {0}")]
    Server(String),

    /// The connection was lost with the request in flight, or the request
    /// was issued after the connection had been closed.
    #[error("cluster connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Shorthand for [`Error::Protocol`] from anything printable.
    pub(crate) fn protocol(details: impl Into<String>) -> Self {
        Error::Protocol(details.into())
    }
}
