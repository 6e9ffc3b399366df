//! Top-level client: configuration, connect, and the tables facade.

use std::sync::Arc;
use std::time::Duration;

use crate::connection::TcpClusterConnection;
use crate::error::Result;
use crate::tables::Tables;

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Cluster node address, `host:port`.
    pub address: String,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> ClientConfig {
        ClientConfig {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.connect_timeout = timeout;
        self
    }
}

/// Connected Stratum client.
///
/// Owns the cluster connection shared by every table handle it hands out.
pub struct Client {
    connection: Arc<TcpClusterConnection>,
    tables: Tables,
}

impl Client {
    /// Connect to the cluster and run the handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Client> {
        let connection =
            Arc::new(TcpClusterConnection::connect(&config.address, config.connect_timeout).await?);
        let tables = Tables::new(connection.clone());
        Ok(Client { connection, tables })
    }

    /// Table management and data-operation entry point.
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Close the connection; in-flight operations fail with
    /// [`crate::Error::ConnectionClosed`].
    pub fn close(&self) {
        self.connection.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
