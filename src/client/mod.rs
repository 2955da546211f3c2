//! SMB client session engine

pub mod config;
pub mod connection;
pub mod correlation;
pub mod credits;
pub mod lock;
pub mod notify;
pub mod request;
pub mod session;
pub mod tree;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection::{Connection, ConnectionState, NegotiatedProperties};
pub use correlation::ResponseFuture;
pub use notify::{Notification, NotificationHandler};
pub use request::Request;
pub use session::{Session, SessionState};
pub use tree::{TreeConnect, TreeState};

use crate::auth::Authenticator;
use crate::error::{Error, Result};
use crate::transport::SmbTransport;
use tracing::info;

/// Entry point: opens negotiated connections with one configuration
#[derive(Debug, Clone, Default)]
pub struct SmbClient {
    config: ClientConfig,
}

impl SmbClient {
    /// Create a new SMB client with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new SMB client with custom configuration
    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve `host`, connect over direct TCP and negotiate
    pub async fn connect(&self, host: &str, port: u16) -> Result<Connection> {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| Error::TransportFailure(format!("{} did not resolve", host)))?;
        info!("Connecting to {} as {}", addr, self.config.client_name);

        let connection = Connection::connect(addr, self.config.clone()).await?;
        Self::negotiate_or_close(connection).await
    }

    /// Negotiate over an already connected transport
    pub async fn connect_transport(&self, transport: Box<dyn SmbTransport>) -> Result<Connection> {
        let connection = Connection::new(transport, self.config.clone())?;
        Self::negotiate_or_close(connection).await
    }

    async fn negotiate_or_close(connection: Connection) -> Result<Connection> {
        if let Err(e) = connection.negotiate().await {
            let _ = connection.disconnect().await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Authenticate a new session on `connection`
    pub async fn session_setup(
        &self,
        connection: &Connection,
        authenticator: &mut dyn Authenticator,
    ) -> Result<Session> {
        Session::establish(connection, authenticator).await
    }
}
