//! In-process transport pair for driving the client against a mock server
//!
//! The client end is a [`StreamTransport`] over one side of a tokio duplex
//! pipe; the server end gets the framed halves of the other side, so both
//! directions exercise the real direct-TCP framing.

use crate::client::{ClientConfig, Connection};
use crate::error::Result;
use crate::transport::tcp::{split_framed, FramedReader, FramedWriter, StreamTransport};
use std::net::SocketAddr;
use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

const PIPE_CAPACITY: usize = 1 << 20;

/// Server side of a loopback pipe
pub struct ServerEnd {
    pub reader: FramedReader<ReadHalf<DuplexStream>>,
    pub writer: FramedWriter<WriteHalf<DuplexStream>>,
}

/// A connected transport pair using an in-memory pipe
pub struct LoopbackTransport;

impl LoopbackTransport {
    pub fn pair() -> (StreamTransport<DuplexStream>, ServerEnd) {
        let (client, server) = duplex(PIPE_CAPACITY);
        let (reader, writer) = split_framed(server);
        let addr: SocketAddr = ([127, 0, 0, 1], 445).into();
        (
            StreamTransport::new(client).with_remote_addr(addr),
            ServerEnd { reader, writer },
        )
    }

    /// A client connection over a fresh pipe; the receive loop is running
    pub fn connect(config: ClientConfig) -> Result<(Connection, ServerEnd)> {
        let (transport, server) = Self::pair();
        let connection = Connection::new(Box::new(transport), config)?;
        Ok((connection, server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionState;

    #[tokio::test]
    async fn test_loopback_connection_starts_created() {
        let (connection, _server) = LoopbackTransport::connect(ClientConfig::default()).unwrap();
        assert_eq!(connection.state(), ConnectionState::Created);
        assert_eq!(
            connection.remote_addr(),
            Some(([127, 0, 0, 1], 445).into())
        );
    }

    #[tokio::test]
    async fn test_dropping_server_end_disconnects_client() {
        let (connection, server) = LoopbackTransport::connect(ClientConfig::default()).unwrap();
        drop(server);
        tokio::time::timeout(std::time::Duration::from_secs(2), connection.wait_disconnected())
            .await
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
