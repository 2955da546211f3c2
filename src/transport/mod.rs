//! Transport layer for the SMB session engine
//!
//! The engine only needs an ordered, reliable byte stream that yields whole
//! packets. A transport is connected, then split into a reader owned by the
//! connection's receive loop and a writer shared by senders.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

pub mod frame;
pub mod tcp;

pub use tcp::{StreamTransport, TcpTransport};

/// Trait for SMB transport implementations
#[async_trait]
pub trait SmbTransport: Send {
    /// Connect to a remote SMB server
    async fn connect(&mut self, addr: SocketAddr) -> Result<()>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Get the remote address, if known
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Hand the connected stream over as independent halves
    fn into_split(self: Box<Self>) -> Result<(Box<dyn PacketReader>, Box<dyn PacketWriter>)>;
}

/// Receiving half: yields one packet's bytes at a time
#[async_trait]
pub trait PacketReader: Send {
    /// Next complete frame body, or `None` at end of stream
    async fn read_packet(&mut self) -> Result<Option<Bytes>>;
}

/// Sending half: writes whole packets, never interleaving two of them
#[async_trait]
pub trait PacketWriter: Send {
    async fn write_packet(&mut self, packet: Bytes) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;
}
