//! Stream transports for SMB
//!
//! [`StreamTransport`] frames packets over any tokio byte stream;
//! [`TcpTransport`] dials a server over TCP and hands its socket to it.

use super::frame::{FrameHeader, FrameKind};
use super::{PacketReader, PacketWriter, SmbTransport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Transport over an already-established byte stream
pub struct StreamTransport<S> {
    stream: Option<S>,
    remote_addr: Option<SocketAddr>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

#[async_trait]
impl<S> SmbTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn connect(&mut self, _addr: SocketAddr) -> Result<()> {
        if self.stream.is_some() {
            Ok(())
        } else {
            Err(Error::InvalidState(
                "stream transport cannot reconnect".to_string(),
            ))
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn into_split(self: Box<Self>) -> Result<(Box<dyn PacketReader>, Box<dyn PacketWriter>)> {
        let stream = self
            .stream
            .ok_or_else(|| Error::InvalidState("Not connected".to_string()))?;
        let (reader, writer) = split_framed(stream);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Split a byte stream into framed halves
pub fn split_framed<S>(stream: S) -> (FramedReader<ReadHalf<S>>, FramedWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (read, write) = tokio::io::split(stream);
    (FramedReader::new(read), FramedWriter::new(write))
}

/// Reads direct-TCP frames from a byte stream
pub struct FramedReader<R> {
    inner: R,
}

impl<R: AsyncRead + Send + Unpin> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            let mut header = [0u8; FrameHeader::SIZE];
            match self.inner.read_exact(&mut header).await {
                Ok(_) => {}
                // Clean end of stream only between frames
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            let header = FrameHeader::parse(header)?;
            if header.kind == FrameKind::Keepalive {
                trace!("Skipping session keepalive");
                continue;
            }

            let mut body = BytesMut::zeroed(header.length as usize);
            self.inner.read_exact(&mut body).await.map_err(|e| {
                Error::TransportFailure(format!(
                    "stream ended inside a {}-byte frame: {}",
                    header.length, e
                ))
            })?;
            return Ok(Some(body.freeze()));
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin> PacketReader for FramedReader<R> {
    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        self.read_frame().await
    }
}

/// Writes direct-TCP frames to a byte stream
pub struct FramedWriter<W> {
    inner: W,
    connected: bool,
}

impl<W: AsyncWrite + Send + Unpin> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            connected: true,
        }
    }

    pub async fn write_frame(&mut self, packet: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::TransportFailure("Not connected".to_string()));
        }
        let header = FrameHeader::message(packet.len())?;
        self.inner.write_all(&header.to_bytes()).await?;
        self.inner.write_all(packet).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> PacketWriter for FramedWriter<W> {
    async fn write_packet(&mut self, packet: Bytes) -> Result<()> {
        self.write_frame(&packet).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            self.inner.shutdown().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// TCP transport for SMB protocol
pub struct TcpTransport {
    stream: Option<TcpStream>,
    remote_addr: Option<SocketAddr>,
}

impl TcpTransport {
    /// Create a new, unconnected TCP transport
    pub fn new() -> Self {
        Self {
            stream: None,
            remote_addr: None,
        }
    }

    /// Create a TCP transport from an existing stream
    pub fn from_stream(stream: TcpStream) -> Self {
        let remote_addr = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            remote_addr,
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmbTransport for TcpTransport {
    async fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);
        self.remote_addr = Some(stream.peer_addr()?);
        self.stream = Some(stream);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn into_split(self: Box<Self>) -> Result<(Box<dyn PacketReader>, Box<dyn PacketWriter>)> {
        let stream = self
            .stream
            .ok_or_else(|| Error::InvalidState("Not connected".to_string()))?;
        let (read, write) = stream.into_split();
        Ok((
            Box::new(FramedReader::new(read)),
            Box::new(FramedWriter::new(write)),
        ))
    }
}
