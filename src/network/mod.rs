//! Network module - Serves endpoint requests over stream sockets
//!
//! Provides:
//! - Server owning the listening socket and the accept loop
//! - Connection driving one client through request/response cycles
//! - Client for calling endpoints on a server
//! - The listening-socket abstraction and its TCP implementation

mod client;
mod connection;
mod server;

pub use client::*;
pub use connection::*;
pub use server::*;

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::protocol::DEFAULT_MAX_ENDPOINT_LEN;

/// Port value asking the transport for any available port
pub const PORT_ANY: u16 = 0;

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 1;

/// Configuration consumed by the [`Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name the service is advertised under
    pub service_name: String,
    /// Identifier the service is advertised with
    pub service_id: String,
    /// Port to listen on, [`PORT_ANY`] for any available
    pub port: u16,
    /// Pending connection backlog
    pub backlog: u32,
    /// Longest accepted endpoint name frame
    pub max_endpoint_len: usize,
}

impl ServerConfig {
    pub fn new(service_name: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_id: service_id.into(),
            port: PORT_ANY,
            backlog: DEFAULT_BACKLOG,
            max_endpoint_len: DEFAULT_MAX_ENDPOINT_LEN,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_max_endpoint_len(mut self, max_endpoint_len: usize) -> Self {
        self.max_endpoint_len = max_endpoint_len;
        self
    }
}

/// Generate a fresh unique service identifier
pub fn generate_service_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Provider of listening sockets
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Listener: Listener;

    /// Bind to `port` and start listening with `backlog` pending connections
    async fn bind(&self, port: u16, backlog: u32) -> io::Result<Self::Listener>;

    /// Address of the local device on this transport
    fn local_address(&self) -> io::Result<String>;
}

/// A bound, listening socket
#[async_trait]
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection, returning it with a printable peer address
    async fn accept(&mut self) -> io::Result<(Self::Stream, String)>;

    /// Port actually bound
    fn local_port(&self) -> io::Result<u16>;
}

/// TCP listening-socket provider
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_address: IpAddr,
    local_address: Option<String>,
}

impl TcpTransport {
    pub fn new(bind_address: IpAddr) -> Self {
        Self {
            bind_address,
            local_address: None,
        }
    }

    /// Report `address` as the local address instead of deriving one
    pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }

    /// Loopback-only transport, handy for local testing
    pub fn localhost() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Listener = TcpListener;

    async fn bind(&self, port: u16, backlog: u32) -> io::Result<TcpListener> {
        let addr = SocketAddr::new(self.bind_address, port);
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(backlog)
    }

    fn local_address(&self) -> io::Result<String> {
        if let Some(address) = &self.local_address {
            Ok(address.clone())
        } else if self.bind_address.is_unspecified() {
            Ok(hostname::get()?.to_string_lossy().to_string())
        } else {
            Ok(self.bind_address.to_string())
        }
    }
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        Ok((stream, addr.to_string()))
    }

    fn local_port(&self) -> io::Result<u16> {
        Ok(self.local_addr()?.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::new("svc", "id-1");
        assert_eq!(config.port, PORT_ANY);
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.max_endpoint_len, DEFAULT_MAX_ENDPOINT_LEN);

        let config = config.with_port(4000).with_backlog(8);
        assert_eq!(config.port, 4000);
        assert_eq!(config.backlog, 8);
    }

    #[test]
    fn test_generated_service_ids_are_unique() {
        let a = generate_service_id();
        let b = generate_service_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn test_tcp_transport_binds_any_port() {
        let transport = TcpTransport::localhost();
        let listener = transport.bind(PORT_ANY, 4).await.unwrap();
        assert_ne!(listener.local_port().unwrap(), 0);
        assert_eq!(transport.local_address().unwrap(), "127.0.0.1");
    }

    #[test]
    fn test_local_address_override() {
        let transport = TcpTransport::default().with_local_address("00:1A:7D:DA:71:13");
        assert_eq!(transport.local_address().unwrap(), "00:1A:7D:DA:71:13");
    }
}
