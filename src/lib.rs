//! BlueRPC - Minimal endpoint RPC over stream sockets
//!
//! A server accepts connections on a listening socket, reads a request
//! made of an endpoint name and a payload, runs the handler registered for
//! that endpoint, and writes back a length-prefixed response.
//!
//! ```ignore
//! use bluerpc::network::{generate_service_id, Server, ServerConfig, TcpTransport};
//!
//! let config = ServerConfig::new("sensor-hub", generate_service_id());
//! let mut server = Server::new(config, TcpTransport::default())?;
//! server.register("echo", |payload| async move { anyhow::Ok(payload) })?;
//! server.start().await?;
//! ```

pub mod config;
pub mod discovery;
pub mod network;
pub mod protocol;
pub mod registry;

pub use network::{Client, Server, ServerConfig};
pub use protocol::Reply;
pub use registry::EndpointRegistry;
