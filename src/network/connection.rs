//! Connection handling for BlueRPC
//!
//! Drives one client through repeated request/response cycles:
//! read the endpoint and payload frames, dispatch, write the response,
//! and repeat until the peer goes away or a frame is malformed.

use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::{
    decode_endpoint_limited, decode_payload, encode_response, is_peer_reset, FramingError,
    DEFAULT_MAX_ENDPOINT_LEN, LENGTH_PREFIX_SIZE,
};
use crate::registry::EndpointRegistry;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
}

impl ConnectionError {
    /// Whether the peer simply went away
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::Io(e) => is_peer_reset(e),
            ConnectionError::Framing(e) => e.is_disconnect(),
        }
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the next endpoint and payload frames
    AwaitRequest,
    /// Running the endpoint handler
    Dispatch,
    /// Writing the response frame
    Respond,
    /// Connection has been closed
    Closed,
}

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub endpoint: String,
    pub payload: Bytes,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Requests decoded
    pub requests: u64,
    /// Responses written
    pub responses: u64,
    /// Requests naming an unregistered endpoint
    pub unknown_endpoints: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
}

/// One live client connection
pub struct Connection<S> {
    /// Printable peer address
    peer: String,
    /// The stream, buffered for the byte-wise payload scan
    stream: BufReader<S>,
    /// Longest accepted endpoint name frame
    max_endpoint_len: usize,
    /// Connection state
    state: ConnectionState,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            stream: BufReader::new(stream),
            max_endpoint_len: DEFAULT_MAX_ENDPOINT_LEN,
            state: ConnectionState::AwaitRequest,
            stats: ConnectionStats::default(),
        }
    }

    pub fn with_max_endpoint_len(mut self, max_endpoint_len: usize) -> Self {
        self.max_endpoint_len = max_endpoint_len;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Read the endpoint name frame followed by the payload frame
    pub async fn read_request(&mut self) -> ConnectionResult<Request> {
        self.state = ConnectionState::AwaitRequest;

        let endpoint = decode_endpoint_limited(&mut self.stream, self.max_endpoint_len).await?;
        tracing::debug!("Running endpoint {} for {}", endpoint, self.peer);
        let payload = decode_payload(&mut self.stream).await?;

        self.stats.requests += 1;
        self.stats.bytes_received += (LENGTH_PREFIX_SIZE + endpoint.len() + payload.len() + 1) as u64;

        Ok(Request { endpoint, payload })
    }

    /// Write a response frame
    pub async fn write_response(&mut self, payload: &[u8]) -> ConnectionResult<()> {
        self.state = ConnectionState::Respond;

        let frame = encode_response(payload)?;
        let stream = self.stream.get_mut();
        stream.write_all(&frame).await?;
        stream.flush().await?;

        self.stats.responses += 1;
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    /// Run one request/response cycle.
    ///
    /// Requests for unknown endpoints get no response at all.
    pub async fn handle_next(&mut self, registry: &EndpointRegistry) -> ConnectionResult<()> {
        let request = self.read_request().await?;

        self.state = ConnectionState::Dispatch;
        match registry.dispatch(&request.endpoint, request.payload).await {
            Some(response) => self.write_response(&response).await?,
            None => {
                self.stats.unknown_endpoints += 1;
                tracing::warn!(
                    "Ignoring request for unknown endpoint '{}' from {}",
                    request.endpoint,
                    self.peer
                );
            }
        }

        self.state = ConnectionState::AwaitRequest;
        Ok(())
    }

    /// Serve requests until the peer disconnects or a frame is malformed,
    /// then close the connection
    pub async fn serve(mut self, registry: &EndpointRegistry) -> ConnectionStats {
        tracing::info!("Handling client {}", self.peer);

        loop {
            if let Err(e) = self.handle_next(registry).await {
                log_client_error(&self.peer, &e);
                break;
            }
        }

        self.close().await;
        tracing::info!(
            "Closed connection to {}: {} requests, {} responses, {} unknown endpoints",
            self.peer,
            self.stats.requests,
            self.stats.responses,
            self.stats.unknown_endpoints
        );
        self.stats
    }

    /// Close the connection. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Err(e) = self.stream.get_mut().shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
        self.state = ConnectionState::Closed;
    }
}

/// Log why a client loop ended at the level its cause deserves
pub fn log_client_error(peer: &str, err: &ConnectionError) {
    match err {
        e if e.is_disconnect() => tracing::info!("Client {} disconnected", peer),
        ConnectionError::Framing(FramingError::Io(e)) | ConnectionError::Io(e) => {
            tracing::error!("Unexpected client error from {}: {:?}", peer, e)
        }
        ConnectionError::Framing(e) => tracing::warn!("Dropping client {}: {}", peer, e),
    }
}
