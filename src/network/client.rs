//! BlueRPC Client
//!
//! Calls endpoints on a server. A request to an endpoint the server does
//! not know gets no response, so [`Client::call`] would wait forever on one;
//! use [`Client::send_request`] when the endpoint may be missing.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::protocol::{decode_response, encode_endpoint, encode_payload, FramingError, PAYLOAD_TERMINATOR};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Payload contains a NUL byte at offset {0}")]
    NulInPayload(usize),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// BlueRPC Client
pub struct Client<S> {
    stream: S,
}

impl Client<TcpStream> {
    /// Connect to a server over TCP
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Write the endpoint and payload frames of one request
    pub async fn send_request(&mut self, endpoint: &str, payload: &[u8]) -> ClientResult<()> {
        if let Some(offset) = payload.iter().position(|&b| b == PAYLOAD_TERMINATOR) {
            return Err(ClientError::NulInPayload(offset));
        }

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_endpoint(endpoint)?);
        buf.extend_from_slice(&encode_payload(payload));

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        tracing::debug!("Sent request for endpoint {} ({} bytes)", endpoint, payload.len());
        Ok(())
    }

    /// Read one response frame
    pub async fn read_response(&mut self) -> ClientResult<Bytes> {
        Ok(decode_response(&mut self.stream).await?)
    }

    /// Send a request and wait for its response
    pub async fn call(&mut self, endpoint: &str, payload: &[u8]) -> ClientResult<Bytes> {
        self.send_request(endpoint, payload).await?;
        self.read_response().await
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
