//! Frame codec for the three wire primitives
//!
//! Endpoint name frames and response frames are length-prefixed. Request
//! payload frames are NUL-terminated.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use super::{DEFAULT_MAX_ENDPOINT_LEN, LENGTH_PREFIX_SIZE, PAYLOAD_TERMINATOR};

/// Framing errors
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("Stream closed")]
    Closed,

    #[error("Truncated frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Stream closed before payload terminator after {received} bytes")]
    MissingTerminator { received: usize },

    #[error("Endpoint name is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Frame too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    /// Whether this failure means the peer went away rather than sent garbage
    pub fn is_disconnect(&self) -> bool {
        match self {
            FramingError::Closed => true,
            FramingError::Io(e) => is_peer_reset(e),
            _ => false,
        }
    }
}

pub type FramingResult<T> = Result<T, FramingError>;

/// Whether an I/O error is the "connection reset by peer" condition
pub fn is_peer_reset(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionReset
}

/// Encode an endpoint name frame (client side)
pub fn encode_endpoint(name: &str) -> FramingResult<Bytes> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + name.len());
    put_length_prefixed(&mut buf, name.as_bytes())?;
    Ok(buf.freeze())
}

/// Decode an endpoint name frame using the default length cap
pub async fn decode_endpoint<R>(reader: &mut R) -> FramingResult<String>
where
    R: AsyncRead + Unpin,
{
    decode_endpoint_limited(reader, DEFAULT_MAX_ENDPOINT_LEN).await
}

/// Decode an endpoint name frame, rejecting declared lengths above `max_len`
pub async fn decode_endpoint_limited<R>(reader: &mut R, max_len: usize) -> FramingResult<String>
where
    R: AsyncRead + Unpin,
{
    let length = read_length_prefix(reader).await?;
    if length > max_len {
        return Err(FramingError::TooLarge(length, max_len));
    }

    let name = read_exact_body(reader, length).await?;
    Ok(String::from_utf8(name)?)
}

/// Decode a NUL-terminated payload frame, returning the bytes before the terminator
pub async fn decode_payload<R>(reader: &mut R) -> FramingResult<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    let mut data = Vec::new();
    let received = reader.read_until(PAYLOAD_TERMINATOR, &mut data).await?;

    match data.last() {
        Some(&PAYLOAD_TERMINATOR) => {
            data.pop();
            Ok(Bytes::from(data))
        }
        _ => Err(FramingError::MissingTerminator { received }),
    }
}

/// Encode a payload frame (client side). The payload must not contain NUL.
pub fn encode_payload(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(PAYLOAD_TERMINATOR);
    buf.freeze()
}

/// Encode a response frame: length prefix followed by the payload, no terminator
pub fn encode_response(payload: &[u8]) -> FramingResult<Bytes> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    put_length_prefixed(&mut buf, payload)?;
    Ok(buf.freeze())
}

/// Decode a response frame (client side)
pub async fn decode_response<R>(reader: &mut R) -> FramingResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let length = read_length_prefix(reader).await?;
    let body = read_exact_body(reader, length).await?;
    Ok(Bytes::from(body))
}

fn put_length_prefixed(buf: &mut BytesMut, data: &[u8]) -> FramingResult<()> {
    let length = u32::try_from(data.len())
        .map_err(|_| FramingError::TooLarge(data.len(), u32::MAX as usize))?;
    buf.put_u32_le(length);
    buf.put_slice(data);
    Ok(())
}

async fn read_length_prefix<R>(reader: &mut R) -> FramingResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;

    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            // Nothing read at all means the peer closed between requests
            return Err(if filled == 0 {
                FramingError::Closed
            } else {
                FramingError::Truncated {
                    expected: LENGTH_PREFIX_SIZE,
                    received: filled,
                }
            });
        }
        filled += n;
    }

    Ok(u32::from_le_bytes(prefix) as usize)
}

async fn read_exact_body<R>(reader: &mut R, length: usize) -> FramingResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    // Grow as bytes arrive instead of trusting the declared length up front
    let mut body = Vec::with_capacity(length.min(64 * 1024));
    let received = (&mut *reader).take(length as u64).read_to_end(&mut body).await?;

    if received < length {
        return Err(FramingError::Truncated {
            expected: length,
            received,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_endpoint_roundtrip() {
        let long = "x".repeat(1000);
        for name in ["", "echo", "ünïcödé-endpoint", long.as_str()] {
            let frame = encode_endpoint(name).unwrap();
            assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + name.len());

            let mut reader = &frame[..];
            let decoded = decode_endpoint(&mut reader).await.unwrap();
            assert_eq!(decoded, name);
            assert!(reader.is_empty());
        }
    }

    #[tokio::test]
    async fn test_endpoint_prefix_is_little_endian() {
        let frame = encode_endpoint("echo").unwrap();
        assert_eq!(&frame[..4], &[4, 0, 0, 0]);
        assert_eq!(&frame[4..], b"echo");
    }

    #[tokio::test]
    async fn test_endpoint_truncated_body() {
        let mut reader: &[u8] = &[10, 0, 0, 0, b'e', b'c'];
        match decode_endpoint(&mut reader).await {
            Err(FramingError::Truncated { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 2);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_endpoint_truncated_prefix() {
        let mut reader: &[u8] = &[4, 0];
        let err = decode_endpoint(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::Truncated { expected: 4, received: 2 }));
        assert!(!err.is_disconnect());
    }

    #[tokio::test]
    async fn test_endpoint_clean_close() {
        let mut reader: &[u8] = &[];
        let err = decode_endpoint(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::Closed));
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_endpoint_invalid_utf8() {
        let mut reader: &[u8] = &[2, 0, 0, 0, 0xff, 0xfe];
        let err = decode_endpoint(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::InvalidUtf8(_)));
    }

    #[tokio::test]
    async fn test_endpoint_length_cap() {
        let mut reader: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        let err = decode_endpoint_limited(&mut reader, 16).await.unwrap_err();
        assert!(matches!(err, FramingError::TooLarge(0xffff_ffff, 16)));
    }

    #[tokio::test]
    async fn test_payload_decode() {
        let mut reader: &[u8] = b"hello\x00";
        let payload = decode_payload(&mut reader).await.unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_payload_empty() {
        let mut reader: &[u8] = b"\x00";
        let payload = decode_payload(&mut reader).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_payload_stops_at_first_terminator() {
        let mut reader: &[u8] = b"first\x00second\x00";
        assert_eq!(&decode_payload(&mut reader).await.unwrap()[..], b"first");
        assert_eq!(&decode_payload(&mut reader).await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn test_payload_missing_terminator() {
        let mut reader: &[u8] = b"hel";
        let err = decode_payload(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::MissingTerminator { received: 3 }));
    }

    #[tokio::test]
    async fn test_response_roundtrip_sizes() {
        let large: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

        for payload in [Vec::new(), vec![0u8], large] {
            let frame = encode_response(&payload).unwrap();
            assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + payload.len());

            let mut reader = &frame[..];
            let decoded = decode_response(&mut reader).await.unwrap();
            assert_eq!(&decoded[..], &payload[..]);
        }
    }

    #[test]
    fn test_response_has_no_terminator() {
        let frame = encode_response(b"ping").unwrap();
        assert_eq!(&frame[..], &[4, 0, 0, 0, b'p', b'i', b'n', b'g']);
    }

    #[test]
    fn test_encode_payload_appends_terminator() {
        assert_eq!(&encode_payload(b"ping")[..], b"ping\x00");
    }

    #[test]
    fn test_peer_reset_is_disconnect() {
        let reset = FramingError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_disconnect());

        let other = FramingError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!other.is_disconnect());
    }
}
