use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::envelope::{CallEnvelope, CallResult};
use crate::protocol::error::{OffloadError, Result};
use crate::protocol::tags::Tag;
use crate::transport::codec::{JsonCodec, ENVELOPE_FIELDS, RESULT_FIELDS};

/// Default timeout for connecting (5 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frame size (100 MB)
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Synchronous frame transport (used by the execution host).
///
/// # Wire Protocol
///
/// Each message starts with a one-byte [`Tag`]. Variable-size fields follow as
/// frames: a 4-byte big-endian length and exactly that many bytes.
///
/// ```text
/// [tag: i8] [4-byte length] [data] [4-byte length] [data] ...
/// ```
///
/// Reading a tag at end of stream yields [`Tag::ConnectionReleased`]; running
/// out of bytes inside a frame is a protocol error.
pub struct TcpTransport;

impl TcpTransport {
    /// Connects to a remote endpoint, trying each resolved address in turn.
    pub fn connect(addr: &str) -> Result<TcpStream> {
        let socket_addrs = addr
            .to_socket_addrs()
            .map_err(|e| OffloadError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect_timeout(&socket_addr, DEFAULT_CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(OffloadError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    /// Reads one tag byte. EOF maps to [`Tag::ConnectionReleased`].
    pub fn read_tag<R: Read>(stream: &mut R) -> Result<Tag> {
        let mut buf = [0u8; 1];
        match stream.read_exact(&mut buf) {
            Ok(()) => Tag::try_from(buf[0] as i8),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(Tag::ConnectionReleased),
            Err(e) => Err(map_io_error(e, "reading tag")),
        }
    }

    /// Writes one tag byte and flushes.
    pub fn write_tag<W: Write>(stream: &mut W, tag: Tag) -> Result<()> {
        stream
            .write_all(&[tag.as_byte() as u8])
            .map_err(|e| map_io_error(e, "writing tag"))?;
        stream.flush().map_err(|e| map_io_error(e, "flushing stream"))
    }

    /// Sends a frame with length prefix.
    ///
    /// Wire format: `[4-byte length as u32 big-endian] + [data]`
    pub fn send_frame<W: Write>(stream: &mut W, data: &[u8]) -> Result<()> {
        let len = frame_len(data)?;

        stream
            .write_all(&len.to_be_bytes())
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .map_err(|e| map_io_error(e, "writing data"))?;
        stream.flush().map_err(|e| map_io_error(e, "flushing stream"))
    }

    /// Receives a frame with length prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends inside the frame or the announced
    /// length exceeds [`MAX_FRAME_SIZE`].
    pub fn receive_frame<R: Read>(stream: &mut R) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .map_err(|e| map_io_error(e, "reading length prefix"))?;

        let len = checked_len(len_buf)?;

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .map_err(|e| map_io_error(e, "reading data"))?;

        Ok(buf)
    }

    pub fn send_string<W: Write>(stream: &mut W, value: &str) -> Result<()> {
        Self::send_frame(stream, value.as_bytes())
    }

    pub fn receive_string<R: Read>(stream: &mut R) -> Result<String> {
        Ok(String::from_utf8(Self::receive_frame(stream)?)?)
    }

    /// Reads the five envelope fields in wire order.
    pub fn receive_envelope<R: Read>(stream: &mut R) -> Result<CallEnvelope> {
        let mut fields: [Vec<u8>; ENVELOPE_FIELDS] = Default::default();
        for field in fields.iter_mut() {
            *field = Self::receive_frame(stream)?;
        }
        JsonCodec::decode_envelope(fields)
    }

    /// Writes the two result fields in wire order.
    pub fn send_result<W: Write>(stream: &mut W, result: &CallResult) -> Result<()> {
        for field in JsonCodec::encode_result(result)? {
            Self::send_frame(stream, &field)?;
        }
        Ok(())
    }
}

/// Async frame transport (used by the gateway, session bridge and client).
///
/// Same wire format as [`TcpTransport`]. All methods are generic over the
/// stream so they work on whole sockets and on split halves.
pub struct TcpTransportAsync;

impl TcpTransportAsync {
    /// Reads one tag byte. EOF maps to [`Tag::ConnectionReleased`].
    ///
    /// A single-byte read either completes or consumes nothing, so this
    /// future may be dropped inside `select!` without losing data.
    pub async fn read_tag<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Tag> {
        let mut buf = [0u8; 1];
        match stream.read(&mut buf).await {
            Ok(0) => Ok(Tag::ConnectionReleased),
            Ok(_) => Tag::try_from(buf[0] as i8),
            Err(e) => Err(map_io_error(e, "reading tag")),
        }
    }

    /// Writes one tag byte and flushes.
    pub async fn write_tag<W: AsyncWrite + Unpin>(stream: &mut W, tag: Tag) -> Result<()> {
        stream
            .write_all(&[tag.as_byte() as u8])
            .await
            .map_err(|e| map_io_error(e, "writing tag"))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))
    }

    /// Sends a frame with length prefix (async).
    pub async fn send_frame<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
        let len = frame_len(data)?;

        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))
    }

    /// Receives a frame with length prefix (async).
    pub async fn receive_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| map_io_error(e, "reading length prefix"))?;

        let len = checked_len(len_buf)?;

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading data"))?;

        Ok(buf)
    }

    /// Copies one frame from `from` to `to` without interpreting it.
    ///
    /// Returns the number of payload bytes relayed.
    pub async fn relay_frame<R, W>(from: &mut R, to: &mut W) -> Result<usize>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let frame = Self::receive_frame(from).await?;
        Self::send_frame(to, &frame).await?;
        Ok(frame.len())
    }

    pub async fn send_string<W: AsyncWrite + Unpin>(stream: &mut W, value: &str) -> Result<()> {
        Self::send_frame(stream, value.as_bytes()).await
    }

    pub async fn receive_string<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String> {
        Ok(String::from_utf8(Self::receive_frame(stream).await?)?)
    }

    /// Writes the five envelope fields in wire order.
    pub async fn send_envelope<W: AsyncWrite + Unpin>(
        stream: &mut W,
        envelope: &CallEnvelope,
    ) -> Result<()> {
        for field in JsonCodec::encode_envelope(envelope)? {
            Self::send_frame(stream, &field).await?;
        }
        Ok(())
    }

    /// Reads the five envelope fields in wire order.
    pub async fn receive_envelope<R: AsyncRead + Unpin>(stream: &mut R) -> Result<CallEnvelope> {
        let mut fields: [Vec<u8>; ENVELOPE_FIELDS] = Default::default();
        for field in fields.iter_mut() {
            *field = Self::receive_frame(stream).await?;
        }
        JsonCodec::decode_envelope(fields)
    }

    pub async fn send_result<W: AsyncWrite + Unpin>(stream: &mut W, result: &CallResult) -> Result<()> {
        for field in JsonCodec::encode_result(result)? {
            Self::send_frame(stream, &field).await?;
        }
        Ok(())
    }

    /// Reads the two result fields in wire order.
    pub async fn receive_result<R: AsyncRead + Unpin>(stream: &mut R) -> Result<CallResult> {
        let mut fields: [Vec<u8>; RESULT_FIELDS] = Default::default();
        for field in fields.iter_mut() {
            *field = Self::receive_frame(stream).await?;
        }
        JsonCodec::decode_result(fields)
    }
}

fn frame_len(data: &[u8]) -> Result<u32> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(OffloadError::Protocol(format!(
            "Frame too large: {} bytes (max {} bytes)",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }
    Ok(data.len() as u32)
}

fn checked_len(len_buf: [u8; 4]) -> Result<usize> {
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(OffloadError::Protocol(format!(
            "Frame too large: {} bytes (max {} bytes)",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(len)
}

/// Map IO errors to appropriate OffloadError variants
///
/// - Timeouts/would block -> `Timeout`
/// - EOF inside a frame -> `Protocol` (truncated frame)
/// - Connection errors -> `Connection`
/// - Other IO errors -> `Io`
fn map_io_error(err: std::io::Error, context: &str) -> OffloadError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            OffloadError::Timeout(DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)
        }
        std::io::ErrorKind::UnexpectedEof => {
            OffloadError::Protocol(format!("{}: truncated frame", context))
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected => {
            OffloadError::Connection(format!("{}: Connection lost", context))
        }
        _ => OffloadError::Io(err),
    }
}
