//! Length-prefixed frame codec.
//!
//! Wire format, one request per connection:
//!
//! ```text
//! Request:  <u32 length, big endian><exactly length payload bytes>
//! Response: <u32 printable count, big endian>
//! ```
//!
//! All partial read/write bookkeeping lives in `send_exact` and the
//! receive helpers here. Callers never see a short transfer: either the
//! whole frame moved or a `FrameError` says why not.

use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix and of the response frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Transport failure while moving a frame.
#[derive(Debug)]
pub enum FrameError {
    /// Peer closed before sending any byte of a length prefix.
    Disconnected,
    /// Peer closed in the middle of a frame.
    Closed { expected: u64, transferred: u64 },
    /// Connection reset or aborted by the peer.
    Reset,
    /// Write to a socket whose read side is gone.
    BrokenPipe,
    /// Socket operation timed out at the OS level.
    TimedOut,
    /// Payload does not fit in the u32 length prefix.
    TooLarge(u64),
    /// Any other I/O error.
    Io(io::Error),
}

impl FrameError {
    /// True when the peer left cleanly before a frame started.
    ///
    /// Every other variant means a frame was cut short or the socket failed.
    pub fn is_clean_disconnect(&self) -> bool {
        matches!(self, FrameError::Disconnected)
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Disconnected => write!(f, "peer disconnected before sending a frame"),
            FrameError::Closed {
                expected,
                transferred,
            } => write!(
                f,
                "connection closed after {transferred} of {expected} bytes"
            ),
            FrameError::Reset => write!(f, "connection reset by peer"),
            FrameError::BrokenPipe => write!(f, "broken pipe"),
            FrameError::TimedOut => write!(f, "connection timed out"),
            FrameError::TooLarge(len) => {
                write!(f, "payload of {len} bytes exceeds the 32-bit length prefix")
            }
            FrameError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => FrameError::Reset,
            io::ErrorKind::BrokenPipe => FrameError::BrokenPipe,
            io::ErrorKind::TimedOut => FrameError::TimedOut,
            _ => FrameError::Io(e),
        }
    }
}

/// Write all of `buf`, looping over short writes.
pub async fn send_exact<W>(writer: &mut W, buf: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    while written < buf.len() {
        let n = writer.write(&buf[written..]).await?;
        if n == 0 {
            return Err(FrameError::Closed {
                expected: buf.len() as u64,
                transferred: written as u64,
            });
        }
        written += n;
    }
    writer.flush().await?;
    Ok(())
}

/// Read until `buf` is full or the peer closes. Returns bytes filled.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read exactly `buf.len()` bytes.
///
/// A zero-length read before the buffer is full is a failure, not an end
/// of stream.
pub async fn recv_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let filled = fill(reader, buf).await?;
    if filled < buf.len() {
        return Err(FrameError::Closed {
            expected: buf.len() as u64,
            transferred: filled as u64,
        });
    }
    Ok(())
}

/// Read a 4-byte network order length prefix.
pub async fn recv_length<R>(reader: &mut R) -> Result<u32, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    match fill(reader, &mut header).await? {
        0 => Err(FrameError::Disconnected),
        LENGTH_PREFIX_SIZE => Ok(u32::from_be_bytes(header)),
        n => Err(FrameError::Closed {
            expected: LENGTH_PREFIX_SIZE as u64,
            transferred: n as u64,
        }),
    }
}

/// Receive a length-prefixed payload, streaming it through `buf`.
///
/// `on_chunk` sees every payload byte exactly once, in order, in slices no
/// longer than `buf`. Nothing proportional to the declared length is
/// allocated. Returns the declared length.
pub async fn recv_length_prefixed<R, F>(
    reader: &mut R,
    buf: &mut [u8],
    on_declared: impl FnOnce(u32),
    mut on_chunk: F,
) -> Result<u32, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
    F: FnMut(&[u8]),
{
    let length = recv_length(reader).await?;
    on_declared(length);

    if length > 0 && buf.is_empty() {
        return Err(FrameError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "receive buffer is empty",
        )));
    }

    let mut remaining = length as usize;
    while remaining > 0 {
        let want = remaining.min(buf.len());
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(FrameError::Closed {
                expected: u64::from(length),
                transferred: (length as usize - remaining) as u64,
            });
        }
        on_chunk(&buf[..n]);
        remaining -= n;
    }

    Ok(length)
}

fn encode_u32(value: u32) -> BytesMut {
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE);
    frame.put_u32(value);
    frame
}

fn checked_length(len: u64) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::TooLarge(len))
}

/// Send an in-memory payload as a Request Frame.
pub async fn send_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let length = checked_length(payload.len() as u64)?;
    send_exact(writer, &encode_u32(length)).await?;
    send_exact(writer, payload).await
}

/// Send `len` bytes from `source` as a Request Frame, `buf.len()` at a time.
///
/// The chunk size only changes write granularity; the wire length is `len`.
pub async fn send_frame_from<W, S>(
    writer: &mut W,
    source: &mut S,
    len: u64,
    buf: &mut [u8],
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
    S: AsyncRead + Unpin + ?Sized,
{
    let length = checked_length(len)?;
    if length > 0 && buf.is_empty() {
        return Err(FrameError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "send buffer is empty",
        )));
    }

    send_exact(writer, &encode_u32(length)).await?;

    let mut remaining = length as usize;
    while remaining > 0 {
        let want = remaining.min(buf.len());
        let n = source.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(FrameError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended with {remaining} bytes still declared"),
            )));
        }
        send_exact(writer, &buf[..n]).await?;
        remaining -= n;
    }

    Ok(())
}

/// Send a Response Frame carrying the printable count.
pub async fn send_count<W>(writer: &mut W, count: u32) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    send_exact(writer, &encode_u32(count)).await
}

/// Receive a Response Frame.
pub async fn recv_count<R>(reader: &mut R) -> Result<u32, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut frame = [0u8; LENGTH_PREFIX_SIZE];
    recv_exact(reader, &mut frame).await?;
    Ok(u32::from_be_bytes(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_recv_length_across_partial_reads() {
        let mut mock = Builder::new().read(&[0, 0]).read(&[0]).read(&[13]).build();
        assert_eq!(recv_length(&mut mock).await.unwrap(), 13);
    }

    #[tokio::test]
    async fn test_recv_length_clean_disconnect() {
        let mut mock = Builder::new().build();
        let err = recv_length(&mut mock).await.unwrap_err();
        assert!(err.is_clean_disconnect());
    }

    #[tokio::test]
    async fn test_recv_length_truncated_prefix() {
        let mut mock = Builder::new().read(&[0, 0]).build();
        let err = recv_length(&mut mock).await.unwrap_err();
        assert!(!err.is_clean_disconnect());
        assert!(matches!(
            err,
            FrameError::Closed {
                expected: 4,
                transferred: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_recv_payload_in_bounded_chunks() {
        let mut mock = Builder::new()
            .read(&[0, 0, 0, 11])
            .read(b"hel")
            .read(b"lo wo")
            .read(b"rld")
            .build();

        let mut buf = [0u8; 4];
        let mut declared = None;
        let mut received = Vec::new();
        let mut largest = 0;

        let length = recv_length_prefixed(
            &mut mock,
            &mut buf,
            |len| declared = Some(len),
            |chunk| {
                largest = largest.max(chunk.len());
                received.extend_from_slice(chunk);
            },
        )
        .await
        .unwrap();

        assert_eq!(length, 11);
        assert_eq!(declared, Some(11));
        assert_eq!(received, b"hello world");
        assert!(largest <= 4);
    }

    #[tokio::test]
    async fn test_recv_empty_payload() {
        let mut mock = Builder::new().read(&[0, 0, 0, 0]).build();
        let mut buf = [0u8; 8];
        let mut chunks = 0;
        let length = recv_length_prefixed(&mut mock, &mut buf, |_| {}, |_| chunks += 1)
            .await
            .unwrap();
        assert_eq!(length, 0);
        assert_eq!(chunks, 0);
    }

    #[tokio::test]
    async fn test_recv_payload_premature_close() {
        let mut mock = Builder::new().read(&[0, 0, 0, 10]).read(b"abc").build();
        let mut buf = [0u8; 16];
        let err = recv_length_prefixed(&mut mock, &mut buf, |_| {}, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::Closed {
                expected: 10,
                transferred: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_recv_payload_reset() {
        let mut mock = Builder::new()
            .read(&[0, 0, 0, 4])
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        let mut buf = [0u8; 16];
        let err = recv_length_prefixed(&mut mock, &mut buf, |_| {}, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Reset));
    }

    #[tokio::test]
    async fn test_recv_stops_at_declared_length() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 0, 3]).await.unwrap();
        a.write_all(b"abcEXTRA").await.unwrap();
        drop(a);

        let mut buf = [0u8; 16];
        let mut payload = Vec::new();
        let length = recv_length_prefixed(&mut b, &mut buf, |_| {}, |chunk| {
            payload.extend_from_slice(chunk)
        })
        .await
        .unwrap();

        let mut rest = Vec::new();
        b.read_to_end(&mut rest).await.unwrap();

        assert_eq!(length, 3);
        assert_eq!(payload, b"abc");
        assert_eq!(rest, b"EXTRA");
    }

    #[tokio::test]
    async fn test_length_prefix_survives_the_wire() {
        let (mut a, mut b) = tokio::io::duplex(64);
        for length in [0, 1, 0x0102_0304, u32::MAX] {
            send_exact(&mut a, &encode_u32(length)).await.unwrap();
            assert_eq!(recv_length(&mut b).await.unwrap(), length);
        }
    }

    #[tokio::test]
    async fn test_send_frame_with_short_writes() {
        let mut mock = Builder::new()
            .write(&[0, 0])
            .write(&[0, 3])
            .write(b"a")
            .write(b"bc")
            .build();
        send_frame(&mut mock, b"abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_count_broken_pipe() {
        let mut mock = Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();
        let err = send_count(&mut mock, 5).await.unwrap_err();
        assert!(matches!(err, FrameError::BrokenPipe));
    }

    #[tokio::test]
    async fn test_send_frame_from_streams_source() {
        let mut source: &[u8] = b"hello world";
        let mut out: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4];

        send_frame_from(&mut out, &mut source, 11, &mut buf)
            .await
            .unwrap();

        assert_eq!(&out[..4], &[0, 0, 0, 11]);
        assert_eq!(&out[4..], b"hello world");
    }

    #[tokio::test]
    async fn test_send_frame_from_short_source() {
        let mut source: &[u8] = b"abc";
        let mut out: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4];

        let err = send_frame_from(&mut out, &mut source, 5, &mut buf)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_send_frame_from_rejects_oversized_length() {
        let mut source: &[u8] = b"";
        let mut out: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4];
        let len = u64::from(u32::MAX) + 1;

        let err = send_frame_from(&mut out, &mut source, len, &mut buf)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(n) if n == len));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_count_survives_the_wire() {
        let (mut a, mut b) = tokio::io::duplex(64);
        for count in [0, 1, 0x0102_0304, u32::MAX] {
            send_count(&mut a, count).await.unwrap();
            assert_eq!(recv_count(&mut b).await.unwrap(), count);
        }
    }
}
