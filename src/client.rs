//! Client side of the counting protocol.
//!
//! Stateless: open the file, connect, send one Request Frame, read the
//! Response Frame.

use crate::protocol::{recv_count, send_frame, send_frame_from, FrameError};
use bytes::BytesMut;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::net::TcpStream;
use tracing::debug;

/// Client request failures
#[derive(Debug)]
pub enum ClientError {
    Open(PathBuf, io::Error),
    Connect(SocketAddr, io::Error),
    Frame(FrameError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Open(path, e) => {
                write!(f, "couldn't open '{}': {}", path.display(), e)
            }
            ClientError::Connect(addr, e) => write!(f, "couldn't connect to {addr}: {e}"),
            ClientError::Frame(e) => write!(f, "transfer failed: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Open(_, e) | ClientError::Connect(_, e) => Some(e),
            ClientError::Frame(e) => Some(e),
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(e: FrameError) -> Self {
        ClientError::Frame(e)
    }
}

async fn connect(addr: SocketAddr) -> Result<TcpStream, ClientError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ClientError::Connect(addr, e))?;
    debug!(server = %addr, "Connected");
    Ok(stream)
}

/// Send the contents of `path` and return the server's printable count.
///
/// The file is streamed `buffer_size` bytes at a time. Files larger than
/// `u32::MAX` bytes are rejected before anything is written.
pub async fn count_file(
    addr: SocketAddr,
    path: &Path,
    buffer_size: NonZeroUsize,
) -> Result<u32, ClientError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| ClientError::Open(path.to_path_buf(), e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ClientError::Open(path.to_path_buf(), e))?
        .len();
    if u32::try_from(len).is_err() {
        return Err(FrameError::TooLarge(len).into());
    }

    let mut stream = connect(addr).await?;
    let mut buf = BytesMut::zeroed(buffer_size.get());

    send_frame_from(&mut stream, &mut file, len, &mut buf).await?;
    debug!(bytes = len, "File sent");

    Ok(recv_count(&mut stream).await?)
}

/// Send an in-memory payload and return the server's printable count.
pub async fn count_bytes(addr: SocketAddr, payload: &[u8]) -> Result<u32, ClientError> {
    let mut stream = connect(addr).await?;
    send_frame(&mut stream, payload).await?;
    Ok(recv_count(&mut stream).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Single-shot peer that checks the frame and answers with `reply`.
    async fn one_shot_peer(expected: &'static [u8], reply: u32) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 4];
            crate::protocol::recv_exact(&mut stream, &mut header)
                .await
                .unwrap();
            assert_eq!(u32::from_be_bytes(header) as usize, expected.len());
            let mut payload = vec![0u8; expected.len()];
            crate::protocol::recv_exact(&mut stream, &mut payload)
                .await
                .unwrap();
            assert_eq!(payload, expected);
            stream.write_all(&reply.to_be_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_count_bytes() {
        let addr = one_shot_peer(b"A\tB\nC", 3).await;
        assert_eq!(count_bytes(addr, b"A\tB\nC").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_count_file_streams_in_chunks() {
        let path = std::env::temp_dir().join(format!("pcc-client-{}.txt", std::process::id()));
        std::fs::write(&path, b"Hello, World!").unwrap();

        let addr = one_shot_peer(b"Hello, World!", 13).await;
        let count = count_file(addr, &path, NonZeroUsize::new(3).unwrap()).await;
        std::fs::remove_file(&path).unwrap();

        assert_eq!(count.unwrap(), 13);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = count_file(
            addr,
            Path::new("/nonexistent/pcc/input"),
            NonZeroUsize::new(16).unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Open(..)));
    }

    #[tokio::test]
    async fn test_server_closes_without_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let err = count_bytes(addr, b"").await.unwrap_err();
        assert!(matches!(err, ClientError::Frame(_)));
    }
}
