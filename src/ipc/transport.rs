//! Frame transport over a byte stream.
//!
//! Splits a connection into a reader that yields whole frames and a writer
//! that serialises frame writes behind a lock, so concurrent senders never
//! interleave bytes mid-frame.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::frame::FrameCodec;
use crate::error::{ClutchError, Result};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half: produces complete frame bodies.
pub struct FrameReader {
    inner: FramedRead<BoxedReader, FrameCodec>,
}

impl FrameReader {
    /// Wait for the next complete frame.
    ///
    /// End of stream is reported as `ConnectionClosed`, never as an empty frame.
    pub async fn next_frame(&mut self) -> Result<Bytes> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(classify(e)),
            None => Err(ClutchError::ConnectionClosed),
        }
    }
}

/// Write half: one frame at a time.
pub struct FrameWriter {
    inner: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
}

impl FrameWriter {
    /// Write and flush one frame. Holds the write lock for the whole frame.
    pub async fn send(&self, body: Bytes) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.send(body).await.map_err(classify)
    }

    /// Flush and close the write side.
    pub async fn shutdown(&self) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.close().await.map_err(classify)
    }
}

/// Split a stream into frame reader/writer halves.
pub fn split<S>(stream: S, max_frame_length: usize) -> (FrameReader, FrameWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader: BoxedReader = Box::new(read_half);
    let writer: BoxedWriter = Box::new(write_half);
    (
        FrameReader {
            inner: FramedRead::new(reader, FrameCodec::with_max_length(max_frame_length)),
        },
        FrameWriter {
            inner: Mutex::new(FramedWrite::new(writer, FrameCodec::with_max_length(max_frame_length))),
        },
    )
}

/// Map socket-level disconnects onto `ConnectionClosed`.
fn classify(err: ClutchError) -> ClutchError {
    match err {
        ClutchError::Io(ref io)
            if matches!(
                io.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ) =>
        {
            ClutchError::ConnectionClosed
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_send_and_receive_frame() {
        let (client, server) = tokio::io::duplex(1024);
        let (_client_reader, client_writer) = split(client, 1024);
        let (mut server_reader, _server_writer) = split(server, 1024);

        client_writer.send(Bytes::from_static(b"l4:noopdei1ee")).await.unwrap();
        let frame = server_reader.next_frame().await.unwrap();
        assert_eq!(&frame[..], b"l4:noopdei1ee");
    }

    #[tokio::test]
    async fn test_partial_reads_reassemble() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (mut reader, _writer) = split(client, 1024);

        let task = tokio::spawn(async move { reader.next_frame().await });
        server.write_all(b"000000").await.unwrap();
        server.flush().await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(b"04i1").await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(b"2e").await.unwrap();

        let frame = task.await.unwrap().unwrap();
        assert_eq!(&frame[..], b"i12e");
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(client, 64);
        drop(server);
        assert!(matches!(reader.next_frame().await, Err(ClutchError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_connection_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(client, 64);
        server.write_all(b"00000009i1").await.unwrap();
        drop(server);
        assert!(matches!(reader.next_frame().await, Err(ClutchError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let (client, server) = tokio::io::duplex(64);
        let (_r, writer) = split(client, 4096);
        let (mut reader, _w) = split(server, 4096);
        let writer = std::sync::Arc::new(writer);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let writer = std::sync::Arc::clone(&writer);
            handles.push(tokio::spawn(async move {
                let body = vec![b'a' + i; 500];
                writer.send(Bytes::from(body)).await.unwrap();
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..8 {
            let frame = reader.next_frame().await.unwrap();
            assert_eq!(frame.len(), 500);
            assert!(frame.iter().all(|&b| b == frame[0]), "frame bytes interleaved");
            seen.push(frame[0]);
        }
        for handle in handles {
            handle.await.unwrap();
        }
        seen.sort();
        assert_eq!(seen, (0..8u8).map(|i| b'a' + i).collect::<Vec<_>>());
    }
}
