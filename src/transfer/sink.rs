//! Transport sinks for export byte streams
//!
//! A sink receives encoded chunks in order. [`ChannelSink`] feeds an HTTP
//! response body through a bounded channel, [`FileSink`] writes a local file,
//! and [`GzipSink`] compresses in front of either.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::Stream;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransferError};

/// Destination for export bytes
#[async_trait]
pub trait ByteSink: Send {
    /// Deliver one chunk; fails with [`TransferError::ClientDisconnected`]
    /// once the receiving side is gone.
    async fn send(&mut self, chunk: Bytes) -> Result<()>;

    /// Whether the remote peer has gone away
    fn is_closed(&self) -> bool;

    /// Flush and release the sink
    async fn finish(&mut self) -> Result<()>;
}

/// Item type carried to the HTTP body
pub type BodyChunk = std::result::Result<Bytes, std::io::Error>;

/// Sink feeding a bounded channel drained by an HTTP response body
pub struct ChannelSink {
    tx: mpsc::Sender<BodyChunk>,
}

impl ChannelSink {
    /// Create a sink and the stream that yields its chunks
    ///
    /// Dropping the stream (the client went away) closes the sink.
    ///
    /// # Arguments
    /// * `capacity` - Chunks buffered before `write` waits for the reader
    ///
    /// # Returns
    /// * `(ChannelSink, impl Stream)` - The sink and the body stream that drains it
    pub fn channel(capacity: usize) -> (Self, impl Stream<Item = BodyChunk> + Send + 'static) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
        (Self { tx }, stream)
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| TransferError::ClientDisconnected.into())
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink writing to a local file
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    bytes_written: u64,
}

impl FileSink {
    /// Create (or truncate) the file at `path`; its directory must exist
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        debug!("Created export file: {}", path.display());

        Ok(Self {
            writer: BufWriter::with_capacity(1024 * 1024, file),
            path,
            bytes_written: 0,
        })
    }

    /// Path being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[async_trait]
impl ByteSink for FileSink {
    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        self.writer.write_all(&chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        debug!(
            "Finalized export file: {} ({} bytes)",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }
}

/// Gzip stage in front of another sink
pub struct GzipSink<S> {
    encoder: Option<GzEncoder<Vec<u8>>>,
    inner: S,
}

impl<S: ByteSink> GzipSink<S> {
    /// Compress everything written before passing it to `inner`
    ///
    /// # Arguments
    /// * `inner` - Sink receiving the gzip stream
    /// * `level` - Compression level, 0 (store) to 9 (best)
    pub fn new(inner: S, level: u32) -> Self {
        Self {
            encoder: Some(GzEncoder::new(Vec::new(), Compression::new(level))),
            inner,
        }
    }

    /// Move whatever the encoder has produced so far to the inner sink
    async fn forward(&mut self) -> Result<()> {
        let pending = match self.encoder.as_mut() {
            Some(encoder) => std::mem::take(encoder.get_mut()),
            None => return Ok(()),
        };
        if !pending.is_empty() {
            self.inner.send(Bytes::from(pending)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ByteSink> ByteSink for GzipSink<S> {
    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| TransferError::Compression("gzip stream already finished".into()))?;
        encoder
            .write_all(&chunk)
            .map_err(|e| TransferError::Compression(e.to_string()))?;
        self.forward().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder
                .try_finish()
                .map_err(|e| TransferError::Compression(e.to_string()))?;
            self.forward().await?;
            self.encoder = None;
        }
        self.inner.finish().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Sink collecting chunks in memory; can simulate a disconnect
    #[derive(Clone, Default)]
    pub struct CollectingSink {
        pub chunks: Arc<Mutex<Vec<Bytes>>>,
        pub closed: Arc<AtomicBool>,
        pub finished: Arc<AtomicBool>,
        /// Number of chunks after which the peer disconnects
        pub disconnect_after: Option<usize>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn disconnecting_after(chunks: usize) -> Self {
            Self {
                disconnect_after: Some(chunks),
                ..Self::default()
            }
        }

        pub fn bytes(&self) -> Vec<u8> {
            self.chunks
                .lock()
                .unwrap()
                .iter()
                .flat_map(|c| c.iter().copied())
                .collect()
        }

        pub fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ByteSink for CollectingSink {
        async fn send(&mut self, chunk: Bytes) -> Result<()> {
            if self.is_closed() {
                return Err(TransferError::ClientDisconnected.into());
            }
            let mut chunks = self.chunks.lock().unwrap();
            chunks.push(chunk);
            if self.disconnect_after == Some(chunks.len()) {
                self.closed.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn finish(&mut self) -> Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CollectingSink;
    use super::*;
    use crate::error::AdminError;
    use flate2::read::GzDecoder;
    use futures::StreamExt;
    use std::io::Read;

    #[tokio::test]
    async fn test_gzip_sink_round_trip() {
        let collector = CollectingSink::new();
        let mut sink = GzipSink::new(collector.clone(), 6);
        sink.send(Bytes::from_static(b"hello ")).await.unwrap();
        sink.send(Bytes::from_static(b"world")).await.unwrap();
        sink.finish().await.unwrap();

        let compressed = collector.bytes();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let mut text = String::new();
        GzDecoder::new(&compressed[..])
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "hello world");
        assert!(collector.is_finished());
    }

    #[tokio::test]
    async fn test_gzip_sink_rejects_after_finish() {
        let mut sink = GzipSink::new(CollectingSink::new(), 1);
        sink.finish().await.unwrap();
        let result = sink.send(Bytes::from_static(b"late")).await;
        assert!(matches!(
            result,
            Err(AdminError::Transfer(TransferError::Compression(_)))
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_detects_dropped_receiver() {
        let (mut sink, stream) = ChannelSink::channel(2);
        sink.send(Bytes::from_static(b"a")).await.unwrap();
        assert!(!sink.is_closed());

        drop(stream);
        assert!(sink.is_closed());
        let result = sink.send(Bytes::from_static(b"b")).await;
        assert!(matches!(
            result,
            Err(AdminError::Transfer(TransferError::ClientDisconnected))
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (mut sink, stream) = ChannelSink::channel(4);
        sink.send(Bytes::from_static(b"1")).await.unwrap();
        sink.send(Bytes::from_static(b"2")).await.unwrap();
        drop(sink);

        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
    }

    #[tokio::test]
    async fn test_file_sink_writes_bytes() {
        let path = std::env::temp_dir().join(format!("mongo-porter-{}.txt", uuid::Uuid::new_v4()));
        let mut sink = FileSink::create(&path).await.unwrap();
        sink.send(Bytes::from_static(b"abc")).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(sink.bytes_written(), 3);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abc");
        let _ = tokio::fs::remove_file(&path).await;
    }
}
