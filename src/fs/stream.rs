//! Streaming bridges between callers and the storage client
//!
//! Reads are pulled from the client one chunk at a time, so memory use is
//! bounded by the chunk size no matter how large the object is. Writes read
//! the caller's `AsyncRead` in chunks and forward them to the client's upload
//! primitive; any failure is delivered as an error item, which the client
//! treats as an abort.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::{ByteStream, RemoteFile, UploadMetadata};
use crate::error::{FilenError, Result};
use crate::fs::Filesystem;

/// Options for [`crate::fs::File::open`]
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Start this many bytes into the object. The download begins at the
    /// chunk holding this byte, so earlier chunks are never fetched.
    pub offset: u64,
    /// Stop after this many bytes
    pub count: Option<u64>,
    /// Abort the download when cancelled
    pub cancel: Option<CancellationToken>,
}

impl OpenOptions {
    pub fn range(offset: u64, count: Option<u64>) -> Self {
        Self {
            offset,
            count,
            cancel: None,
        }
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// First byte read from an object of `size` bytes
    pub(crate) fn start(&self, size: u64) -> u64 {
        self.offset.min(size)
    }
}

/// Lazy, finite byte stream over a remote object
///
/// Not restartable: once consumed or dropped, open the object again.
/// Dropping the reader releases the underlying remote stream.
pub struct ObjectReader {
    stream: ByteStream,
    len: u64,
}

impl ObjectReader {
    /// `source` yields the object's content from `options.start(size)` on
    pub(crate) fn new(
        source: ByteStream,
        size: u64,
        options: OpenOptions,
        chunk_timeout: Option<Duration>,
    ) -> Self {
        let start = options.start(size);
        let len = match options.count {
            Some(count) => count.min(size - start),
            None => size - start,
        };
        Self {
            stream: download_stream(source, len, options.cancel, chunk_timeout),
            len,
        }
    }

    /// Number of bytes this reader will yield on success
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adapt to `AsyncRead`
    ///
    /// Errors surface as `io::Error`; [`FilenError::from_io`] recovers them.
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.stream.map_err(FilenError::into_io))
    }

    /// Drain the reader into memory. Meant for small objects.
    pub async fn read_all(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len as usize);
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }
}

impl Stream for ObjectReader {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

async fn next_chunk(source: &mut ByteStream, timeout: Option<Duration>) -> Result<Option<Bytes>> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, source.next())
            .await
            .map_err(|_| FilenError::Timeout(limit))?
            .transpose(),
        None => source.next().await.transpose(),
    }
}

fn download_stream(
    source: ByteStream,
    mut remaining: u64,
    cancel: Option<CancellationToken>,
    chunk_timeout: Option<Duration>,
) -> ByteStream {
    Box::pin(try_stream! {
        let mut source = source;
        let cancel = cancel.unwrap_or_else(CancellationToken::new);

        while remaining > 0 {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = next_chunk(&mut source, chunk_timeout) => Some(chunk),
            };
            let chunk = match next {
                Some(chunk) => chunk?,
                None => {
                    debug!("download cancelled with {} bytes outstanding", remaining);
                    Err(FilenError::Cancelled)?
                }
            };
            let mut chunk = match chunk {
                Some(chunk) => chunk,
                None => Err(FilenError::Backend(format!(
                    "download ended early with {} bytes outstanding",
                    remaining
                )))?,
            };

            if chunk.len() as u64 > remaining {
                chunk.truncate(remaining as usize);
            }
            remaining -= chunk.len() as u64;

            if !chunk.is_empty() {
                trace!("download: {} bytes", chunk.len());
                yield chunk;
            }
        }
    })
}

/// Upload the content of `reader` through the filesystem's client
pub(crate) async fn upload<R>(
    fs: &Filesystem,
    reader: R,
    metadata: UploadMetadata,
    cancel: Option<CancellationToken>,
) -> Result<RemoteFile>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let source = ReaderStream::with_capacity(reader, fs.transfer().chunk_size);
    let body = upload_stream(source, metadata.size, cancel);
    debug!("upload: {:?} into {}", metadata.name, metadata.parent);
    fs.client().upload(body, metadata).await
}

fn upload_stream<S>(
    source: S,
    declared: Option<u64>,
    cancel: Option<CancellationToken>,
) -> ByteStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    Box::pin(try_stream! {
        let mut source = source;
        let cancel = cancel.unwrap_or_else(CancellationToken::new);
        let mut sent: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = source.next() => Some(chunk),
            };
            let chunk = match next {
                Some(chunk) => chunk,
                None => {
                    debug!("upload cancelled after {} bytes", sent);
                    Err(FilenError::Cancelled)?
                }
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;

            sent += chunk.len() as u64;
            check_not_over(sent, declared)?;
            yield chunk;
        }

        check_complete(sent, declared)?;
    })
}

fn check_not_over(sent: u64, declared: Option<u64>) -> Result<()> {
    match declared {
        Some(declared) if sent > declared => Err(FilenError::Backend(format!(
            "source is larger than the declared {} bytes",
            declared
        ))),
        _ => Ok(()),
    }
}

fn check_complete(sent: u64, declared: Option<u64>) -> Result<()> {
    match declared {
        Some(declared) if sent != declared => Err(FilenError::Backend(format!(
            "source ended after {} of {} declared bytes",
            sent, declared
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::AsyncReadExt;

    fn source(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    async fn collect(stream: ByteStream) -> Result<Vec<u8>> {
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn test_range_spans_chunks() {
        // the client starts at the offset, mid-chunk
        let reader = ObjectReader::new(
            source(vec![b"d", b"efgh", b"ijkl"]),
            12,
            OpenOptions::range(3, Some(6)),
            None,
        );
        assert_eq!(reader.len(), 6);
        assert_eq!(reader.read_all().await.unwrap(), b"defghi");
    }

    #[tokio::test]
    async fn test_offset_past_end_is_empty() {
        assert_eq!(OpenOptions::range(10, None).start(3), 3);
        let reader = ObjectReader::new(source(vec![]), 3, OpenOptions::range(10, None), None);
        assert!(reader.is_empty());
        assert!(reader.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_source_is_an_error() {
        let reader = ObjectReader::new(source(vec![b"abc"]), 5, OpenOptions::default(), None);
        assert!(matches!(
            reader.read_all().await,
            Err(FilenError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_download_stops() {
        let token = CancellationToken::new();
        let mut reader = ObjectReader::new(
            source(vec![b"abcd", b"efgh"]),
            8,
            OpenOptions::default().cancel_on(token.clone()),
            None,
        );

        assert_eq!(reader.next().await.unwrap().unwrap(), Bytes::from_static(b"abcd"));
        token.cancel();
        assert!(matches!(reader.next().await, Some(Err(FilenError::Cancelled))));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stalled_download_times_out() {
        let stalled: ByteStream = Box::pin(stream::pending());
        let reader = ObjectReader::new(
            stalled,
            4,
            OpenOptions::default(),
            Some(Duration::from_millis(20)),
        );
        assert!(matches!(
            reader.read_all().await,
            Err(FilenError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_async_read_preserves_error_variant() {
        let failing: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(FilenError::NotFound("gone".to_string())),
        ]));
        let mut reader = ObjectReader::new(failing, 4, OpenOptions::default(), None).into_async_read();

        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).await.unwrap_err();
        assert!(FilenError::from_io(err).is_not_found());
    }

    #[tokio::test]
    async fn test_upload_stream_passes_data_through() {
        let reader = tokio_test::io::Builder::new()
            .read(b"hello ")
            .read(b"world")
            .build();
        let body = upload_stream(ReaderStream::new(reader), Some(11), None);
        assert_eq!(collect(body).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_upload_stream_rejects_size_mismatch() {
        let body = upload_stream(ReaderStream::new(&b"hello"[..]), Some(3), None);
        assert!(matches!(collect(body).await, Err(FilenError::Backend(_))));

        let body = upload_stream(ReaderStream::new(&b"hi"[..]), Some(3), None);
        assert!(matches!(collect(body).await, Err(FilenError::Backend(_))));
    }

    #[tokio::test]
    async fn test_upload_stream_surfaces_read_error() {
        let reader = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let body = upload_stream(ReaderStream::new(reader), None, None);
        assert!(matches!(collect(body).await, Err(FilenError::Io(_))));
    }

    #[tokio::test]
    async fn test_upload_stream_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let body = upload_stream(ReaderStream::new(&b"data"[..]), None, Some(token));
        assert!(matches!(collect(body).await, Err(FilenError::Cancelled)));
    }
}
