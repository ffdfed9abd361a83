use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use tokio::io::AsyncRead;

type BoxBytesStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A reader adapter that wraps a bytes stream (e.g. a response body) for
/// AsyncRead compatibility
pub struct BytesStreamReader {
    stream: BoxBytesStream,
    current_chunk: Option<Bytes>,
    position: usize,
}

impl BytesStreamReader {
    /// Create a new BytesStreamReader from a fallible bytes stream
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        use futures::TryStreamExt;

        Self {
            stream: Box::pin(stream.map_err(std::io::Error::other)),
            current_chunk: None,
            position: 0,
        }
    }
}

impl AsyncRead for BytesStreamReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::Poll;

        loop {
            // If we have a chunk with data remaining, copy it to the buffer
            if let Some(chunk) = &self.current_chunk {
                if self.position < chunk.len() {
                    let bytes_to_copy = std::cmp::min(buf.remaining(), chunk.len() - self.position);
                    buf.put_slice(&chunk[self.position..self.position + bytes_to_copy]);
                    self.position += bytes_to_copy;
                    return Poll::Ready(Ok(()));
                }
                self.current_chunk = None;
                self.position = 0;
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    self.current_chunk = Some(chunk);
                    self.position = 0;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
