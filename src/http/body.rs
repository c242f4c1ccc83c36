//! Response bodies: either fully buffered or a stream of chunks.
//!
//! A [`Body::Full`] is written with a `Content-Length` header. A
//! [`Body::Stream`] is written with `Transfer-Encoding: chunked`, one HTTP
//! chunk per item, so the client sees each piece as soon as the handler
//! produces it.

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};

/// A boxed, sendable stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// The payload of a [`Response`](super::Response).
///
/// # Examples
///
/// ```
/// use readthru::http::Body;
///
/// let body = Body::from("hello");
/// assert!(matches!(body, Body::Full(ref b) if b.as_ref() == b"hello"));
/// ```
pub enum Body {
    /// A complete body known up front.
    Full(Bytes),
    /// A body produced incrementally. An `Err` item aborts the response.
    Stream(BodyStream),
}

impl Body {
    /// Creates an empty, fully buffered body.
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    /// Wraps a chunk stream as a body.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    /// Returns `true` for a fully buffered body with no bytes.
    ///
    /// Streaming bodies always return `false`; their length is unknown.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Full(bytes) if bytes.is_empty())
    }

    /// Converts the body into a chunk stream. A full body yields one chunk.
    pub fn into_stream(self) -> BodyStream {
        match self {
            Self::Full(bytes) => Box::pin(stream::once(async move { Ok(bytes) })),
            Self::Stream(stream) => stream,
        }
    }

    /// Drains the body into a single contiguous buffer.
    ///
    /// # Errors
    ///
    /// Returns the first error yielded by a streaming body.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Full(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Full(Bytes::from_static(text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_full() {
        let body = Body::from("abc");
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn collect_stream_preserves_order() {
        let chunks = vec![
            Ok(Bytes::from_static(b"he")),
            Ok(Bytes::from_static(b"ll")),
            Ok(Bytes::from_static(b"o")),
        ];
        let body = Body::from_stream(stream::iter(chunks));
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn collect_stream_surfaces_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"he")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
        ];
        let body = Body::from_stream(stream::iter(chunks));
        assert!(body.collect().await.is_err());
    }

    #[test]
    fn emptiness() {
        assert!(Body::empty().is_empty());
        assert!(!Body::from("x").is_empty());
        assert!(!Body::from_stream(stream::empty()).is_empty());
    }

    #[tokio::test]
    async fn full_into_stream_yields_one_chunk() {
        let mut s = Body::from("one").into_stream();
        assert_eq!(s.next().await.unwrap().unwrap(), Bytes::from_static(b"one"));
        assert!(s.next().await.is_none());
    }
}
