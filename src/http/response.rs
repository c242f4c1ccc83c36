//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! writing them to any async byte sink for transmission over TCP.

use std::io;

use bytes::{BufMut, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::headers::CONTENT_TYPE;
use super::{Body, Headers, StatusCode};

/// An HTTP/1.1 response, ready to be written.
///
/// # Examples
///
/// ```
/// use readthru::http::{Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let mut wire = Vec::new();
/// response.write_to(&mut wire).await?;
/// let text = String::from_utf8(wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

// How the body length is communicated to the peer.
enum Framing {
    Length(usize),
    Chunked,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::empty(),
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Replaces every existing value of `name` with a single `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::from(body.into());
        self
    }

    /// Sets a streaming body. Each item is sent to the client as its own chunk.
    #[must_use]
    pub fn body_stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = io::Result<bytes::Bytes>> + Send + 'static,
    {
        self.body = Body::from_stream(stream);
        self
    }

    /// Sets any [`Body`].
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers set so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Removes the body, leaving an empty one in its place.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Replaces the body in-place.
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Consumes the response and returns its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Writes the response in HTTP/1.1 wire format.
    ///
    /// Full bodies are framed with `Content-Length`; streaming bodies use chunked
    /// transfer-encoding and are drained chunk by chunk, so the peer receives
    /// every piece as it is produced. Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if no `Content-Type` was set and
    ///   the body is not known to be empty.
    /// - `Connection: keep-alive` or `Connection: close`.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error from `writer`, or the first error yielded by a
    /// streaming body. In both cases the rest of the body is dropped unread.
    pub async fn write_to<W>(mut self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match self.take_body() {
            Body::Full(bytes) => {
                let mut buf = self.encode_head(Framing::Length(bytes.len()), !bytes.is_empty());
                buf.put(bytes.as_ref());
                writer.write_all(&buf).await?;
            }
            Body::Stream(mut stream) => {
                let head = self.encode_head(Framing::Chunked, true);
                writer.write_all(&head).await?;

                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    // A zero-length chunk would terminate the body early.
                    if chunk.is_empty() {
                        continue;
                    }
                    let mut frame = BytesMut::with_capacity(chunk.len() + 16);
                    frame.put(format!("{:x}\r\n", chunk.len()).as_bytes());
                    frame.put(chunk.as_ref());
                    frame.put(&b"\r\n"[..]);
                    writer.write_all(&frame).await?;
                }

                writer.write_all(b"0\r\n\r\n").await?;
            }
        }

        writer.flush().await
    }

    // Serializes the status line and headers, ending with the blank separator line.
    fn encode_head(&mut self, framing: Framing, has_body: bool) -> BytesMut {
        if has_body && self.headers.content_type().is_none() {
            self.headers.insert(CONTENT_TYPE, "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        self.headers.encode(&mut buf);

        // Framing is always the last header before the blank line
        match framing {
            Framing::Length(n) => buf.put(format!("Content-Length: {n}\r\n").as_bytes()),
            Framing::Chunked => buf.put(&b"Transfer-Encoding: chunked\r\n"[..]),
        }

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
