//! Response capture: tees a miss response into a [`CacheRecord`].
//!
//! The downstream body is decorated rather than mutated: every chunk is
//! forwarded unchanged to whoever drains the body (normally the connection
//! writer) and appended to a per-request buffer. Only when the wrapped body
//! reports a clean end is the record committed. A body that errors, or that is
//! dropped half-read because the client went away, commits nothing.
//!
//! Commits run on their own task. The client never waits on the store: a full
//! body is handed back at once and a streaming body ends as soon as its last
//! chunk has been forwarded.

use std::io;
use std::sync::Arc;

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tracing::{error, warn};

use crate::http::{Body, BodyStream};
use crate::{Response, StatusCode};

use super::config::Ttl;
use super::freshness;
use super::key::CacheKey;
use super::record::CacheRecord;
use super::store::CacheStore;

/// Per-request capture state. Owned by exactly one in-flight response.
pub(crate) struct Capture {
    key: CacheKey,
    ttl: Ttl,
    status: StatusCode,
    content_type: String,
    saved_at: DateTime<Utc>,
    buffer: BytesMut,
    store: Arc<dyn CacheStore>,
    verbose: bool,
}

impl Capture {
    /// Stamps freshness headers on `response` and wraps its body so the
    /// delivered bytes are committed under `key` once the body ends cleanly.
    ///
    /// A fully buffered body has already ended, so its commit is spawned right
    /// away. A streaming body spawns its commit after the last chunk.
    pub(crate) fn arm(
        mut response: Response,
        key: CacheKey,
        ttl: Ttl,
        store: Arc<dyn CacheStore>,
        verbose: bool,
    ) -> Response {
        let now = Utc::now();
        freshness::stamp(
            &mut response,
            freshness::expires_at(now, ttl.as_duration()),
            now,
        );

        let mut capture = Self {
            key,
            ttl,
            status: response.status(),
            content_type: response
                .headers()
                .content_type()
                .unwrap_or_default()
                .to_owned(),
            saved_at: now,
            buffer: BytesMut::new(),
            store,
            verbose,
        };

        match response.take_body() {
            Body::Full(bytes) => {
                capture.push(&bytes);
                capture.commit_detached();
                response.set_body(Body::Full(bytes));
            }
            Body::Stream(inner) => {
                response.set_body(Body::from_stream(capture.tee(inner)));
            }
        }

        response
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn tee(mut self, mut inner: BodyStream) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream! {
            let mut failed = false;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        self.push(&chunk);
                        yield Ok(chunk);
                    }
                    Err(err) => {
                        warn!(key = %self.key, error = %err, "response body failed, discarding capture");
                        failed = true;
                        yield Err(err);
                        break;
                    }
                }
            }
            if !failed {
                self.commit_detached();
            }
        }
    }

    fn commit_detached(self) {
        tokio::spawn(self.commit());
    }

    // Failures stay here: the response is already on its way to the client.
    async fn commit(self) {
        let record = CacheRecord {
            content: self.buffer.freeze(),
            content_type: self.content_type,
            status: self.status,
            saved_at: self.saved_at,
        };
        let bytes = record.content.len();

        match self.store.commit(self.key.as_str(), &record, self.ttl).await {
            Ok(()) => {
                decision!(self.verbose, key = %self.key, ttl = %self.ttl, bytes, "cached response");
            }
            Err(err) => {
                error!(key = %self.key, error = %err, "failed to store response");
            }
        }
    }
}
