//! The cache-through controller.
//!
//! Per request: gate on method, resolve the key, then either invalidate
//! (bypass), replay a stored response (hit), or run the rest of the chain with
//! capture armed (miss). Exactly one of hit and miss happens per cached request.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use crate::context::Context;
use crate::http::headers::CONTENT_TYPE;
use crate::middleware::{Middleware, Next, ResponseFuture};
use crate::{Method, Request, Response, StatusCode};

use super::capture::Capture;
use super::config::Ttl;
use super::error::StoreError;
use super::freshness;
use super::key::{CacheKey, KeyResolver};
use super::record::StoredEntry;
use super::store::CacheStore;

/// Request header that forces a refresh: skip the cache and drop the stored copy.
pub const BYPASS_HEADER: &str = "x-no-cache";

/// What to do with one request, decided before the chain continues.
#[derive(Debug)]
enum Decision {
    /// Not cacheable; behave as if the cache were not installed.
    PassThrough,
    /// Client asked for a fresh response; the stored copy has been dropped.
    Bypass,
    /// Replay the stored response.
    Hit { entry: StoredEntry, ttl: Ttl },
    /// Run the chain and capture its output under `key`.
    Miss { key: CacheKey, ttl: Ttl },
}

/// Middleware that serves `GET` responses from a [`CacheStore`] and populates
/// it on misses.
///
/// Built by [`ResponseCache::route`](super::ResponseCache::route) or
/// [`ResponseCache::route_with`](super::ResponseCache::route_with). Cheap to
/// clone; clones share the store and resolver.
///
/// # Behavior
///
/// - Non-`GET` requests pass straight through; the resolver and store are not
///   touched.
/// - A resolver error lets the request through uncached.
/// - `x-no-cache: true` deletes the stored record, then lets the request
///   through uncached.
/// - A hit is answered here with the stored status, `Content-Type`, body,
///   `Expires` (now plus the store's remaining TTL) and `Last-Modified` (when
///   the record was saved). Downstream handlers do not run.
/// - On a miss the downstream response gets `Expires` and `Last-Modified`
///   stamped and is committed to the store once its body has been produced.
/// - A failed lookup is answered with `500 Internal Server Error`.
#[derive(Clone)]
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
    resolver: Arc<dyn KeyResolver>,
    verbose: bool,
}

impl CacheMiddleware {
    pub(crate) fn new(
        store: Arc<dyn CacheStore>,
        resolver: Arc<dyn KeyResolver>,
        verbose: bool,
    ) -> Self {
        Self {
            store,
            resolver,
            verbose,
        }
    }

    async fn decide(&self, request: &Request) -> Result<Decision, StoreError> {
        if request.method() != &Method::Get {
            return Ok(Decision::PassThrough);
        }

        let (key, ttl) = match self.resolver.resolve(request) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(uri = %request.target(), error = %err, "no cache key, serving uncached");
                return Ok(Decision::PassThrough);
            }
        };

        if wants_bypass(request) {
            // The request can still be served correctly; only the refresh is lost.
            if let Err(err) = self.store.invalidate(key.as_str()).await {
                warn!(%key, error = %err, "failed to invalidate cached response");
            }
            decision!(self.verbose, %key, "cache bypass");
            return Ok(Decision::Bypass);
        }

        match self.store.lookup(key.as_str()).await? {
            Some(entry) => {
                decision!(self.verbose, %key, "cache hit");
                Ok(Decision::Hit { entry, ttl })
            }
            None => {
                decision!(self.verbose, %key, "cache miss");
                Ok(Decision::Miss { key, ttl })
            }
        }
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        let this = self.clone();

        Box::pin(async move {
            let decision = match this.decide(ctx.request()).await {
                Ok(decision) => decision,
                Err(err) => {
                    error!(uri = %ctx.request().target(), error = %err, "cache lookup failed");
                    return Response::new(StatusCode::InternalServerError)
                        .body("Internal Server Error");
                }
            };

            match decision {
                Decision::PassThrough | Decision::Bypass => next.run(ctx).await,
                Decision::Hit { entry, ttl } => replay(entry, ttl),
                Decision::Miss { key, ttl } => {
                    let response = next.run(ctx).await;
                    Capture::arm(response, key, ttl, this.store, this.verbose)
                }
            }
        })
    }
}

/// `x-no-cache: true`, value compared case-insensitively.
fn wants_bypass(request: &Request) -> bool {
    request
        .headers()
        .get(BYPASS_HEADER)
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

/// Rebuilds the stored response.
///
/// `Expires` is now plus whatever lifetime the store reports left; when the
/// store reports none the route TTL is used.
fn replay(entry: StoredEntry, ttl: Ttl) -> Response {
    let StoredEntry { record, remaining } = entry;
    let remaining = remaining.unwrap_or_else(|| ttl.as_duration());

    let mut response = Response::new(record.status);
    if !record.content_type.is_empty() {
        response.set_header(CONTENT_TYPE, record.content_type);
    }
    freshness::stamp(
        &mut response,
        freshness::expires_at(Utc::now(), remaining),
        record.saved_at,
    );
    response.with_body(record.content)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::DateTime;
    use futures::stream;

    use super::*;
    use crate::cache::ResponseCache;
    use crate::cache::error::ResolveError;
    use crate::cache::record::CacheRecord;
    use crate::cache::store::MemoryStore;
    use crate::middleware::Pipeline;

    /// Counts every store call and can be told to fail lookups.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        lookups: AtomicUsize,
        commits: AtomicUsize,
        invalidations: AtomicUsize,
        fail_lookups: bool,
    }

    impl CountingStore {
        fn failing() -> Self {
            Self {
                fail_lookups: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> (usize, usize, usize) {
            (
                self.lookups.load(Ordering::SeqCst),
                self.commits.load(Ordering::SeqCst),
                self.invalidations.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl CacheStore for CountingStore {
        async fn lookup(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail_lookups {
                return Err(StoreError::Corrupt {
                    key: key.to_owned(),
                    field: "content",
                });
            }
            self.inner.lookup(key).await
        }

        async fn commit(&self, key: &str, record: &CacheRecord, ttl: Ttl) -> Result<(), StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.inner.commit(key, record, ttl).await
        }

        async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            self.inner.invalidate(key).await
        }
    }

    fn request(method: &str, target: &str, extra_headers: &str) -> Request {
        let raw = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n{extra_headers}\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn get(target: &str) -> Request {
        request("GET", target, "")
    }

    /// A pipeline whose endpoint answers `hello` as text/plain and counts calls.
    fn hello_pipeline(middleware: CacheMiddleware, calls: Arc<AtomicUsize>) -> Pipeline {
        Pipeline::new().layer(middleware).endpoint(move |_ctx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/plain")
                    .body("hello")
            }
        })
    }

    // Lets spawned commits run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    async fn body_of(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap()
    }

    fn parse_http_date(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc2822(value).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let store = Arc::new(CountingStore::default());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), calls.clone());

        let first = pipeline.handle(get("/a?x=1")).await;
        assert_eq!(first.status(), StatusCode::Ok);
        assert!(first.headers().contains("last-modified"));
        assert!(first.headers().contains("expires"));
        assert_eq!(body_of(first).await, Bytes::from_static(b"hello"));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.calls(), (1, 1, 0));

        let stored = store.inner.lookup("/a?x=1").await.unwrap().unwrap();
        assert_eq!(stored.record.content, Bytes::from_static(b"hello"));
        assert_eq!(stored.record.content_type, "text/plain");

        let second = pipeline.handle(get("/a?x=1")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "hit must not reach the handler");
        assert_eq!(store.calls(), (2, 1, 0));
        assert_eq!(second.status(), StatusCode::Ok);
        assert_eq!(second.headers().get("content-type"), Some("text/plain"));
        assert!(second.headers().contains("last-modified"));

        let expires = parse_http_date(second.headers().get("expires").unwrap());
        let expected = Utc::now() + chrono::TimeDelta::milliseconds(5_000);
        let drift = (expires - expected).num_milliseconds().abs();
        assert!(drift <= 2_000, "Expires off by {drift}ms");

        assert_eq!(body_of(second).await, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn hit_replays_last_modified_from_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::with_store(store);
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), Arc::default());

        let first = pipeline.handle(get("/lm")).await;
        settle().await;
        let second = pipeline.handle(get("/lm")).await;
        assert_eq!(
            first.headers().get("last-modified"),
            second.headers().get("last-modified")
        );
    }

    #[tokio::test]
    async fn different_queries_are_different_entries() {
        let store = Arc::new(CountingStore::default());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), calls.clone());

        pipeline.handle(get("/a?x=1")).await;
        pipeline.handle(get("/a?x=2")).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.calls().1, 2);
    }

    #[tokio::test]
    async fn no_content_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::with_store(store.clone());
        let pipeline = Pipeline::new()
            .layer(cache.route(5_000).unwrap())
            .endpoint(|_ctx| async { Response::new(StatusCode::NoContent) });

        let first = pipeline.handle(get("/empty")).await;
        assert_eq!(first.status(), StatusCode::NoContent);
        settle().await;

        let stored = store.lookup("/empty").await.unwrap().unwrap();
        assert!(stored.record.content.is_empty());

        let second = pipeline.handle(get("/empty")).await;
        assert_eq!(second.status(), StatusCode::NoContent);
        assert!(!second.headers().contains("content-type"));
        assert!(body_of(second).await.is_empty());
    }

    #[tokio::test]
    async fn streamed_miss_is_replayed_whole() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::with_store(store.clone());
        let pipeline = Pipeline::new()
            .layer(cache.route(5_000).unwrap())
            .endpoint(|_ctx| async {
                let chunks = vec![
                    Ok(Bytes::from_static(b"<ul>")),
                    Ok(Bytes::from_static(b"<li>1</li>")),
                    Ok(Bytes::from_static(b"</ul>")),
                ];
                Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/html")
                    .body_stream(stream::iter(chunks))
            });

        let first = pipeline.handle(get("/list")).await;
        assert_eq!(
            body_of(first).await,
            Bytes::from_static(b"<ul><li>1</li></ul>")
        );
        settle().await;

        let second = pipeline.handle(get("/list")).await;
        assert_eq!(second.headers().get("content-type"), Some("text/html"));
        assert_eq!(
            body_of(second).await,
            Bytes::from_static(b"<ul><li>1</li></ul>")
        );
    }

    #[tokio::test]
    async fn record_expires_and_handler_runs_again() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::with_store(store);
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = hello_pipeline(cache.route(100).unwrap(), calls.clone());

        pipeline.handle(get("/short")).await;
        settle().await;
        pipeline.handle(get("/short")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        pipeline.handle(get("/short")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bypass_invalidates_and_runs_handler() {
        let store = Arc::new(CountingStore::default());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), calls.clone());

        pipeline.handle(get("/a")).await;
        settle().await;
        assert!(store.inner.lookup("/a").await.unwrap().is_some());

        let bypassed = pipeline
            .handle(request("GET", "/a", "X-No-Cache: TRUE\r\n"))
            .await;
        assert_eq!(body_of(bypassed).await, Bytes::from_static(b"hello"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.calls(), (1, 1, 1), "bypass neither looks up nor commits");
        assert!(store.inner.lookup("/a").await.unwrap().is_none());

        // Next plain request is a miss again.
        pipeline.handle(get("/a")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bypass_on_absent_key_is_harmless() {
        let store = Arc::new(CountingStore::default());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), calls.clone());

        let response = pipeline
            .handle(request("GET", "/fresh", "x-no-cache: true\r\n"))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.calls(), (0, 0, 1));
    }

    #[tokio::test]
    async fn bypass_header_other_values_are_ignored() {
        let store = Arc::new(CountingStore::default());
        let cache = ResponseCache::with_store(store.clone());
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), Arc::default());

        pipeline
            .handle(request("GET", "/a", "x-no-cache: false\r\n"))
            .await;
        settle().await;
        assert_eq!(store.calls(), (1, 1, 0));
    }

    #[tokio::test]
    async fn post_never_touches_cache() {
        let store = Arc::new(CountingStore::default());
        let resolved = Arc::new(AtomicUsize::new(0));
        let resolver = {
            let resolved = Arc::clone(&resolved);
            move |req: &Request| -> Result<(CacheKey, Ttl), ResolveError> {
                resolved.fetch_add(1, Ordering::SeqCst);
                Ok((CacheKey::new(req.target()), Ttl::default()))
            }
        };
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = hello_pipeline(cache.route_with(resolver), calls.clone());

        for _ in 0..2 {
            let response = pipeline.handle(request("POST", "/a", "")).await;
            assert!(!response.headers().contains("expires"));
        }
        pipeline
            .handle(request("POST", "/a", "x-no-cache: true\r\n"))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(resolved.load(Ordering::SeqCst), 0);
        assert_eq!(store.calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn resolver_failure_serves_uncached() {
        let store = Arc::new(CountingStore::default());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let refuse = |_: &Request| -> Result<(CacheKey, Ttl), ResolveError> {
            Err(ResolveError::uncacheable("no session"))
        };
        let pipeline = hello_pipeline(cache.route_with(refuse), calls.clone());

        for _ in 0..2 {
            let response = pipeline.handle(get("/a")).await;
            assert_eq!(body_of(response).await, Bytes::from_static(b"hello"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn custom_resolver_shares_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let by_path = |req: &Request| -> Result<(CacheKey, Ttl), ResolveError> {
            Ok((CacheKey::new(req.path()), Ttl::from_millis(1_000)?))
        };
        let pipeline = hello_pipeline(cache.route_with(by_path), calls.clone());

        pipeline.handle(get("/page?utm=a")).await;
        settle().await;
        pipeline.handle(get("/page?utm=b")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.lookup("/page").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lookup_failure_is_a_server_error() {
        let store = Arc::new(CountingStore::failing());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), calls.clone());

        let response = pipeline.handle(get("/a")).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.calls(), (1, 0, 0));
    }

    #[tokio::test]
    async fn concurrent_misses_each_run_the_handler() {
        let store = Arc::new(CountingStore::default());
        let cache = ResponseCache::with_store(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = {
            let calls = Arc::clone(&calls);
            Pipeline::new()
                .layer(cache.route(5_000).unwrap())
                .endpoint(move |_ctx| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Response::new(StatusCode::Ok).body("slow")
                    }
                })
        };

        let (a, b) = tokio::join!(pipeline.handle(get("/k")), pipeline.handle(get("/k")));
        assert_eq!(a.status(), StatusCode::Ok);
        assert_eq!(b.status(), StatusCode::Ok);
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2, "misses are not coalesced");
        assert_eq!(store.calls(), (2, 2, 0));
        assert!(store.inner.lookup("/k").await.unwrap().is_some());
    }

    /// Every commit sleeps before delegating to memory.
    struct SlowCommitStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CacheStore for SlowCommitStore {
        async fn lookup(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
            self.inner.lookup(key).await
        }

        async fn commit(&self, key: &str, record: &CacheRecord, ttl: Ttl) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.commit(key, record, ttl).await
        }

        async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
            self.inner.invalidate(key).await
        }
    }

    #[tokio::test]
    async fn miss_is_delivered_before_commit_finishes() {
        let store = Arc::new(SlowCommitStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(800),
        });
        let cache = ResponseCache::with_store(store.clone());
        let pipeline = hello_pipeline(cache.route(5_000).unwrap(), Arc::default());

        let started = tokio::time::Instant::now();
        let response = pipeline.handle(get("/a")).await;
        let mut wire = Vec::new();
        response.write_to(&mut wire).await.unwrap();
        let waited = started.elapsed();

        assert!(waited < Duration::from_millis(200), "client waited {waited:?}");
        assert!(String::from_utf8(wire).unwrap().ends_with("hello"));
        assert!(store.inner.lookup("/a").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(store.inner.lookup("/a").await.unwrap().is_some());
    }

    #[test]
    fn replay_without_store_expiry_uses_route_ttl() {
        let entry = StoredEntry {
            record: CacheRecord {
                content: Bytes::from_static(b"x"),
                content_type: String::new(),
                status: StatusCode::Ok,
                saved_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            },
            remaining: None,
        };
        let response = replay(entry, Ttl::from_millis(60_000).unwrap());

        let expires = parse_http_date(response.headers().get("expires").unwrap());
        let ahead = (expires - Utc::now()).num_seconds();
        assert!((58..=60).contains(&ahead), "expires {ahead}s ahead");
        assert_eq!(
            response.headers().get("last-modified"),
            Some("Tue, 14 Nov 2023 22:13:20 GMT")
        );
        assert!(!response.headers().contains("content-type"));
    }
}
