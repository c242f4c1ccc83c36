//! Serves a slow endpoint behind a five second read-through cache.
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 RUST_LOG=readthru=debug cargo run --example cached_server
//! curl -i http://127.0.0.1:8080/report
//! curl -i -H 'x-no-cache: true' http://127.0.0.1:8080/report
//! ```

use std::time::Duration;

use readthru::cache::{CacheKey, ResolveError, Ttl};
use readthru::middleware::{LoggerMiddleware, Pipeline};
use readthru::{Request, Response, ResponseCache, Server, StatusCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("readthru=debug,info")),
        )
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());
    let cache = ResponseCache::from_url(&url).await?.verbose(true);

    // Ignore the query string so `/report?utm=x` shares the `/report` entry.
    let by_path = |request: &Request| -> Result<(CacheKey, Ttl), ResolveError> {
        Ok((CacheKey::new(request.path()), Ttl::from_millis(5_000)?))
    };

    let pipeline = Pipeline::new()
        .layer(LoggerMiddleware)
        .layer(cache.route_with(by_path))
        .endpoint(|ctx| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Response::new(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body(format!("rendered {}\n", ctx.request().path()))
        });

    Server::bind("127.0.0.1:8080").await?.serve(pipeline).await?;
    Ok(())
}
