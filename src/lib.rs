//! # readthru
//!
//! Read-through response caching for a small async HTTP/1.1 server.
//!
//! Idempotent `GET` routes are wrapped in a [`CacheMiddleware`]: the first
//! request runs the handler and stores what it sent, later requests are served
//! from the store until the record expires. Every response carries `Expires`
//! and `Last-Modified` headers, and a client can force a fresh render with
//! `x-no-cache: true`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use readthru::middleware::{LoggerMiddleware, Pipeline};
//! use readthru::{Response, ResponseCache, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ResponseCache::from_url("redis://127.0.0.1:6379").await?;
//!
//!     let pipeline = Pipeline::new()
//!         .layer(LoggerMiddleware)
//!         .layer(cache.route(5_000)?)
//!         .endpoint(|_ctx| async {
//!             Response::new(StatusCode::Ok).body("Hello, World!")
//!         });
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

pub use cache::{CacheMiddleware, CacheOptions, ResponseCache};
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use middleware::Pipeline;
pub use server::{Server, ServerError};
