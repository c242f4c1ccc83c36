//! Cache keys and the resolvers that derive them from requests.

use std::fmt;

use crate::Request;

use super::config::Ttl;
use super::error::ResolveError;

/// Opaque identifier of one cacheable request variant.
///
/// Used verbatim as the store key; no hashing or normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Derives the cache key and TTL for a request.
///
/// Called once per eligible request, before the store is consulted. It must
/// return the same answer for the same request and must not do work
/// proportional to the request body. An `Err` makes the request skip the cache
/// entirely.
///
/// Any `Fn(&Request) -> Result<(CacheKey, Ttl), ResolveError>` is a resolver:
///
/// ```
/// use readthru::cache::{CacheKey, KeyResolver, ResolveError, Ttl};
/// use readthru::Request;
///
/// let per_user = |req: &Request| -> Result<(CacheKey, Ttl), ResolveError> {
///     let user = req
///         .headers()
///         .get("x-user-id")
///         .ok_or_else(|| ResolveError::uncacheable("anonymous request"))?;
///     Ok((CacheKey::new(format!("{user}:{}", req.target())), Ttl::from_millis(10_000)?))
/// };
///
/// let (req, _) = Request::parse(b"GET /feed HTTP/1.1\r\nX-User-Id: 7\r\n\r\n").unwrap();
/// let (key, _) = per_user.resolve(&req).unwrap();
/// assert_eq!(key.as_str(), "7:/feed");
/// ```
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, request: &Request) -> Result<(CacheKey, Ttl), ResolveError>;
}

impl<F> KeyResolver for F
where
    F: Fn(&Request) -> Result<(CacheKey, Ttl), ResolveError> + Send + Sync,
{
    fn resolve(&self, request: &Request) -> Result<(CacheKey, Ttl), ResolveError> {
        self(request)
    }
}

/// The default resolver: the full request-target (path and query) with a fixed TTL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathKeyResolver {
    ttl: Ttl,
}

impl PathKeyResolver {
    pub fn new(ttl: Ttl) -> Self {
        Self { ttl }
    }
}

impl KeyResolver for PathKeyResolver {
    fn resolve(&self, request: &Request) -> Result<(CacheKey, Ttl), ResolveError> {
        Ok((CacheKey::new(request.target()), self.ttl))
    }
}
