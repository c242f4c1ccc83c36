//! Error types for the response cache.

use thiserror::Error;

/// Construction-time configuration problems. Fatal: no middleware is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid connection string: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported connection scheme `{scheme}`, expected `redis`")]
    UnsupportedScheme { scheme: String },

    #[error("connection string has no host")]
    MissingHost,

    #[error("cannot embed credentials in connection string for host `{host}`")]
    Credentials { host: String },

    #[error("ttl must be a positive whole number of milliseconds, got `{input}`")]
    InvalidTtl { input: String },
}

/// A key resolver could not produce a key for the request.
///
/// Never reaches the client: the request simply proceeds uncached.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("request is not cacheable: {reason}")]
    Uncacheable { reason: String },

    #[error(transparent)]
    Ttl(#[from] ConfigError),
}

impl ResolveError {
    /// Shorthand for [`ResolveError::Uncacheable`].
    pub fn uncacheable(reason: impl Into<String>) -> Self {
        Self::Uncacheable {
            reason: reason.into(),
        }
    }
}

/// Failures talking to, or decoding data from, the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("stored record `{key}` has a missing or malformed `{field}` field")]
    Corrupt { key: String, field: &'static str },
}

/// Errors returned while building a [`ResponseCache`](super::ResponseCache).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to cache store: {0}")]
    Store(#[from] StoreError),
}
