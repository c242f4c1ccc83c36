//! Per-request context handed to every middleware and endpoint.

use crate::Request;

/// Per-request context. Owns the parsed [`Request`] while it travels down the
/// middleware chain.
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Consume the context and take back the request
    pub fn into_request(self) -> Request {
        self.request
    }
}
