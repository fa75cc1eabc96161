//! Buffered copy of a downstream response.
//!
//! Layers that must see a response before deciding what to do with it
//! (retry, breaker accounting, caching) capture it once at the handler
//! boundary and replay it to the client afterwards.

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, StatusCode},
    response::Response,
};

#[derive(Debug, Clone)]
pub struct ResponseCapture {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseCapture {
    /// Drain a response into memory, failing if the body exceeds `limit` bytes.
    pub async fn from_response(response: Response, limit: usize) -> Result<Self, axum::Error> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, limit).await?;
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Only complete 200 responses with a body are worth caching.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && !self.body.is_empty()
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
