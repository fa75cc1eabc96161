//! Forwarding of queries to the execution engine.

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, uri::InvalidUri, HeaderName, Method, Request, Uri},
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::http::errors;
use crate::http::server::AppState;

/// Hop-by-hop headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// HTTP client bound to the configured execution engine.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    url: Uri,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, InvalidUri> {
        let url: Uri = url.parse()?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { client, url, timeout })
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// POST the request body to the engine and stream its response back.
    ///
    /// Transport failures become a 502 and a timeout a 504, both with a
    /// GraphQL error body, so outer layers see them as server errors.
    pub async fn forward(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.url.clone());
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in parts.headers.iter() {
                if !HOP_BY_HOP.contains(name) && !name.as_str().starts_with("keep-alive") {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
        let upstream_request = match builder.body(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build upstream request");
                return errors::service_error();
            }
        };

        match tokio::time::timeout(self.timeout, self.client.request(upstream_request)).await {
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Ok(Err(e)) => {
                tracing::error!(upstream = %self.url, error = %e, "Upstream request failed");
                errors::service_error()
            }
            Err(_) => {
                tracing::error!(upstream = %self.url, timeout = ?self.timeout, "Upstream request timed out");
                errors::upstream_timeout()
            }
        }
    }
}

/// Downstream handler for the query endpoint.
pub async fn query_handler(State(state): State<AppState>, request: Request<Body>) -> impl IntoResponse {
    state.upstream.forward(request).await
}
