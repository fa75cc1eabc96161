//! Fetching a subgraph's schema document.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{FetchMethod, ResponseType, ServiceConfig};
use crate::error::{BoxError, ResilienceError};

/// Federation introspection operation every subgraph answers.
pub const SERVICE_DEFINITION_QUERY: &str = "query __ApolloGetServiceDefinition__ { _service { sdl } }";
pub const SERVICE_DEFINITION_OPERATION: &str = "__ApolloGetServiceDefinition__";

#[derive(Debug, Error)]
pub enum SchemaFetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("schema endpoint {0} not found")]
    NotFound(String),

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid introspection response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("introspection errors from {url}: {messages}")]
    GraphQL { url: String, messages: String },

    #[error("empty schema document from {0}")]
    Empty(String),
}

impl SchemaFetchError {
    /// Convert into the error shape the retry and breaker layers understand.
    ///
    /// A missing endpoint or a client error will not fix itself, so those
    /// stop the retry loop; timeouts keep their timeout identity.
    pub fn into_resilience(self, timeout: Duration) -> BoxError {
        match self {
            SchemaFetchError::NotFound(url) => ResilienceError::NotFound(url).boxed(),
            SchemaFetchError::Request { ref source, .. } if source.is_timeout() => {
                ResilienceError::Timeout(timeout).boxed()
            }
            SchemaFetchError::Status { status, .. }
                if (400..500).contains(&status) && status != 408 && status != 429 =>
            {
                ResilienceError::NonRetryable(Box::new(self)).boxed()
            }
            other => Box::new(other),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    data: Option<IntrospectionData>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Debug, Deserialize)]
struct IntrospectionData {
    #[serde(rename = "_service")]
    service: Option<ServiceDefinition>,
}

#[derive(Debug, Deserialize)]
struct ServiceDefinition {
    #[serde(default)]
    sdl: String,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    #[serde(default)]
    message: String,
}

/// Fetch the schema document of one service.
///
/// `client` carries the per-request timeout.
pub async fn fetch_sdl(client: &reqwest::Client, service: &ServiceConfig) -> Result<String, SchemaFetchError> {
    let url = service.schema_endpoint();

    let request = match service.method {
        FetchMethod::Post => client.post(url).json(&serde_json::json!({
            "query": SERVICE_DEFINITION_QUERY,
            "operationName": SERVICE_DEFINITION_OPERATION,
            "variables": {},
        })),
        FetchMethod::Get => match service.response_type {
            ResponseType::String => client.get(url),
            ResponseType::Introspection => client.get(url).query(&[
                ("query", SERVICE_DEFINITION_QUERY),
                ("operationName", SERVICE_DEFINITION_OPERATION),
            ]),
        },
    };

    let response = request
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .send()
        .await
        .map_err(|source| SchemaFetchError::Request {
            url: url.to_string(),
            source,
        })?;

    match response.status() {
        StatusCode::NOT_FOUND => return Err(SchemaFetchError::NotFound(url.to_string())),
        status if !status.is_success() => {
            return Err(SchemaFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
        _ => {}
    }

    let body = response.text().await.map_err(|source| SchemaFetchError::Request {
        url: url.to_string(),
        source,
    })?;

    let sdl = match service.response_type {
        ResponseType::String => body,
        ResponseType::Introspection => parse_introspection(url, &body)?,
    };

    if sdl.trim().is_empty() {
        return Err(SchemaFetchError::Empty(url.to_string()));
    }
    Ok(sdl)
}

/// Extract `data._service.sdl`; a non-empty `errors` array is a failure.
pub fn parse_introspection(url: &str, body: &str) -> Result<String, SchemaFetchError> {
    let parsed: IntrospectionResponse = serde_json::from_str(body).map_err(|e| SchemaFetchError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !parsed.errors.is_empty() {
        let messages = parsed
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SchemaFetchError::GraphQL {
            url: url.to_string(),
            messages,
        });
    }

    parsed
        .data
        .and_then(|d| d.service)
        .map(|s| s.sdl)
        .ok_or_else(|| SchemaFetchError::Decode {
            url: url.to_string(),
            reason: "missing data._service.sdl".to_string(),
        })
}
