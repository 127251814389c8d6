use std::{
    future::Future,
    io::{Error as IoError, Result as IoResult},
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use http::{
    header::{CONTENT_TYPE, LOCATION, RETRY_AFTER},
    HeaderMap, Method, StatusCode,
};
use serde::de::DeserializeOwned;

use crate::Result;

const REPLAY_NONCE: &str = "replay-nonce";
const CONTENT_TYPE_JOSE: &str = "application/jose+json";
const CONTENT_TYPE_PROBLEM: &str = "application/problem+json";

/// An outgoing request issued by the [`AcmeAccount`](crate::AcmeAccount).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HttpRequest {
    /// `GET`, `HEAD` or `POST`.
    pub method: Method,
    /// Absolute request url.
    pub url: String,
    /// The JWS body of a signed `POST`, sent as `application/jose+json`.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub(crate) fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub(crate) fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::HEAD,
            url: url.into(),
            body: None,
        }
    }

    pub(crate) fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// A response received by the [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Returns the value of the header as a string.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|value| value.to_str().ok())
    }

    pub(crate) fn replay_nonce(&self) -> Option<&str> {
        self.header(REPLAY_NONCE).filter(|nonce| !nonce.is_empty())
    }

    pub(crate) fn location(&self) -> Option<&str> {
        self.header(LOCATION)
    }

    pub(crate) fn is_problem(&self) -> bool {
        self.header(CONTENT_TYPE)
            .map(|value| value.trim_start().starts_with(CONTENT_TYPE_PROBLEM))
            .unwrap_or_default()
    }

    /// Delay requested by the `Retry-After` header, given either in seconds or
    /// as an HTTP date.
    pub(crate) fn retry_after(&self) -> Option<Duration> {
        let value = self.header(RETRY_AFTER)?.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        let at = httpdate::parse_http_date(value).ok()?;
        Some(at.duration_since(SystemTime::now()).unwrap_or_default())
    }

    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// The asynchronous HTTP client used to talk to the ACME server.
///
/// Implemented for [`reqwest::Client`]. An implementation only returns an
/// error when no response was received; non-success status codes are returned
/// as regular responses.
pub trait HttpClient: Send + Sync {
    /// Sends the request and returns the response.
    fn send(&self, request: HttpRequest) -> impl Future<Output = IoResult<HttpResponse>> + Send;
}

impl HttpClient for reqwest::Client {
    async fn send(&self, request: HttpRequest) -> IoResult<HttpResponse> {
        let mut builder = self.request(request.method, &request.url);
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, CONTENT_TYPE_JOSE).body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|err| IoError::other(format!("failed to send http request: {err}")))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|err| IoError::other(format!("failed to read response: {err}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
