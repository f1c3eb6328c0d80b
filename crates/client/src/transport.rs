//! HTTP transport seam.
//!
//! Everything above this module speaks [`HttpRequest`]/[`HttpResponse`] values;
//! only [`ReqwestTransport`] knows about the wire.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tether_protocol::rest::ErrorBody;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

pub const AUTHORIZATION: &str = "authorization";

/// An outbound request. `Clone` so it can be replayed after a token refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the API base URL (or an absolute URL)
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Insert or replace a header (names compare case-insensitively).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.set_header(AUTHORIZATION, format!("Bearer {token}"));
        self
    }

    /// Path without query string, for endpoint comparisons.
    pub fn endpoint(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx response into [`ClientError::Endpoint`].
    ///
    /// The message comes from a JSON `message`/`error` field when the body has
    /// one, otherwise from the raw body.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .and_then(ErrorBody::into_text)
            .unwrap_or_else(|| self.text());
        Err(ClientError::Endpoint {
            status: self.status,
            message,
        })
    }
}

/// Executes requests exactly as given. No auth handling, no retries.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        async move {
            let url = self.config.url(&request.path);
            let mut builder = self.client.request(request.method.clone(), &url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?.to_vec();
            debug!(
                component = "transport",
                event = "http.response",
                method = %request.method,
                url = %url,
                status,
                body_bytes = body.len(),
                "HTTP response"
            );
            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_header_replaces_case_insensitively() {
        let req = HttpRequest::get("/chats")
            .header("Authorization", "Bearer old")
            .with_bearer("new");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header_value("AUTHORIZATION"), Some("Bearer new"));
    }

    #[test]
    fn endpoint_strips_query() {
        let req = HttpRequest::post("/auth/refresh?device=1");
        assert_eq!(req.endpoint(), "/auth/refresh");
    }

    #[test]
    fn response_classification() {
        assert!(HttpResponse::new(204, Vec::new()).is_success());
        assert!(HttpResponse::new(401, Vec::new()).is_unauthorized());
        assert!(!HttpResponse::new(403, Vec::new()).is_unauthorized());
    }

    #[test]
    fn error_for_status_prefers_json_message() {
        let err = HttpResponse::new(422, r#"{"error":"Unprocessable","message":"text is required"}"#)
            .error_for_status()
            .expect_err("422 is an error");
        match err {
            ClientError::Endpoint { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "text is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = HttpResponse::new(502, "bad gateway")
            .error_for_status()
            .expect_err("502 is an error");
        assert!(matches!(err, ClientError::Endpoint { message, .. } if message == "bad gateway"));
    }
}
