//! Single-call transport: one request out, one classified result back.

use std::time::Duration;

use reqwest::{header, Client, Method};
use serde_json::Value;
use tracing::debug;

use super::path::{join_url, normalize_path};
use super::ApiError;
use crate::config::Config;

/// Everything needed to send (and later replay) one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Issues individual calls against the platform API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct Dispatcher {
    client: Client,
    server_url: String,
    api_prefix: String,
}

impl Dispatcher {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            server_url: config.server_url.clone(),
            api_prefix: config.api_prefix.clone(),
        })
    }

    /// Full URL a descriptor's path resolves to
    pub fn url_for(&self, path: &str) -> String {
        let normalized = normalize_path(path, &self.api_prefix);
        join_url(&self.server_url, &self.api_prefix, &normalized)
    }

    fn auth_headers(access: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = access {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidRequest("access credential is not a valid header value".into()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Send one call with the given access credential.
    ///
    /// Returns the parsed body for 2xx responses and a classified error
    /// otherwise. Nothing is retried here.
    pub async fn dispatch(
        &self,
        request: &RequestDescriptor,
        access: Option<&str>,
    ) -> Result<Value, ApiError> {
        let url = self.url_for(&request.path);
        debug!(method = %request.method, url = %url, authenticated = access.is_some(), "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(Self::auth_headers(access)?)
            .header(header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        Self::check_response(response).await
    }

    /// Check if response is successful, returning the body or a classified error.
    async fn check_response(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text().await?;

        if status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Request succeeded");
            Ok(Self::parse_body(&text))
        } else {
            debug!(url = %url, status = status.as_u16(), "Request failed");
            Err(ApiError::from_status(status, &text))
        }
    }

    /// Empty bodies become `null`; non-JSON bodies are passed through as a string.
    fn parse_body(text: &str) -> Value {
        if text.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let config = Config {
            server_url: "http://localhost:5688/".to_string(),
            ..Config::default()
        };
        Dispatcher::new(&config).unwrap()
    }

    #[test]
    fn test_url_for_normalizes() {
        let d = dispatcher();
        assert_eq!(
            d.url_for("/api/v1/api/v1/datasets/"),
            "http://localhost:5688/api/v1/datasets/"
        );
        assert_eq!(d.url_for("models/1/"), "http://localhost:5688/api/v1/models/1/");
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(Dispatcher::parse_body(""), Value::Null);
        assert_eq!(Dispatcher::parse_body(r#"{"count": 2}"#), json!({"count": 2}));
        assert_eq!(Dispatcher::parse_body("plain text"), json!("plain text"));
    }

    #[test]
    fn test_auth_headers() {
        let headers = Dispatcher::auth_headers(Some("abc")).unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer abc");

        assert!(Dispatcher::auth_headers(None).unwrap().is_empty());
        assert!(matches!(
            Dispatcher::auth_headers(Some("bad\nvalue")),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_descriptor_builder() {
        let req = RequestDescriptor::new(Method::POST, "/datasets/")
            .with_query("page", "2")
            .with_body(json!({"name": "corpus"}));
        assert_eq!(req.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(req.body, Some(json!({"name": "corpus"})));
    }
}
