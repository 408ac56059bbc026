//! XRPC transport
//!
//! Request/response types and the HTTP client for AT Protocol's XRPC
//! convention (`GET`/`POST` against `/xrpc/<nsid>`). Errors carry the HTTP
//! status plus the service's error code so callers can distinguish
//! not-found, bad-request, and auth failures from generic ones.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// XRPC error with HTTP status and message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrpcError {
    /// HTTP status code (0 for transport-level failures)
    status: u16,
    /// Error code (e.g., "InvalidRequest", "NotFound")
    error: String,
    /// Human-readable error message
    message: String,
}

/// Coarse error classification for inline display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested resource does not exist
    NotFound,
    /// The request was malformed or rejected
    BadRequest,
    /// Credentials are missing, invalid, or expired
    Unauthenticated,
    /// Anything else, including transport failures
    Other,
}

impl XrpcError {
    /// Create a new XRPC error
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self { status, error: error.into(), message: message.into() }
    }

    /// Get the HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get the error code
    pub fn error(&self) -> &str {
        &self.error
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classify the error for inline display
    pub fn kind(&self) -> ErrorKind {
        match self.status {
            404 => ErrorKind::NotFound,
            401 | 403 => ErrorKind::Unauthenticated,
            400 => ErrorKind::BadRequest,
            _ => ErrorKind::Other,
        }
    }

    /// Check if this is a transient network-level failure
    ///
    /// Status 0 is used for request failures that never produced a response.
    pub fn is_network_error(&self) -> bool {
        matches!(self.status, 0 | 408 | 425 | 429 | 500 | 502 | 503 | 504 | 522 | 524)
    }
}

impl std::fmt::Display for XrpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "XRPC error {}: {} - {}", self.status, self.error, self.message)
    }
}

impl std::error::Error for XrpcError {}

/// HTTP method for XRPC requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request (queries)
    Get,
    /// POST request (procedures)
    Post,
}

/// XRPC request parameters
#[derive(Debug, Clone)]
pub struct XrpcRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// NSID path (e.g., "app.bsky.feed.getTimeline")
    pub nsid: String,
    /// Query parameters
    pub params: Vec<(String, String)>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body (for POST)
    pub body: Option<Vec<u8>>,
    /// Encoding type (e.g., "application/json")
    pub encoding: Option<String>,
}

impl XrpcRequest {
    /// Create a new GET request (query)
    pub fn query(nsid: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            nsid: nsid.into(),
            params: Vec::new(),
            headers: HashMap::new(),
            body: None,
            encoding: None,
        }
    }

    /// Create a new POST request (procedure)
    pub fn procedure(nsid: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            nsid: nsid.into(),
            params: Vec::new(),
            headers: HashMap::new(),
            body: None,
            encoding: Some("application/json".to_string()),
        }
    }

    /// Add a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add a header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request body from JSON
    pub fn json_body<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(value)?);
        self.encoding = Some("application/json".to_string());
        Ok(self)
    }
}

/// XRPC response with status, headers, and decoded data
#[derive(Debug, Clone)]
pub struct XrpcResponse<T> {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response data
    pub data: T,
}

impl<T> XrpcResponse<T> {
    /// Create a new response
    pub fn new(status: u16, headers: HashMap<String, String>, data: T) -> Self {
        Self { status, headers, data }
    }

    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&String> {
        self.headers.get(key)
    }

    /// Check if the response is successful (2xx status)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Configuration for the XRPC client
#[derive(Debug, Clone)]
pub struct XrpcClientConfig {
    /// Base service URL (e.g., "https://bsky.social")
    pub service_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for XrpcClientConfig {
    fn default() -> Self {
        Self {
            service_url: "https://bsky.social".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("Skylark/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl XrpcClientConfig {
    /// Create a new config with a service URL
    pub fn new(service_url: impl Into<String>) -> Self {
        Self { service_url: service_url.into(), ..Default::default() }
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Standard XRPC error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrpcErrorResponse {
    /// Error code
    pub error: String,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// XRPC client for making requests to an AT Protocol service
///
/// The auth header is owned by whoever holds the client mutably (the
/// agent); everyone else borrows the client read-only per call.
#[derive(Debug, Clone)]
pub struct XrpcClient {
    client: reqwest::Client,
    config: XrpcClientConfig,
    auth_header: Option<String>,
}

impl XrpcClient {
    /// Create a new XRPC client
    pub fn new(config: XrpcClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .expect("HTTP client construction");

        Self { client, config, auth_header: None }
    }

    /// Set or clear the Authorization header used for all requests
    pub fn set_auth_header(&mut self, auth: Option<String>) {
        self.auth_header = auth;
    }

    /// Make a query request (GET)
    pub async fn query<T>(&self, request: XrpcRequest) -> Result<XrpcResponse<T>, XrpcError>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.execute_request(request).await
    }

    /// Make a procedure request (POST)
    pub async fn procedure<T>(&self, request: XrpcRequest) -> Result<XrpcResponse<T>, XrpcError>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.execute_request(request).await
    }

    async fn execute_request<T>(&self, request: XrpcRequest) -> Result<XrpcResponse<T>, XrpcError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/xrpc/{}", self.config.service_url, request.nsid);

        let mut req = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };

        for (key, value) in &request.params {
            req = req.query(&[(key, value)]);
        }

        if let Some(auth) = &self.auth_header {
            req = req.header("Authorization", auth);
        }

        for (key, value) in &request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = &request.body {
            if let Some(encoding) = &request.encoding {
                req = req.header("Content-Type", encoding);
            }
            req = req.body(body.clone());
        }

        let response = req
            .send()
            .await
            .map_err(|e| XrpcError::new(0, "NetworkError", format!("Request failed: {e}")))?;

        self.parse_response(response).await
    }

    async fn parse_response<T>(
        &self,
        response: reqwest::Response,
    ) -> Result<XrpcResponse<T>, XrpcError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(value_str) = value.to_str() {
                headers.insert(key.to_string(), value_str.to_string());
            }
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();

            return Err(match serde_json::from_str::<XrpcErrorResponse>(&error_body) {
                Ok(err) => XrpcError::new(status, err.error, err.message),
                Err(_) => XrpcError::new(status, "Unknown", format!("HTTP {status}: {error_body}")),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| XrpcError::new(0, "ParseError", format!("Failed to read response: {e}")))?;

        // Some procedures (deleteSession among them) respond with no body.
        let payload = if body.is_empty() { "null" } else { body.as_str() };
        let data: T = serde_json::from_str(payload)
            .map_err(|e| XrpcError::new(0, "ParseError", format!("Failed to parse JSON: {e}")))?;

        Ok(XrpcResponse::new(status, headers, data))
    }

    /// Get the client configuration
    pub fn config(&self) -> &XrpcClientConfig {
        &self.config
    }

    /// Get the service URL
    pub fn service_url(&self) -> &str {
        &self.config.service_url
    }

    /// Check whether an auth header is currently set
    pub fn is_authenticated(&self) -> bool {
        self.auth_header.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(XrpcError::new(404, "NotFound", "gone").kind(), ErrorKind::NotFound);
        assert_eq!(XrpcError::new(400, "InvalidRequest", "bad").kind(), ErrorKind::BadRequest);
        assert_eq!(
            XrpcError::new(401, "AuthenticationRequired", "who").kind(),
            ErrorKind::Unauthenticated
        );
        assert_eq!(XrpcError::new(500, "Internal", "boom").kind(), ErrorKind::Other);
    }

    #[test]
    fn test_network_error_statuses() {
        assert!(XrpcError::new(503, "ServiceUnavailable", "down").is_network_error());
        assert!(XrpcError::new(0, "NetworkError", "no route").is_network_error());
        assert!(!XrpcError::new(400, "InvalidRequest", "bad").is_network_error());
        assert!(!XrpcError::new(404, "NotFound", "gone").is_network_error());
    }

    #[test]
    fn test_request_query_builder() {
        let req = XrpcRequest::query("app.bsky.feed.getTimeline")
            .param("limit", "25")
            .param("cursor", "abc")
            .header("Atproto-Accept-Labelers", "did:plc:labeler");

        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.nsid, "app.bsky.feed.getTimeline");
        assert_eq!(req.params[0], ("limit".to_string(), "25".to_string()));
        assert_eq!(req.params[1], ("cursor".to_string(), "abc".to_string()));
        assert!(req.body.is_none());
    }

    #[test]
    fn test_request_procedure_json_body() {
        #[derive(Serialize)]
        struct Input {
            identifier: String,
        }

        let req = XrpcRequest::procedure("com.atproto.server.createSession")
            .json_body(&Input { identifier: "alice.example.com".to_string() })
            .unwrap();

        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.encoding, Some("application/json".to_string()));
        let body = String::from_utf8(req.body.unwrap()).unwrap();
        assert!(body.contains("alice.example.com"));
    }

    #[test]
    fn test_response_accessors() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        let response = XrpcResponse::new(200, headers, ());
        assert!(response.is_success());
        assert_eq!(response.header("content-type").unwrap(), "application/json");
    }

    #[test]
    fn test_client_auth_header() {
        let mut client = XrpcClient::new(XrpcClientConfig::new("https://pds.example.com"));
        assert!(!client.is_authenticated());

        client.set_auth_header(Some("Bearer token".to_string()));
        assert!(client.is_authenticated());

        client.set_auth_header(None);
        assert!(!client.is_authenticated());
    }

    #[test]
    fn test_client_config_default() {
        let config = XrpcClientConfig::default();
        assert_eq!(config.service_url, "https://bsky.social");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("Skylark/"));
    }
}
