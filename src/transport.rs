use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Error, Result};

/// Header map with lowercase names
pub type Headers = BTreeMap<String, String>;

/// Callback that adjusts the default headers before each request
pub type HeaderHook = Arc<dyn Fn(&mut Headers) + Send + Sync>;

/// HTTP verbs used by the resource client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// An outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A received (or replayed) response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Effective URL after redirects
    pub url: String,
    /// Whether the body was replayed from the cache store
    pub from_cache: bool,
}

impl HttpResponse {
    pub fn new(status: u16, url: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            url: url.into(),
            from_cache: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }

    /// Canonical reason phrase for the status code
    pub fn reason(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Something that turns a request into a response
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).request(request).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).request(request).await
    }
}

/// Absolute URLs pass through; anything else is appended to `host`
pub fn resolve_url(host: &str, url: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(url) {
        return Ok(absolute);
    }

    if host.is_empty() {
        return Err(Error::InvalidUrl {
            url: url.to_string(),
            details: "relative path with no host configured".to_string(),
        });
    }

    let joined = format!("{}/{}", host.trim_end_matches('/'), url.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| Error::InvalidUrl {
        url: joined,
        details: e.to_string(),
    })
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    config: HttpConfig,
    hooks: Vec<HeaderHook>,
}

impl HttpTransport {
    /// Create a new transport with the given configuration
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Client {
                url: config.host.clone(),
                status: None,
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            config,
            hooks: Vec::new(),
        })
    }

    /// Append a header hook; hooks run in the order they were added
    pub fn with_header_hook(mut self, hook: HeaderHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Headers sent with every request, after all hooks have run
    pub fn default_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("user-agent".to_string(), self.config.user_agent.clone());
        headers.insert("accept".to_string(), self.config.accept.clone());
        headers.insert("content-type".to_string(), self.config.content_type.clone());

        for hook in &self.hooks {
            hook(&mut headers);
        }
        headers
    }

    pub fn resolve_url(&self, url: &str) -> Result<Url> {
        resolve_url(&self.config.host, url)
    }

    fn map_error(url: &str, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            return Error::Timeout {
                url: url.to_string(),
                message: error.to_string(),
            };
        }

        Error::Client {
            url: url.to_string(),
            status: error.status().map(|status| status.as_u16()),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.resolve_url(&request.url)?;
        debug!(method = %request.method, url = %url, "dispatching request");

        let mut builder = self.client.request(request.method.into(), url.clone());
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }

        let mut headers = self.default_headers();
        headers.extend(request.headers);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_ref());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_error(url.as_str(), e))?;

        if let Err(e) = response.error_for_status_ref() {
            return Err(Self::map_error(url.as_str(), e));
        }

        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::map_error(&effective_url, e))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            url: effective_url,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HttpConfig {
        HttpConfig {
            host: "http://test.net".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_transport_creation() {
        let transport = HttpTransport::new(HttpConfig::default());
        assert!(transport.is_ok());
    }

    #[test]
    fn test_default_headers() {
        let transport = HttpTransport::new(test_config()).unwrap();
        let headers = transport.default_headers();

        assert_eq!(headers.get("accept").unwrap(), "application/xml");
        assert_eq!(headers.get("content-type").unwrap(), "application/xml");
        assert!(headers.get("user-agent").unwrap().starts_with("restmap/"));
    }

    #[test]
    fn test_header_hooks_apply_in_order() {
        let transport = HttpTransport::new(test_config())
            .unwrap()
            .with_header_hook(Arc::new(|headers: &mut Headers| {
                headers.insert("x-api-version".to_string(), "1".to_string());
                headers.insert("accept".to_string(), "text/xml".to_string());
            }))
            .with_header_hook(Arc::new(|headers: &mut Headers| {
                headers.insert("x-api-version".to_string(), "2".to_string());
            }));

        let headers = transport.default_headers();
        assert_eq!(headers.get("x-api-version").unwrap(), "2");
        assert_eq!(headers.get("accept").unwrap(), "text/xml");
    }

    #[test]
    fn test_resolve_url() {
        let transport = HttpTransport::new(test_config()).unwrap();

        let url = transport.resolve_url("/users/1/posts.xml").unwrap();
        assert_eq!(url.as_str(), "http://test.net/users/1/posts.xml");

        let url = transport.resolve_url("users/1").unwrap();
        assert_eq!(url.as_str(), "http://test.net/users/1");

        let url = transport.resolve_url("https://other.net/feed.xml").unwrap();
        assert_eq!(url.as_str(), "https://other.net/feed.xml");
    }

    #[test]
    fn test_relative_url_without_host() {
        let transport = HttpTransport::new(HttpConfig::default()).unwrap();
        let error = transport.resolve_url("/posts.xml").unwrap_err();
        assert!(matches!(error, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_request_builders_lowercase_headers() {
        let request = HttpRequest::get("/posts.xml")
            .with_params([("page", "2")])
            .with_header("If-Modified-Since", "Mon, 02 Apr 2012 15:20:41 GMT");

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.params, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(
            request.header("if-modified-since"),
            Some("Mon, 02 Apr 2012 15:20:41 GMT")
        );
        assert_eq!(
            request.header("IF-MODIFIED-SINCE"),
            request.header("If-Modified-Since")
        );
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse::new(304, "http://test.net/posts.xml")
            .with_header("Last-Modified", "Mon, 02 Apr 2012 15:20:41 GMT");

        assert!(response.is_not_modified());
        assert!(!response.is_success());
        assert_eq!(response.reason(), "Not Modified");
        assert!(response.header("last-modified").is_some());

        let ok = HttpResponse::new(200, "http://test.net").with_body("<a/>");
        assert!(ok.is_success());
        assert_eq!(ok.text(), "<a/>");
        assert_eq!(ok.reason(), "OK");
    }

    #[tokio::test]
    async fn test_mock_transport_through_arc() {
        let mut mock = MockTransport::new();
        mock.expect_request()
            .times(1)
            .returning(|request| Ok(HttpResponse::new(200, request.url)));

        let transport: Arc<dyn Transport> = Arc::new(mock);
        let response = transport
            .request(HttpRequest::get("http://test.net/a"))
            .await
            .unwrap();
        assert_eq!(response.url, "http://test.net/a");
    }
}
