use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::caching::request_url;
use crate::error::Result;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Transport decorator that logs each request and its outcome
pub struct RequestLogger<T> {
    inner: T,
}

impl<T: Transport> RequestLogger<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

/// `GET http://host/path?page=2`, query parameters included
pub fn request_line(request: &HttpRequest) -> String {
    match request_url(request) {
        Ok(url) => format!("{} {}", request.method, url),
        Err(_) => format!("{} {}", request.method, request.url),
    }
}

/// `--> 200 OK 1.25KB (12ms)`
pub fn summary_line(response: &HttpResponse, elapsed_ms: u128) -> String {
    format!(
        "--> {} {} {:.2}KB ({}ms)",
        response.status,
        response.reason(),
        response.body.len() as f64 / 1024.0,
        elapsed_ms
    )
}

#[async_trait]
impl<T: Transport> Transport for RequestLogger<T> {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        info!("{}", request_line(&request));
        let started = Instant::now();

        match self.inner.request(request).await {
            Ok(response) => {
                info!(
                    from_cache = response.from_cache,
                    "{}",
                    summary_line(&response, started.elapsed().as_millis())
                );
                Ok(response)
            }
            Err(error) => {
                warn!("--> failed after {}ms: {}", started.elapsed().as_millis(), error);
                Err(error)
            }
        }
    }
}
