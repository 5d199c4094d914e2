//! Conditional GET caching in front of any [`Transport`]
//!
//! Each successful GET whose response carries the validation header (by
//! default `Last-Modified`) leaves two entries in the store, keyed by the
//! normalized request URL:
//!
//! * `{url}:timestamp` holds the raw validator value
//! * `{url}:response` holds the response as JSON
//!
//! The next GET for the same URL sends the validator back as
//! `If-Modified-Since`. A `304 Not Modified` answer is then replaced by the
//! stored response, flagged with `from_cache`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CacheConfig;
use crate::convert::parse_timestamp;
use crate::error::{Error, Result};
use crate::store::CacheStore;
use crate::transport::{Headers, HttpRequest, HttpResponse, Method, Transport};

pub const DEFAULT_VALIDATION_HEADER: &str = "last-modified";

const KEPT_HEADERS: [&str; 4] = ["content-type", "last-modified", "etag", "cache-control"];

/// A response as persisted under the `:response` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Headers,
    #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_hex")]
    pub body: Vec<u8>,
    pub url: String,
}

impl StoredResponse {
    /// Keep the body and the headers needed to replay the response
    pub fn capture(response: &HttpResponse, validation_header: &str) -> Self {
        let headers = response
            .headers
            .iter()
            .filter(|(name, _)| {
                KEPT_HEADERS.contains(&name.as_str()) || name.eq_ignore_ascii_case(validation_header)
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            status: response.status,
            headers,
            body: response.body.clone(),
            url: response.url.clone(),
        }
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers,
            body: self.body,
            url: self.url,
            from_cache: true,
        }
    }
}

fn serialize_hex<S: Serializer>(body: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(body))
}

fn deserialize_hex<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    hex::decode(encoded).map_err(serde::de::Error::custom)
}

/// Canonical form of a URL used as the cache key.
///
/// Drops the fragment and the ignored query parameters, then sorts what is
/// left by name and value. Applying it twice gives the same string.
pub fn normalize(url: &str, ignore_params: &[String]) -> Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| Error::InvalidUrl {
        url: url.to_string(),
        details: e.to_string(),
    })?;
    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| !ignore_params.iter().any(|ignored| ignored == name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(parsed.to_string())
}

/// Full URL of a request, with its params appended to the query string
pub fn request_url(request: &HttpRequest) -> Result<Url> {
    let mut url = Url::parse(&request.url).map_err(|e| Error::InvalidUrl {
        url: request.url.clone(),
        details: e.to_string(),
    })?;
    if !request.params.is_empty() {
        url.query_pairs_mut().extend_pairs(&request.params);
    }
    Ok(url)
}

/// Stored validators are sent back as HTTP dates when they can be read as a
/// point in time, and verbatim otherwise.
fn if_modified_since(stored: &str) -> String {
    match parse_timestamp(stored.trim()) {
        Some(timestamp) => timestamp
            .with_timezone(&Utc)
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string(),
        None => stored.to_string(),
    }
}

/// Transport decorator performing conditional GETs against a store
pub struct ConditionalCache<T, S> {
    inner: T,
    store: S,
    ignore_params: Vec<String>,
    validation_header: String,
}

impl<T: Transport, S: CacheStore> ConditionalCache<T, S> {
    pub fn new(inner: T, store: S) -> Self {
        Self {
            inner,
            store,
            ignore_params: Vec::new(),
            validation_header: DEFAULT_VALIDATION_HEADER.to_string(),
        }
    }

    pub fn from_config(inner: T, store: S, config: &CacheConfig) -> Self {
        Self::new(inner, store)
            .with_ignore_params(config.ignore_params.iter().cloned())
            .with_validation_header(&config.validation_header)
    }

    /// Query parameters left out of the cache key
    pub fn with_ignore_params(mut self, params: impl IntoIterator<Item = String>) -> Self {
        self.ignore_params = params.into_iter().collect();
        self
    }

    /// Response header whose value validates the stored copy
    pub fn with_validation_header(mut self, name: &str) -> Self {
        self.validation_header = name.to_ascii_lowercase();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn cache_key(&self, request: &HttpRequest) -> Result<String> {
        normalize(request_url(request)?.as_str(), &self.ignore_params)
    }

    async fn replay(&self, key: &str) -> Result<HttpResponse> {
        let response_key = format!("{}:response", key);
        match self.store.read(&response_key).await? {
            Some(bytes) => {
                let stored: StoredResponse = serde_json::from_slice(&bytes)?;
                info!(key, "304 Not Modified, replaying stored response");
                Ok(stored.into_response())
            }
            None => {
                warn!(key, "304 Not Modified but no stored response");
                Err(Error::StaleCacheMiss {
                    key: key.to_string(),
                })
            }
        }
    }

    async fn remember(&self, key: &str, validator: &str, response: &HttpResponse) -> Result<()> {
        let stored = StoredResponse::capture(response, &self.validation_header);
        let encoded = serde_json::to_vec(&stored)?;

        self.store
            .write(&format!("{}:timestamp", key), validator.as_bytes())
            .await?;
        self.store
            .write(&format!("{}:response", key), &encoded)
            .await?;

        debug!(key, validator, bytes = encoded.len(), "stored response");
        Ok(())
    }
}

#[async_trait]
impl<T: Transport, S: CacheStore> Transport for ConditionalCache<T, S> {
    async fn request(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        if request.method != Method::Get {
            return self.inner.request(request).await;
        }

        let key = self.cache_key(&request)?;
        match self.store.read(&format!("{}:timestamp", key)).await {
            Ok(Some(stored)) => {
                let validator = String::from_utf8_lossy(&stored).into_owned();
                debug!(key = %key, validator = %validator, "cache entry found, sending conditional request");
                request
                    .headers
                    .insert("if-modified-since".to_string(), if_modified_since(&validator));
            }
            Ok(None) => debug!(key = %key, "cache miss"),
            Err(error) => warn!(key = %key, error = %error, "cache read failed, sending plain request"),
        }

        let response = self.inner.request(request).await?;
        if response.is_not_modified() {
            return self.replay(&key).await;
        }

        if response.is_success()
            && let Some(validator) = response.header(&self.validation_header)
            && let Err(error) = self.remember(&key, validator, &response).await
        {
            warn!(key = %key, error = %error, "failed to store response");
        }

        Ok(response)
    }
}
