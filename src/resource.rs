//! High-level client tying transport, cache, parser and schemas together

use std::sync::Arc;

use tracing::debug;

use crate::caching::ConditionalCache;
use crate::config::ClientConfig;
use crate::document::{DocumentParser, XmlParser};
use crate::error::Result;
use crate::lazy::{Instantiator, LazyCollection, LazyResource};
use crate::logging::RequestLogger;
use crate::schema::{Mapped, Representation, Schema};
use crate::store::{CacheStore, TieredStore};
use crate::transport::{
    HeaderHook, HttpRequest, HttpResponse, HttpTransport, Method, Transport, resolve_url,
};

/// Builder for [`Resource`]
pub struct ResourceBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn CacheStore>>,
    parser: Option<Arc<dyn DocumentParser>>,
    hooks: Vec<HeaderHook>,
    transport: Option<Arc<dyn Transport>>,
}

impl ResourceBuilder {
    /// Store for the conditional cache; defaults to memory + disk from the config
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn document_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Header hooks only apply to the built-in HTTP transport
    pub fn header_hook(mut self, hook: HeaderHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Replace the built-in HTTP transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Resource> {
        let base: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let http = self
                    .hooks
                    .into_iter()
                    .fold(HttpTransport::new(self.config.http.clone())?, |http, hook| {
                        http.with_header_hook(hook)
                    });
                Arc::new(http)
            }
        };

        let cached: Arc<dyn Transport> = if self.config.cache.enabled {
            let store = self
                .store
                .unwrap_or_else(|| Arc::new(TieredStore::from_config(&self.config.cache)));
            Arc::new(ConditionalCache::from_config(base, store, &self.config.cache))
        } else {
            base
        };

        Ok(Resource {
            transport: Arc::new(RequestLogger::new(cached)),
            parser: self.parser.unwrap_or_else(|| Arc::new(XmlParser)),
            config: self.config,
        })
    }
}

/// Client for one REST host
#[derive(Clone)]
pub struct Resource {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    parser: Arc<dyn DocumentParser>,
}

impl Resource {
    pub fn builder(config: ClientConfig) -> ResourceBuilder {
        ResourceBuilder {
            config,
            store: None,
            parser: None,
            hooks: Vec::new(),
            transport: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send(&self, method: Method, path: &str, params: &[(&str, &str)], body: Option<Vec<u8>>) -> Result<HttpResponse> {
        let url = resolve_url(&self.config.http.host, path)?;
        let mut request = HttpRequest::new(method, url.as_str()).with_params(params.iter().copied());
        request.body = body;
        self.transport.request(request).await
    }

    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<HttpResponse> {
        self.send(Method::Get, path, params, None).await
    }

    pub async fn put(&self, path: &str, body: impl Into<Vec<u8>>) -> Result<HttpResponse> {
        self.send(Method::Put, path, &[], Some(body.into())).await
    }

    pub async fn post(&self, path: &str, body: impl Into<Vec<u8>>) -> Result<HttpResponse> {
        self.send(Method::Post, path, &[], Some(body.into())).await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.send(Method::Delete, path, &[], None).await
    }

    /// Fetch a collection document; items are instantiated on first access
    pub async fn collection_with<T>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        instantiator: Instantiator<T>,
    ) -> Result<LazyCollection<T>> {
        let response = self.get(path, params).await?;
        debug!(url = %response.url, from_cache = response.from_cache, "collection fetched");
        Ok(LazyCollection::new(response, Arc::clone(&self.parser), instantiator))
    }

    pub async fn collection<M: Mapped>(&self, path: &str, params: &[(&str, &str)]) -> Result<LazyCollection<M>> {
        self.collection_with(path, params, Instantiator::mapped()).await
    }

    pub async fn representations(
        &self,
        path: &str,
        params: &[(&str, &str)],
        schema: Arc<Schema>,
    ) -> Result<LazyCollection<Representation>> {
        self.collection_with(path, params, Instantiator::schema(schema)).await
    }

    pub async fn member_with<T>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        instantiator: Instantiator<T>,
    ) -> Result<LazyResource<T>> {
        let response = self.get(path, params).await?;
        Ok(LazyResource::new(response, Arc::clone(&self.parser), instantiator))
    }

    pub async fn member<M: Mapped>(&self, path: &str, params: &[(&str, &str)]) -> Result<LazyResource<M>> {
        self.member_with(path, params, Instantiator::mapped()).await
    }
}
