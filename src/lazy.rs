//! Deferred parsing of fetched bodies
//!
//! A fetch hands back a [`LazyResource`] or [`LazyCollection`] holding the raw
//! response. Nothing is parsed until a value is observed; the first
//! observation parses and instantiates, every later one reuses the outcome,
//! including a failed one.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::caching::normalize;
use crate::document::{Document, DocumentParser, Node};
use crate::error::{MappingError, MappingResult};
use crate::schema::{Mapped, Representation, Schema, collection_items, materialize};
use crate::transport::HttpResponse;

type InstantiateFn<T> = dyn Fn(&Node) -> MappingResult<Option<T>> + Send + Sync;

/// Turns a node into a `T`, or `None` to drop it
pub struct Instantiator<T> {
    instantiate: Arc<InstantiateFn<T>>,
}

impl<T> Clone for Instantiator<T> {
    fn clone(&self) -> Self {
        Self {
            instantiate: Arc::clone(&self.instantiate),
        }
    }
}

impl<T> Instantiator<T> {
    pub fn from_fn<F>(instantiate: F) -> Self
    where
        F: Fn(&Node) -> MappingResult<Option<T>> + Send + Sync + 'static,
    {
        Self {
            instantiate: Arc::new(instantiate),
        }
    }

    pub fn instantiate(&self, node: &Node) -> MappingResult<Option<T>> {
        (self.instantiate)(node)
    }
}

impl Instantiator<Representation> {
    /// Plain representations of `schema`
    pub fn schema(schema: Arc<Schema>) -> Self {
        Self::from_fn(move |node| materialize(&schema, node).map(Some))
    }
}

impl<M: Mapped> Instantiator<M> {
    /// Typed objects through [`Mapped::from_representation`]
    pub fn mapped() -> Self {
        Self::from_fn(|node| {
            let schema = M::schema()?;
            M::from_representation(materialize(&schema, node)?)
        })
    }
}

enum State<T, V> {
    Pending(Instantiator<T>),
    Evaluated(V),
    Failed(MappingError),
}

impl<T, V> State<T, V> {
    fn force(
        &mut self,
        evaluate: impl FnOnce(&Instantiator<T>) -> MappingResult<V>,
    ) -> MappingResult<&V> {
        if let State::Pending(instantiator) = self {
            let next = match evaluate(instantiator) {
                Ok(value) => State::Evaluated(value),
                Err(error) => State::Failed(error),
            };
            *self = next;
        }

        match self {
            State::Evaluated(value) => Ok(value),
            State::Failed(error) => Err(error.clone()),
            State::Pending(_) => unreachable!("lazy state is resolved above"),
        }
    }

    fn into_value(self, evaluate: impl FnOnce(&Instantiator<T>) -> MappingResult<V>) -> MappingResult<V> {
        match self {
            State::Pending(instantiator) => evaluate(&instantiator),
            State::Evaluated(value) => Ok(value),
            State::Failed(error) => Err(error),
        }
    }

    fn is_evaluated(&self) -> bool {
        !matches!(self, State::Pending(_))
    }

    fn label(&self) -> &'static str {
        match self {
            State::Pending(_) => "pending",
            State::Evaluated(_) => "evaluated",
            State::Failed(_) => "failed",
        }
    }
}

fn parse(parser: &dyn DocumentParser, response: &HttpResponse) -> MappingResult<Document> {
    debug!(url = %response.url, bytes = response.body.len(), "parsing response body");
    Ok(parser.parse(&response.body)?)
}

fn evaluate_single<T>(
    parser: &dyn DocumentParser,
    response: &HttpResponse,
    instantiator: &Instantiator<T>,
) -> MappingResult<Option<T>> {
    let document = parse(parser, response)?;
    instantiator.instantiate(document.root())
}

fn evaluate_many<T>(
    parser: &dyn DocumentParser,
    response: &HttpResponse,
    instantiator: &Instantiator<T>,
) -> MappingResult<Vec<T>> {
    let document = parse(parser, response)?;
    let nodes = collection_items(&document);

    let mut items = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Some(item) = instantiator.instantiate(node)? {
            items.push(item);
        }
    }

    debug!(url = %response.url, items = items.len(), "instantiated collection");
    Ok(items)
}

/// Hex SHA-256 over the normalized effective URL and the body.
///
/// Identical URL and bytes give identical keys, so a replayed response keys
/// the same as the one it was stored from.
pub fn content_key(response: &HttpResponse) -> String {
    let url = normalize(&response.url, &[]).unwrap_or_else(|_| response.url.clone());

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    hasher.update(&response.body);
    hex::encode(hasher.finalize())
}

/// A single object parsed on first use
pub struct LazyResource<T> {
    response: HttpResponse,
    parser: Arc<dyn DocumentParser>,
    state: State<T, Option<T>>,
}

impl<T> LazyResource<T> {
    pub fn new(response: HttpResponse, parser: Arc<dyn DocumentParser>, instantiator: Instantiator<T>) -> Self {
        Self {
            response,
            parser,
            state: State::Pending(instantiator),
        }
    }

    /// The object, or `None` when the instantiator filtered it out
    pub fn get(&mut self) -> MappingResult<Option<&T>> {
        let Self {
            response,
            parser,
            state,
        } = self;
        state
            .force(|instantiator| evaluate_single(parser.as_ref(), response, instantiator))
            .map(Option::as_ref)
    }

    pub fn into_inner(self) -> MappingResult<Option<T>> {
        let Self {
            response,
            parser,
            state,
        } = self;
        state.into_value(|instantiator| evaluate_single(parser.as_ref(), &response, instantiator))
    }

    pub fn is_evaluated(&self) -> bool {
        self.state.is_evaluated()
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn cache_key(&self) -> String {
        content_key(&self.response)
    }
}

impl<T> fmt::Debug for LazyResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResource")
            .field("url", &self.response.url)
            .field("state", &self.state.label())
            .finish()
    }
}

/// A list of objects parsed on first use
pub struct LazyCollection<T> {
    response: HttpResponse,
    parser: Arc<dyn DocumentParser>,
    state: State<T, Vec<T>>,
}

impl<T> LazyCollection<T> {
    pub fn new(response: HttpResponse, parser: Arc<dyn DocumentParser>, instantiator: Instantiator<T>) -> Self {
        Self {
            response,
            parser,
            state: State::Pending(instantiator),
        }
    }

    pub fn as_slice(&mut self) -> MappingResult<&[T]> {
        let Self {
            response,
            parser,
            state,
        } = self;
        state
            .force(|instantiator| evaluate_many(parser.as_ref(), response, instantiator))
            .map(Vec::as_slice)
    }

    pub fn len(&mut self) -> MappingResult<usize> {
        Ok(self.as_slice()?.len())
    }

    pub fn is_empty(&mut self) -> MappingResult<bool> {
        Ok(self.as_slice()?.is_empty())
    }

    pub fn first(&mut self) -> MappingResult<Option<&T>> {
        Ok(self.as_slice()?.first())
    }

    pub fn last(&mut self) -> MappingResult<Option<&T>> {
        Ok(self.as_slice()?.last())
    }

    pub fn get(&mut self, index: usize) -> MappingResult<Option<&T>> {
        Ok(self.as_slice()?.get(index))
    }

    pub fn into_vec(self) -> MappingResult<Vec<T>> {
        let Self {
            response,
            parser,
            state,
        } = self;
        state.into_value(|instantiator| evaluate_many(parser.as_ref(), &response, instantiator))
    }

    pub fn is_evaluated(&self) -> bool {
        self.state.is_evaluated()
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn cache_key(&self) -> String {
        content_key(&self.response)
    }
}

impl<T> fmt::Debug for LazyCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCollection")
            .field("url", &self.response.url)
            .field("state", &self.state.label())
            .finish()
    }
}
