//! # restmap Library
//!
//! Declarative mapping of XML REST representations onto Rust objects, with
//! lazy parsing of fetched bodies and a `Last-Modified` based conditional
//! cache in front of the transport.

pub mod caching;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod lazy;
pub mod logging;
pub mod naming;
pub mod resource;
pub mod schema;
pub mod store;
pub mod transport;

pub use caching::{ConditionalCache, DEFAULT_VALIDATION_HEADER, StoredResponse, normalize};
pub use config::{CacheConfig, ClientConfig, ConfigError, ConfigManager, EnvProvider, HttpConfig};
pub use convert::{Converter, Value};
pub use document::{DEFAULT_MAX_DEPTH, Document, DocumentParser, Node, Selector, XmlParser};
pub use error::{
    ConversionError, DocumentError, Error, MappingError, MappingResult, Result, SchemaError,
    SelectorError, StoreError,
};
pub use lazy::{Instantiator, LazyCollection, LazyResource};
pub use logging::RequestLogger;
pub use resource::{Resource, ResourceBuilder};
pub use schema::{
    AttributeRule, FieldValue, Mapped, Representation, RuleKind, Schema, SchemaBuilder, SchemaRef,
    SchemaRegistry, collection_items, materialize, materialize_many,
};
pub use store::{CacheStore, DiskStore, MemoryStore, TieredStore};
pub use transport::{HeaderHook, Headers, HttpRequest, HttpResponse, HttpTransport, Method, Transport};
