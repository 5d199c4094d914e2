//! Shared helpers for the integration tests: fixtures, mapped types used
//! across suites, and a scripted transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use restmap::{
    Document, DocumentError, DocumentParser, HttpRequest, HttpResponse, Mapped, MappingResult,
    Representation, Result, SchemaBuilder, SchemaRef, Transport, XmlParser,
};

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixtures_dir().join(format!("{}.xml", name)))
        .unwrap_or_else(|e| panic!("missing fixture {}: {}", name, e))
}

/// Route library logs to the test harness; `RUST_LOG=restmap=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Mapped for User {
    const NAME: &'static str = "User";

    fn define(schema: SchemaBuilder) -> SchemaBuilder {
        schema.string(&["first_name", "last_name"])
    }

    fn from_representation(representation: Representation) -> MappingResult<Option<Self>> {
        Ok(Some(User {
            first_name: representation.text("first_name").map(str::to_string),
            last_name: representation.text("last_name").map(str::to_string),
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub user_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub body: Option<String>,
    pub created_at: Option<NaiveDate>,
    pub user: Option<User>,
    pub replies: Vec<Post>,
}

impl Mapped for Post {
    const NAME: &'static str = "Post";

    fn define(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .objectid(&["id", "user_id", "parent_id"])
            .date(&["created_at"])
            .string(&["body"])
            .nested("user", "user", SchemaRef::of::<User>())
            .repeated("replies/userPost", "replies", SchemaRef::This)
    }

    fn from_representation(representation: Representation) -> MappingResult<Option<Self>> {
        Ok(Some(Post {
            id: representation.require_integer("id")?,
            user_id: representation.integer("user_id"),
            parent_id: representation.integer("parent_id"),
            body: representation.text("body").map(str::to_string),
            created_at: representation.date("created_at"),
            user: representation.mapped("user")?,
            replies: representation.mapped_list("replies")?,
        }))
    }
}

/// Users flagged inactive are dropped from collections
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveUser {
    pub id: i64,
    pub first_name: String,
}

impl Mapped for ActiveUser {
    const NAME: &'static str = "ActiveUser";

    fn define(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .objectid(&["id"])
            .string(&["first_name"])
            .boolean(&["active"])
    }

    fn from_representation(representation: Representation) -> MappingResult<Option<Self>> {
        if !representation.boolean("active") {
            return Ok(None);
        }
        Ok(Some(ActiveUser {
            id: representation.require_integer("id")?,
            first_name: representation.require_text("first_name")?,
        }))
    }
}

/// XML parser that counts its invocations
pub fn counting_parser(calls: Arc<AtomicUsize>) -> Arc<dyn DocumentParser> {
    Arc::new(move |bytes: &[u8]| {
        calls.fetch_add(1, Ordering::SeqCst);
        XmlParser.parse(bytes)
    })
}

/// Parser that fails every time it is called
pub fn refusing_parser() -> Arc<dyn DocumentParser> {
    Arc::new(|_: &[u8]| -> std::result::Result<Document, DocumentError> {
        Err(DocumentError::Refused {
            details: "parser should not have been called".to_string(),
        })
    })
}

/// Transport answering from a queue of canned results and recording requests
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<HttpResponse>) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted response left for {}", url))
    }
}
