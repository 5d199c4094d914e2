//! Declarative schemas and the engine that applies them to document nodes
//!
//! A [`Schema`] is an ordered list of [`AttributeRule`]s. Each rule pairs a
//! [`Selector`] with a field name and says what the matched nodes become: a
//! scalar through a [`Converter`], a nested representation, or a list of
//! representations. Sub-schemas are referenced through [`SchemaRef`], which is
//! only dereferenced while materializing. That indirection is what lets a
//! schema refer to itself (`SchemaRef::This`) or to a type whose schema has not
//! been built yet (`SchemaRef::of::<T>()`).

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::convert::{Converter, Value};
use crate::document::{DEFAULT_MAX_DEPTH, Document, Node, Selector};
use crate::error::{DocumentError, MappingError, MappingResult, SchemaError, SelectorError};
use crate::naming;

/// What the nodes matched by a rule become
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// First match converted to a scalar value
    Scalar(Converter),
    /// First match materialized with a sub-schema
    Nested(SchemaRef),
    /// Every match materialized with a sub-schema, in document order
    Repeated(SchemaRef),
}

/// A single `selector → field` mapping
#[derive(Debug, Clone)]
pub struct AttributeRule {
    pub selector: Selector,
    pub field: String,
    pub kind: RuleKind,
}

impl AttributeRule {
    pub fn is_repeated(&self) -> bool {
        matches!(self.kind, RuleKind::Repeated(_))
    }
}

/// Reference to a sub-schema, resolved lazily at materialization time
#[derive(Clone)]
pub enum SchemaRef {
    /// The schema the rule belongs to
    This,
    /// A schema built inline
    Inline(Arc<Schema>),
    /// The schema of a [`Mapped`] type, built on first use
    Type(fn() -> Result<Arc<Schema>, SchemaError>),
    /// A schema registered by name in the global registry
    Named(String),
    /// The generic sub-schema base with no fields
    Any,
}

impl SchemaRef {
    pub fn of<M: Mapped>() -> Self {
        SchemaRef::Type(M::schema)
    }

    pub fn named(name: impl Into<String>) -> Self {
        SchemaRef::Named(name.into())
    }

    fn resolve(&self, current: &Arc<Schema>) -> Result<Arc<Schema>, SchemaError> {
        match self {
            SchemaRef::This => Ok(Arc::clone(current)),
            SchemaRef::Inline(schema) => Ok(Arc::clone(schema)),
            SchemaRef::Type(schema) => schema(),
            SchemaRef::Named(name) => SchemaRegistry::global()
                .get(name)
                .ok_or_else(|| SchemaError::UnknownSchema { name: name.clone() }),
            SchemaRef::Any => Ok(any_schema()),
        }
    }
}

impl fmt::Debug for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaRef::This => f.write_str("This"),
            SchemaRef::Inline(schema) => f.debug_tuple("Inline").field(&schema.name).finish(),
            SchemaRef::Type(_) => f.write_str("Type(..)"),
            SchemaRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            SchemaRef::Any => f.write_str("Any"),
        }
    }
}

fn any_schema() -> Arc<Schema> {
    static ANY: OnceLock<Arc<Schema>> = OnceLock::new();
    Arc::clone(ANY.get_or_init(|| {
        Arc::new(Schema {
            name: "Any".to_string(),
            rules: Vec::new(),
        })
    }))
}

/// Immutable ordered list of attribute rules
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    rules: Vec<AttributeRule>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[AttributeRule] {
        &self.rules
    }

    pub fn rule(&self, field: &str) -> Option<&AttributeRule> {
        self.rules.iter().find(|rule| rule.field == field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.field.as_str())
    }
}

/// Declaration surface for schemas.
///
/// Selector errors are collected and reported by [`SchemaBuilder::build`], so
/// declarations can be chained without intermediate `?`.
pub struct SchemaBuilder {
    name: String,
    rules: Vec<AttributeRule>,
    error: Option<SchemaError>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            error: None,
        }
    }

    fn push(mut self, selector: &str, field: impl Into<String>, kind: RuleKind) -> Self {
        if self.error.is_some() {
            return self;
        }
        match Selector::parse(selector) {
            Ok(parsed) if parsed.is_absolute() => {
                self.error = Some(
                    SelectorError {
                        selector: selector.to_string(),
                        details: "rule selectors are evaluated relative to the mapped node".to_string(),
                    }
                    .into(),
                );
            }
            Ok(selector) => self.rules.push(AttributeRule {
                selector,
                field: field.into(),
                kind,
            }),
            Err(error) => self.error = Some(error.into()),
        }
        self
    }

    fn inline(&mut self, field: &str, define: impl FnOnce(SchemaBuilder) -> SchemaBuilder) -> SchemaRef {
        let builder = define(SchemaBuilder::new(format!("{}.{}", self.name, field)));
        match builder.build() {
            Ok(schema) => SchemaRef::Inline(Arc::new(schema)),
            Err(error) => {
                self.error.get_or_insert(error);
                SchemaRef::Any
            }
        }
    }

    /// Explicit `selector → field` mapping
    pub fn attribute(self, selector: &str, field: &str, converter: Converter) -> Self {
        self.push(selector, field, RuleKind::Scalar(converter))
    }

    /// Foreign element name mapped to a derived field name (`userObjectId` → `user_id`)
    pub fn element(self, selector: &str, converter: Converter) -> Self {
        let field = naming::field_for_element(selector);
        self.push(selector, field, RuleKind::Scalar(converter))
    }

    /// snake_case fields read from lowerCamelCase elements
    pub fn fields(mut self, names: &[&str], converter: Converter) -> Self {
        for name in names {
            let selector = naming::lower_camel_case(name);
            self = self.push(&selector, *name, RuleKind::Scalar(converter.clone()));
        }
        self
    }

    pub fn string(self, names: &[&str]) -> Self {
        self.fields(names, Converter::Text)
    }

    pub fn integer(self, names: &[&str]) -> Self {
        self.fields(names, Converter::Integer)
    }

    pub fn float(self, names: &[&str]) -> Self {
        self.fields(names, Converter::Float)
    }

    pub fn date(self, names: &[&str]) -> Self {
        self.fields(names, Converter::Date)
    }

    pub fn timestamp(self, names: &[&str]) -> Self {
        self.fields(names, Converter::Timestamp)
    }

    pub fn boolean(self, names: &[&str]) -> Self {
        self.fields(names, Converter::Boolean)
    }

    /// Integer identifier fields: `id` ← `objectId`, `user_id` ← `userObjectId`
    pub fn objectid(mut self, names: &[&str]) -> Self {
        for name in names {
            let selector = naming::object_id_selector(name);
            self = self.push(&selector, *name, RuleKind::Scalar(Converter::Integer));
        }
        self
    }

    pub fn nested(self, selector: &str, field: &str, schema: SchemaRef) -> Self {
        self.push(selector, field, RuleKind::Nested(schema))
    }

    /// Nested element without an explicit sub-schema
    pub fn nested_any(self, selector: &str, field: &str) -> Self {
        self.push(selector, field, RuleKind::Nested(SchemaRef::Any))
    }

    pub fn nested_with(
        mut self,
        selector: &str,
        field: &str,
        define: impl FnOnce(SchemaBuilder) -> SchemaBuilder,
    ) -> Self {
        let schema = self.inline(field, define);
        self.push(selector, field, RuleKind::Nested(schema))
    }

    pub fn repeated(self, selector: &str, field: &str, schema: SchemaRef) -> Self {
        self.push(selector, field, RuleKind::Repeated(schema))
    }

    pub fn repeated_with(
        mut self,
        selector: &str,
        field: &str,
        define: impl FnOnce(SchemaBuilder) -> SchemaBuilder,
    ) -> Self {
        let schema = self.inline(field, define);
        self.push(selector, field, RuleKind::Repeated(schema))
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.field.as_str()) {
                return Err(SchemaError::DuplicateField {
                    schema: self.name.clone(),
                    field: rule.field.clone(),
                });
            }
        }

        Ok(Schema {
            name: self.name,
            rules: self.rules,
        })
    }
}

/// A typed object described by a schema
pub trait Mapped: Sized + Send + Sync + 'static {
    const NAME: &'static str;

    /// Declare the schema; called once, on first use
    fn define(schema: SchemaBuilder) -> SchemaBuilder;

    /// Build the object, or `Ok(None)` to drop the record from a collection
    fn from_representation(representation: Representation) -> MappingResult<Option<Self>>;

    fn schema() -> Result<Arc<Schema>, SchemaError> {
        SchemaRegistry::global().schema_for::<Self>()
    }
}

/// Schemas keyed by type identity and by name
#[derive(Default)]
pub struct SchemaRegistry {
    by_type: RwLock<HashMap<TypeId, Arc<Schema>>>,
    by_name: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static SchemaRegistry {
        static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SchemaRegistry::new)
    }

    /// Schema of `M`, built from `M::define` the first time it is asked for
    pub fn schema_for<M: Mapped>(&self) -> Result<Arc<Schema>, SchemaError> {
        let key = TypeId::of::<M>();
        if let Some(schema) = self
            .by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(schema));
        }

        // Built outside the lock: `define` may ask for other schemas.
        let built = Arc::new(M::define(SchemaBuilder::new(M::NAME)).build()?);
        let schema = Arc::clone(
            self.by_type
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key)
                .or_insert(built),
        );
        self.by_name
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(M::NAME.to_string())
            .or_insert_with(|| Arc::clone(&schema));
        Ok(schema)
    }

    /// Register a schema under its name, replacing any previous one
    pub fn register(&self, schema: Schema) -> Arc<Schema> {
        let schema = Arc::new(schema);
        self.by_name
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema.name.clone(), Arc::clone(&schema));
        schema
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.by_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// A field value together with its presence flag
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    value: Option<Value>,
    present: bool,
}

impl FieldValue {
    pub fn new(value: Option<Value>) -> Self {
        let present = match &value {
            Some(Value::Boolean(flag)) => *flag,
            Some(Value::List(items)) => !items.is_empty(),
            Some(_) => true,
            None => false,
        };
        Self { value, present }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.present
    }
}

/// A materialized object: named fields in schema order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Representation {
    schema: String,
    fields: Vec<(String, FieldValue)>,
}

impl Representation {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            fields: Vec::new(),
        }
    }

    /// Build a representation directly, without a document
    pub fn from_fields<I, K>(schema: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut representation = Self::new(schema);
        for (name, value) in fields {
            representation.set(name, Some(value));
        }
        representation
    }

    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    /// Set or clear a field; presence is recomputed from the new value
    pub fn set(&mut self, field: impl Into<String>, value: Option<Value>) {
        let field = field.into();
        let entry = FieldValue::new(value);
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = entry,
            None => self.fields.push((field, entry)),
        }
    }

    pub fn field(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.field(field).and_then(FieldValue::value)
    }

    /// Presence predicate; for boolean fields this is the boolean itself
    pub fn is_present(&self, field: &str) -> bool {
        self.field(field).is_some_and(FieldValue::is_present)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_text)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_integer)
    }

    pub fn float(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_float)
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        self.get(field).and_then(Value::as_date)
    }

    pub fn timestamp(&self, field: &str) -> Option<DateTime<FixedOffset>> {
        self.get(field).and_then(Value::as_timestamp)
    }

    /// Boolean fields have no unset state: anything missing reads as `false`
    pub fn boolean(&self, field: &str) -> bool {
        self.get(field).and_then(Value::as_boolean).unwrap_or(false)
    }

    pub fn nested(&self, field: &str) -> Option<&Representation> {
        self.get(field).and_then(Value::as_nested)
    }

    pub fn list(&self, field: &str) -> &[Representation] {
        self.get(field).and_then(Value::as_list).unwrap_or(&[])
    }

    /// Map a nested field into a typed object
    pub fn mapped<M: Mapped>(&self, field: &str) -> MappingResult<Option<M>> {
        match self.nested(field) {
            Some(nested) => M::from_representation(nested.clone()),
            None => Ok(None),
        }
    }

    /// Map a repeated field into typed objects, dropping filtered records
    pub fn mapped_list<M: Mapped>(&self, field: &str) -> MappingResult<Vec<M>> {
        let mut items = Vec::new();
        for item in self.list(field) {
            if let Some(mapped) = M::from_representation(item.clone())? {
                items.push(mapped);
            }
        }
        Ok(items)
    }

    fn missing(&self, field: &str) -> MappingError {
        MappingError::Rejected {
            type_name: self.schema.clone(),
            reason: format!("missing required field '{}'", field),
        }
    }

    pub fn require_text(&self, field: &str) -> MappingResult<String> {
        self.text(field)
            .map(str::to_string)
            .ok_or_else(|| self.missing(field))
    }

    pub fn require_integer(&self, field: &str) -> MappingResult<i64> {
        self.integer(field).ok_or_else(|| self.missing(field))
    }
}

/// Apply a schema to a node
///
/// Nested and repeated rules descend at most [`DEFAULT_MAX_DEPTH`] levels,
/// the same bound the XML parser puts on documents.
pub fn materialize(schema: &Arc<Schema>, node: &Node) -> MappingResult<Representation> {
    materialize_at(schema, node, 0)
}

fn materialize_at(schema: &Arc<Schema>, node: &Node, depth: usize) -> MappingResult<Representation> {
    if depth >= DEFAULT_MAX_DEPTH {
        return Err(DocumentError::TooDeep {
            limit: DEFAULT_MAX_DEPTH,
        }
        .into());
    }
    let mut representation = Representation::new(schema.name());

    for rule in schema.rules() {
        let matches = node.select(&rule.selector);
        let value = match &rule.kind {
            RuleKind::Scalar(converter) => converter.convert(&rule.field, matches.first().copied())?,
            RuleKind::Nested(reference) => match matches.first() {
                Some(child) => {
                    let sub_schema = reference.resolve(schema)?;
                    Some(Value::Nested(Box::new(materialize_at(&sub_schema, child, depth + 1)?)))
                }
                None => None,
            },
            RuleKind::Repeated(_) if matches.is_empty() => Some(Value::List(Vec::new())),
            RuleKind::Repeated(reference) => {
                let sub_schema = reference.resolve(schema)?;
                let mut items = Vec::with_capacity(matches.len());
                for item in &matches {
                    items.push(materialize_at(&sub_schema, item, depth + 1)?);
                }
                Some(Value::List(items))
            }
        };
        representation.set(rule.field.clone(), value);
    }

    Ok(representation)
}

/// Apply a schema to each node, preserving order
pub fn materialize_many(schema: &Arc<Schema>, nodes: &[&Node]) -> MappingResult<Vec<Representation>> {
    nodes.iter().map(|node| materialize(schema, node)).collect()
}

fn array_items_selector() -> &'static Selector {
    static ARRAY_ITEMS: OnceLock<Selector> = OnceLock::new();
    ARRAY_ITEMS.get_or_init(|| {
        Selector::parse("/*[@type='array']/*").expect("Failed to parse array items selector")
    })
}

/// Items of a collection document: the children of a root marked `type="array"`
pub fn collection_items(document: &Document) -> Vec<&Node> {
    document.select(array_items_selector())
}
