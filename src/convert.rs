use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use crate::document::Node;
use crate::error::ConversionError;
use crate::schema::Representation;

/// A materialized field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
    Boolean(bool),
    Nested(Box<Representation>),
    List(Vec<Representation>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(date) => Some(*date),
            Value::Timestamp(timestamp) => Some(timestamp.date_naive()),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::Timestamp(timestamp) => Some(*timestamp),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&Representation> {
        match self {
            Value::Nested(representation) => Some(representation),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Representation]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Representation> for Value {
    fn from(value: Representation) -> Self {
        Value::Nested(Box::new(value))
    }
}

impl From<Vec<Representation>> for Value {
    fn from(value: Vec<Representation>) -> Self {
        Value::List(value)
    }
}

/// Signature of a user supplied converter
pub type ConvertFn =
    dyn Fn(&str, &Node) -> Result<Option<Value>, ConversionError> + Send + Sync;

/// Turns the node matched by a selector into a [`Value`]
#[derive(Clone)]
pub enum Converter {
    Text,
    Integer,
    Float,
    Date,
    Timestamp,
    Boolean,
    Custom {
        name: &'static str,
        convert: Arc<ConvertFn>,
    },
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converter::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
            other => f.write_str(other.type_name()),
        }
    }
}

impl Converter {
    /// Build a converter from a closure receiving the field name and matched node
    pub fn custom<F>(name: &'static str, convert: F) -> Self
    where
        F: Fn(&str, &Node) -> Result<Option<Value>, ConversionError> + Send + Sync + 'static,
    {
        Converter::Custom {
            name,
            convert: Arc::new(convert),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Converter::Text => "string",
            Converter::Integer => "integer",
            Converter::Float => "float",
            Converter::Date => "date",
            Converter::Timestamp => "timestamp",
            Converter::Boolean => "boolean",
            Converter::Custom { name, .. } => *name,
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Converter::Boolean)
    }

    /// Convert the node a selector matched, if any.
    ///
    /// Missing nodes and blank content yield `Ok(None)`; booleans are never
    /// absent and fall back to `false`. Present content that does not parse
    /// as the target type is a [`ConversionError`].
    pub fn convert(&self, field: &str, node: Option<&Node>) -> Result<Option<Value>, ConversionError> {
        let content = node.map(Node::content).unwrap_or_default();
        let trimmed = content.trim();
        let failed = || ConversionError {
            field: field.to_string(),
            raw_text: content.clone(),
            target_type: self.type_name(),
        };

        let value = match self {
            Converter::Boolean => Value::Boolean(trimmed.eq_ignore_ascii_case("true")),
            Converter::Custom { convert, .. } => {
                return node.map_or(Ok(None), |node| convert(field, node));
            }
            _ if trimmed.is_empty() => return Ok(None),
            Converter::Text => Value::Text(content.clone()),
            Converter::Integer => Value::Integer(trimmed.parse().map_err(|_| failed())?),
            Converter::Float => Value::Float(
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .ok_or_else(failed)?,
            ),
            Converter::Date => Value::Date(parse_date(trimmed).ok_or_else(failed)?),
            Converter::Timestamp => Value::Timestamp(parse_timestamp(trimmed).ok_or_else(failed)?),
        };
        Ok(Some(value))
    }
}

/// Calendar date from `YYYY-MM-DD`, ignoring any time part that follows
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let date_part = text
        .split(|c: char| c == 'T' || c.is_whitespace())
        .next()
        .unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(text).map(|ts| ts.date_naive()))
}

/// Point in time from RFC 3339, ISO-8601-like or RFC 2822 text.
///
/// Text without an offset is read as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"] {
        if let Ok(timestamp) = DateTime::parse_from_str(text, format) {
            return Some(timestamp);
        }
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc2822(text) {
        return Some(timestamp);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    None
}
