//! Document trees and path-style selectors
//!
//! A fetched body is turned into a small owned element tree. Every other part
//! of the crate navigates that tree through [`Selector`]s: relative paths such
//! as `user/firstName` or `replies/userPost`, an attribute predicate like
//! `*[@type='array']`, a leading `//` for descendants, and a leading `/` to
//! start from the document root.

use std::collections::HashSet;
use std::str::FromStr;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{DocumentError, SelectorError};

/// Deepest element nesting [`Document::parse_str`] accepts
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Anything that can turn raw bytes into a [`Document`]
pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Document, DocumentError>;
}

impl<F> DocumentParser for F
where
    F: Fn(&[u8]) -> Result<Document, DocumentError> + Send + Sync,
{
    fn parse(&self, bytes: &[u8]) -> Result<Document, DocumentError> {
        self(bytes)
    }
}

/// Strict XML parser backed by quick-xml
///
/// Mismatched or unclosed tags, a missing root element and content after the
/// root element are all rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlParser;

impl DocumentParser for XmlParser {
    fn parse(&self, bytes: &[u8]) -> Result<Document, DocumentError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|e| DocumentError::Encoding {
            details: e.to_string(),
        })?;
        Document::parse_str(text)
    }
}

/// A parsed document with exactly one root element
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Node,
}

impl Document {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// Parse an XML string nested at most [`DEFAULT_MAX_DEPTH`] elements deep
    pub fn parse_str(xml: &str) -> Result<Self, DocumentError> {
        Self::parse_str_with_max_depth(xml, DEFAULT_MAX_DEPTH)
    }

    /// Parse an XML string, rejecting elements nested deeper than `max_depth`
    pub fn parse_str_with_max_depth(xml: &str, max_depth: usize) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Node> = Vec::new();
        let mut root: Option<Node> = None;

        loop {
            let event = reader.read_event().map_err(|e| DocumentError::Malformed {
                position: reader.error_position() as u64,
                details: e.to_string(),
            })?;

            match event {
                Event::Start(start) => {
                    if root.is_some() {
                        return Err(DocumentError::Malformed {
                            position: reader.buffer_position() as u64,
                            details: "content after the root element".to_string(),
                        });
                    }
                    if stack.len() >= max_depth {
                        return Err(DocumentError::Malformed {
                            position: reader.buffer_position() as u64,
                            details: format!("elements nested deeper than {} levels", max_depth),
                        });
                    }
                    stack.push(Node::from_start(&start, reader.buffer_position() as u64)?);
                }
                Event::Empty(start) => {
                    if stack.len() >= max_depth {
                        return Err(DocumentError::Malformed {
                            position: reader.buffer_position() as u64,
                            details: format!("elements nested deeper than {} levels", max_depth),
                        });
                    }
                    let node = Node::from_start(&start, reader.buffer_position() as u64)?;
                    Self::attach(&mut stack, &mut root, node, reader.buffer_position() as u64)?;
                }
                Event::End(_) => {
                    let node = stack.pop().ok_or_else(|| DocumentError::Malformed {
                        position: reader.buffer_position() as u64,
                        details: "unexpected closing tag".to_string(),
                    })?;
                    Self::attach(&mut stack, &mut root, node, reader.buffer_position() as u64)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let unescaped = text.unescape().map_err(|e| DocumentError::Malformed {
                            position: reader.buffer_position() as u64,
                            details: e.to_string(),
                        })?;
                        parent.push_text(&unescaped);
                    }
                }
                Event::CData(cdata) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(&String::from_utf8_lossy(&cdata.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(DocumentError::Malformed {
                position: reader.buffer_position() as u64,
                details: format!("unclosed element <{}>", open.name),
            });
        }

        root.map(Self::new).ok_or(DocumentError::MissingRoot)
    }

    fn attach(
        stack: &mut [Node],
        root: &mut Option<Node>,
        node: Node,
        position: u64,
    ) -> Result<(), DocumentError> {
        match stack.last_mut() {
            Some(parent) => parent.items.push(Item::Element(node)),
            None if root.is_none() => *root = Some(node),
            None => {
                return Err(DocumentError::Malformed {
                    position,
                    details: "more than one root element".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Evaluate a selector against the document.
    ///
    /// Absolute selectors match their first step against the root element,
    /// relative ones are evaluated from the root element, and a leading `//`
    /// considers the root element too.
    pub fn select(&self, selector: &Selector) -> Vec<&Node> {
        let Some((first, rest)) = selector.steps.split_first() else {
            return vec![&self.root];
        };
        let mut current = match (selector.absolute, first.axis) {
            (_, Axis::Descendant) => first.collect(&[&self.root], true),
            (true, _) if first.matches(&self.root) => vec![&self.root],
            (true, _) => Vec::new(),
            (false, _) => first.apply(&[&self.root]),
        };
        for step in rest {
            current = step.apply(&current);
        }
        current
    }

    /// Parse `path` and evaluate it against the document
    pub fn find(&self, path: &str) -> Result<Vec<&Node>, SelectorError> {
        Ok(self.select(&path.parse()?))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Element(Node),
    Text(String),
}

/// An element with its attributes, text and child elements in document order
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    items: Vec<Item>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.push_text(text);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.items.push(Item::Element(child));
        self
    }

    fn from_start(start: &BytesStart<'_>, position: u64) -> Result<Self, DocumentError> {
        let mut node = Node::new(String::from_utf8_lossy(start.name().as_ref()));
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| DocumentError::Malformed {
                position,
                details: e.to_string(),
            })?;
            let value = attribute
                .unescape_value()
                .map_err(|e| DocumentError::Malformed {
                    position,
                    details: e.to_string(),
                })?;
            node.attributes.push((
                String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }
        Ok(node)
    }

    fn push_text(&mut self, text: &str) {
        if let Some(Item::Text(last)) = self.items.last_mut() {
            last.push_str(text);
        } else {
            self.items.push(Item::Text(text.to_string()));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Child elements in document order
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        self.items.iter().filter_map(|item| match item {
            Item::Element(node) => Some(node),
            Item::Text(_) => None,
        })
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children().find(|child| child.name == name)
    }

    /// Concatenated text of this element and all of its descendants
    pub fn content(&self) -> String {
        let mut content = String::new();
        let mut pending = vec![self.items.iter()];
        while let Some(items) = pending.last_mut() {
            match items.next() {
                Some(Item::Text(text)) => content.push_str(text),
                Some(Item::Element(node)) => pending.push(node.items.iter()),
                None => {
                    pending.pop();
                }
            }
        }
        content
    }

    pub fn select(&self, selector: &Selector) -> Vec<&Node> {
        let mut current = vec![self];
        for step in &selector.steps {
            current = step.apply(&current);
        }
        current
    }

    /// First node matched by the selector, in document order
    pub fn first(&self, selector: &Selector) -> Option<&Node> {
        self.select(selector).into_iter().next()
    }

    /// Parse `path` and evaluate it relative to this node
    pub fn find(&self, path: &str) -> Result<Vec<&Node>, SelectorError> {
        Ok(self.select(&path.parse()?))
    }

    /// Descendant elements in document order
    fn descendants<'a>(&'a self, out: &mut Vec<&'a Node>) {
        let mut pending = vec![self.items.iter()];
        while let Some(items) = pending.last_mut() {
            match items.next() {
                Some(Item::Element(node)) => {
                    out.push(node);
                    pending.push(node.items.iter());
                }
                Some(Item::Text(_)) => {}
                None => {
                    pending.pop();
                }
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Unlink children first so dropping a deep tree never recurses
        let mut orphans: Vec<Node> = Vec::new();
        take_elements(&mut self.items, &mut orphans);
        while let Some(mut node) = orphans.pop() {
            take_elements(&mut node.items, &mut orphans);
        }
    }
}

fn take_elements(items: &mut Vec<Item>, out: &mut Vec<Node>) {
    if items.iter().any(|item| matches!(item, Item::Element(_))) {
        out.extend(items.drain(..).filter_map(|item| match item {
            Item::Element(node) => Some(node),
            Item::Text(_) => None,
        }));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Predicate {
    attribute: String,
    value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    name: NameTest,
    predicate: Option<Predicate>,
}

impl Step {
    fn matches(&self, node: &Node) -> bool {
        let name_matches = match &self.name {
            NameTest::Any => true,
            NameTest::Named(name) => node.name == *name,
        };
        name_matches
            && self.predicate.as_ref().is_none_or(|predicate| {
                match (node.attribute(&predicate.attribute), &predicate.value) {
                    (Some(actual), Some(expected)) => actual == expected,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
            })
    }

    fn collect<'a>(&self, context: &[&'a Node], include_self: bool) -> Vec<&'a Node> {
        let mut found: Vec<&'a Node> = Vec::new();
        let mut seen: HashSet<*const Node> = HashSet::new();
        for node in context {
            let mut candidates = Vec::new();
            if include_self {
                candidates.push(*node);
            }
            node.descendants(&mut candidates);
            for candidate in candidates {
                if self.matches(candidate) && seen.insert(std::ptr::from_ref(candidate)) {
                    found.push(candidate);
                }
            }
        }
        found
    }

    fn apply<'a>(&self, context: &[&'a Node]) -> Vec<&'a Node> {
        match self.axis {
            Axis::Current => context
                .iter()
                .copied()
                .filter(|node| self.matches(node))
                .collect(),
            Axis::Child => context
                .iter()
                .flat_map(|node| node.children())
                .filter(|node| self.matches(node))
                .collect(),
            Axis::Descendant => self.collect(context, false),
        }
    }
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    absolute: bool,
    steps: Vec<Step>,
}

impl Selector {
    pub fn parse(path: &str) -> Result<Self, SelectorError> {
        let invalid = |details: &str| SelectorError {
            selector: path.to_string(),
            details: details.to_string(),
        };

        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty path"));
        }

        let (absolute, mut descendant, body) = if let Some(rest) = trimmed.strip_prefix("//") {
            (false, true, rest)
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            (true, false, rest)
        } else {
            (false, false, trimmed)
        };

        let mut steps = Vec::new();
        for segment in split_segments(body) {
            if segment.is_empty() {
                // `//` marks the following step as a descendant step
                if descendant {
                    return Err(invalid("too many consecutive '/'"));
                }
                descendant = true;
                continue;
            }
            let axis = if descendant { Axis::Descendant } else { Axis::Child };
            steps.push(parse_step(segment, axis).map_err(|details| invalid(&details))?);
            descendant = false;
        }
        if descendant {
            return Err(invalid("path ends with '/'"));
        }

        Ok(Self {
            source: path.to_string(),
            absolute,
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split on `/` outside of predicate brackets
fn split_segments(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in path.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                segments.push(&path[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    segments.push(&path[start..]);
    segments
}

fn parse_step(segment: &str, axis: Axis) -> Result<Step, String> {
    let (name_part, predicate) = match segment.find('[') {
        Some(open) => {
            let inner = segment[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| format!("unterminated predicate in '{}'", segment))?;
            (&segment[..open], Some(parse_predicate(inner)?))
        }
        None => (segment, None),
    };

    let (axis, name) = match name_part {
        "." if predicate.is_none() => (Axis::Current, NameTest::Any),
        "." => return Err("predicates are not supported on '.'".to_string()),
        "*" => (axis, NameTest::Any),
        "" => return Err(format!("missing element name in '{}'", segment)),
        name if name.contains(['@', '\'', '"', ']', ' ']) => {
            return Err(format!("invalid element name '{}'", name));
        }
        name => (axis, NameTest::Named(name.to_string())),
    };

    Ok(Step {
        axis,
        name,
        predicate,
    })
}

fn parse_predicate(inner: &str) -> Result<Predicate, String> {
    let inner = inner.trim();
    let body = inner
        .strip_prefix('@')
        .ok_or_else(|| format!("only attribute predicates are supported, found '[{}]'", inner))?;

    match body.split_once('=') {
        None => Ok(Predicate {
            attribute: body.trim().to_string(),
            value: None,
        }),
        Some((attribute, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .ok_or_else(|| format!("predicate value must be quoted, found {}", value))?;
            Ok(Predicate {
                attribute: attribute.trim().to_string(),
                value: Some(unquoted.to_string()),
            })
        }
    }
}
