//! Minimal XML element tree with source positions.
//!
//! The combiner, the target collector and both renderers work on this tree.
//! Every element remembers the overlay file it came from and the line of its
//! start tag, so later phases can point at the offending source after
//! inclusion has merged files together.
//!
//! Names are kept as written (`xml:id`, `xlink:href`, `xi:include`);
//! namespace declarations are dropped.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fmt::Write;
use std::io::BufRead;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{file}:{line}: malformed XML: {message}")]
pub struct XmlError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

/// Where an element was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub file: Arc<str>,
    pub line: usize,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub origin: Origin,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `xml:id` of this element.
    pub fn id(&self) -> Option<&str> {
        self.attr("xml:id")
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenated text of this element and all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Whitespace-collapsed text of the `title` child, if any.
    pub fn title(&self) -> Option<String> {
        self.child("title")
            .or_else(|| self.child("info").and_then(|info| info.child("title")))
            .map(|title| collapse_whitespace(&title.text()))
    }

    /// Depth-first, document-order walk over this element and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        visit(self);
        for child in self.elements() {
            child.walk(visit);
        }
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `text` into its root element. `file` is recorded in every origin.
pub fn parse(file: &str, text: &str) -> Result<Element, XmlError> {
    let file: Arc<str> = Arc::from(file);
    let lines = LineIndex::new(text);
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let origin = || Origin {
            file: file.clone(),
            line: lines.line_of(start),
        };
        let fail = |message: String| XmlError {
            file: file.to_string(),
            line: lines.line_of(start),
            message,
        };

        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| fail(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let element = start_element(&reader, &e, origin());
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = start_element(&reader, &e, origin());
                close(&mut stack, &mut root, element).map_err(fail)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| fail("unexpected end tag".to_string()))?;
                close(&mut stack, &mut root, element).map_err(fail)?;
            }
            Event::Text(e) => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|e| fail(e.to_string()))?
                    .into_owned();
                append_text(&mut stack, &text).map_err(fail)?;
            }
            Event::GeneralRef(e) => {
                let entity = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|e| fail(e.to_string()))?
                    .into_owned();
                append_text(&mut stack, &decode_entity(&entity)).map_err(fail)?;
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                append_text(&mut stack, &text).map_err(fail)?;
            }
            Event::Eof => {
                if let Some(open) = stack.last() {
                    return Err(fail(format!("unclosed element <{}>", open.name)));
                }
                return root.ok_or_else(|| fail("document has no root element".to_string()));
            }
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
        }
        buf.clear();
    }
}

fn start_element<R: BufRead>(reader: &Reader<R>, e: &BytesStart, origin: Origin) -> Element {
    let name = decode_name(reader, e.name().as_ref());
    let mut attrs = Vec::new();
    for attr in e.attributes().flatten() {
        let key = decode_name(reader, attr.key.as_ref());
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr.unescape_value().map_or_else(
            |_| String::from_utf8_lossy(&attr.value).into_owned(),
            std::borrow::Cow::into_owned,
        );
        attrs.push((key, value));
    }
    Element {
        name,
        attrs,
        children: Vec::new(),
        origin,
    }
}

fn decode_name<R: BufRead>(reader: &Reader<R>, name: &[u8]) -> String {
    reader.decoder().decode(name).map_or_else(
        |_| String::from_utf8_lossy(name).into_owned(),
        std::borrow::Cow::into_owned,
    )
}

fn close(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(format!("second root element <{}>", element.name)),
    }
    Ok(())
}

fn append_text(stack: &mut [Element], text: &str) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(Node::Text(last)) = parent.children.last_mut() {
                last.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err("text outside the root element".to_string()),
    }
}

fn decode_entity(entity: &str) -> String {
    match entity {
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "amp" => "&".to_string(),
        "apos" => "'".to_string(),
        "quot" => "\"".to_string(),
        s if s.starts_with('#') => {
            let code = if s.starts_with("#x") || s.starts_with("#X") {
                u32::from_str_radix(&s[2..], 16).ok()
            } else {
                s[1..].parse::<u32>().ok()
            };
            code.and_then(char::from_u32)
                .map_or_else(|| format!("&{entity};"), |c| c.to_string())
        }
        _ => format!("&{entity};"),
    }
}

/// Byte offset → 1-based line number.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }
}

/// Source lines around `line` (1-based), the offending one marked with `>`.
pub fn context_lines(text: &str, line: usize, radius: usize) -> String {
    let first = line.saturating_sub(radius).max(1);
    let last = line + radius;
    let mut out = String::new();
    for (i, content) in text.lines().enumerate() {
        let number = i + 1;
        if number < first || number > last {
            continue;
        }
        let marker = if number == line { '>' } else { ' ' };
        let _ = writeln!(out, "{marker} {number:>4} | {content}");
    }
    out
}
