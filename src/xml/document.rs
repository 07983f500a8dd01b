//! Owned, mutable XML document model.
//!
//! Parses XML text into an addressable tree of elements, text and comments.
//! DTDs and processing instructions are rejected at parse time, so external
//! entities and entity expansion never reach the signing pipeline.
//! Serialization emits a UTF-8 declaration and is deterministic. It is not
//! a canonical form; canonicalization is a separate step used only for
//! digesting (see [`crate::xml::c14n`]). Whitespace characters that an XML
//! parser would normalize away (CR in text, CR/LF/TAB in attribute values)
//! are written as character references so a reparse preserves them.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{SignError, SignResult};

/// Stable address of an element inside a document: child indices from the
/// root element down. The empty path addresses the root itself.
pub type NodePath = Vec<usize>;

/// A single attribute, with its qualified name as written in the source.
/// Namespace declarations (`xmlns`, `xmlns:*`) are kept as plain attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: String,
    pub value: String,
}

/// A child node of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
}

/// An element with its qualified name, attributes in document order and
/// child nodes in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(XmlAttribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Value of the attribute with the given qualified name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set or replace an attribute value.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        if let Some(attr) = self.attributes.iter_mut().find(|a| a.name == name) {
            attr.value = value.to_owned();
        } else {
            self.attributes.push(XmlAttribute {
                name: name.to_owned(),
                value: value.to_owned(),
            });
        }
    }

    /// Local part of the qualified name.
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// Prefix part of the qualified name, if any.
    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// Concatenated text content of the direct text children.
    pub fn text_content(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// First descendant element (including self) with the given qualified name.
    pub fn find(&self, qname: &str) -> Option<&XmlElement> {
        if self.name == qname {
            return Some(self);
        }
        self.children.iter().find_map(|c| match c {
            XmlNode::Element(e) => e.find(qname),
            _ => None,
        })
    }

    /// Namespace declarations made directly on this element, as a
    /// prefix → URI map (the default namespace uses the empty prefix).
    pub fn namespace_declarations(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for attr in &self.attributes {
            if attr.name == "xmlns" {
                map.insert(String::new(), attr.value.clone());
            } else if let Some(prefix) = attr.name.strip_prefix("xmlns:") {
                map.insert(prefix.to_owned(), attr.value.clone());
            }
        }
        map
    }
}

/// Split a qualified name into optional prefix and local part.
pub fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// A parsed XML document with a configurable ID attribute name.
/// Comments outside the root element are kept so the serialized output
/// stays structurally identical to the input.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    prologue: Vec<String>,
    root: XmlElement,
    epilogue: Vec<String>,
    id_attribute: String,
}

impl XmlDocument {
    /// Parse XML text into an owned tree.
    ///
    /// Fails with [`SignError::MalformedXml`] on non-well-formed input,
    /// on any DTD (external entity resolution is disabled by refusing the
    /// construct entirely), on processing instructions and on undeclared
    /// entity references.
    pub fn parse(text: &str) -> SignResult<Self> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().check_end_names = true;

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut prologue: Vec<String> = Vec::new();
        let mut epilogue: Vec<String> = Vec::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|e| SignError::MalformedXml(e.to_string()))?;
            match event {
                Event::Start(start) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(SignError::MalformedXml(
                            "content after the document element".into(),
                        ));
                    }
                    stack.push(read_element(&start)?);
                }
                Event::Empty(start) => {
                    let element = read_element(&start)?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| SignError::MalformedXml("unmatched end tag".into()))?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Event::Text(text) => {
                    let value = text
                        .unescape()
                        .map_err(|e| SignError::MalformedXml(e.to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Text(value.into_owned())),
                        None if value.trim().is_empty() => {}
                        None => {
                            return Err(SignError::MalformedXml(
                                "text outside the document element".into(),
                            ));
                        }
                    }
                }
                Event::CData(data) => {
                    let value = std::str::from_utf8(data.as_ref())
                        .map_err(|e| SignError::MalformedXml(format!("invalid UTF-8: {e}")))?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(value.to_owned()));
                    }
                }
                Event::Comment(comment) => {
                    let value = std::str::from_utf8(comment.as_ref())
                        .map_err(|e| SignError::MalformedXml(format!("invalid UTF-8: {e}")))?
                        .to_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Comment(value)),
                        None if root.is_none() => prologue.push(value),
                        None => epilogue.push(value),
                    }
                }
                Event::DocType(_) => {
                    return Err(SignError::MalformedXml(
                        "DTD is not allowed in signing input".into(),
                    ));
                }
                Event::PI(_) => {
                    return Err(SignError::MalformedXml(
                        "processing instructions are not supported in signing input".into(),
                    ));
                }
                Event::Decl(_) => {}
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(SignError::MalformedXml("unclosed element".into()));
        }
        let root =
            root.ok_or_else(|| SignError::MalformedXml("document has no root element".into()))?;

        Ok(Self {
            prologue,
            root,
            epilogue,
            id_attribute: default_id_attribute().to_owned(),
        })
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// The attribute name treated as this document's ID-type attribute.
    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    pub fn set_id_attribute(&mut self, name: &str) {
        self.id_attribute = name.to_owned();
    }

    /// The element addressed by `path`, if it exists.
    pub fn element(&self, path: &[usize]) -> Option<&XmlElement> {
        let mut current = &self.root;
        for &index in path {
            current = match current.children.get(index) {
                Some(XmlNode::Element(e)) => e,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn element_mut(&mut self, path: &[usize]) -> Option<&mut XmlElement> {
        let mut current = &mut self.root;
        for &index in path {
            current = match current.children.get_mut(index) {
                Some(XmlNode::Element(e)) => e,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve the element to sign.
    ///
    /// With an explicit ID the unique element carrying that ID value is
    /// returned; zero or multiple matches are an error, never a silent
    /// first-match. Without one, the root element is chosen, and if the
    /// root lacks the ID attribute the documented fallback value is
    /// assigned to it so that a `#id` reference resolves later.
    pub fn resolve_id_target(
        &mut self,
        explicit_id: Option<&str>,
        fallback_id: &str,
    ) -> SignResult<NodePath> {
        match explicit_id {
            Some(id) => {
                let mut matches = self.elements_with_id(id);
                match matches.len() {
                    1 => Ok(matches.swap_remove(0)),
                    0 => Err(SignError::ElementNotFound(format!(
                        "no element with {}=\"{id}\"",
                        self.id_attribute
                    ))),
                    n => Err(SignError::ElementNotFound(format!(
                        "ambiguous ID: {n} elements carry {}=\"{id}\"",
                        self.id_attribute
                    ))),
                }
            }
            None => {
                let id = match self.root.attribute(&self.id_attribute) {
                    Some(value) => value.to_owned(),
                    None => {
                        let id_attribute = self.id_attribute.clone();
                        self.root.set_attribute(&id_attribute, fallback_id);
                        fallback_id.to_owned()
                    }
                };
                // The chosen value must still be unique document-wide.
                let matches = self.elements_with_id(&id);
                if matches.len() > 1 {
                    return Err(SignError::ElementNotFound(format!(
                        "ambiguous ID: {} elements carry {}=\"{id}\"",
                        matches.len(),
                        self.id_attribute
                    )));
                }
                Ok(Vec::new())
            }
        }
    }

    fn elements_with_id(&self, id: &str) -> Vec<NodePath> {
        let mut matches = Vec::new();
        let mut path = Vec::new();
        collect_by_id(&self.root, &self.id_attribute, id, &mut path, &mut matches);
        matches
    }

    /// Namespace declarations in scope at the element addressed by `path`,
    /// including declarations made on the element itself.
    pub fn namespaces_in_scope(&self, path: &[usize]) -> BTreeMap<String, String> {
        let mut scope = BTreeMap::new();
        let mut current = &self.root;
        merge_declarations(&mut scope, current);
        for &index in path {
            current = match current.children.get(index) {
                Some(XmlNode::Element(e)) => e,
                _ => return scope,
            };
            merge_declarations(&mut scope, current);
        }
        scope
    }

    /// Namespace declarations in scope at the parent of `path` (the
    /// inherited context the element itself does not contribute to).
    pub fn parent_scope(&self, path: &[usize]) -> BTreeMap<String, String> {
        match path.len() {
            0 => BTreeMap::new(),
            n => self.namespaces_in_scope(&path[..n - 1]),
        }
    }

    /// Serialize back to text with a UTF-8 declaration.
    ///
    /// Deterministic for a given tree; serializing twice without mutation
    /// yields identical bytes.
    pub fn serialize(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        for comment in &self.prologue {
            write_comment(comment, &mut out);
        }
        write_element(&self.root, &mut out);
        for comment in &self.epilogue {
            write_comment(comment, &mut out);
        }
        out
    }
}

/// Default ID attribute name: lowercase `id`, matching the behavior the
/// service has always had for SRI comprobantes. Configurable per request
/// via [`crate::xades::SignOptions`].
pub fn default_id_attribute() -> &'static str {
    "id"
}

fn merge_declarations(scope: &mut BTreeMap<String, String>, element: &XmlElement) {
    for (prefix, uri) in element.namespace_declarations() {
        if uri.is_empty() {
            scope.remove(&prefix);
        } else {
            scope.insert(prefix, uri);
        }
    }
}

fn collect_by_id(
    element: &XmlElement,
    id_attribute: &str,
    id: &str,
    path: &mut NodePath,
    matches: &mut Vec<NodePath>,
) {
    if element.attribute(id_attribute) == Some(id) {
        matches.push(path.clone());
    }
    for (index, child) in element.children.iter().enumerate() {
        if let XmlNode::Element(e) = child {
            path.push(index);
            collect_by_id(e, id_attribute, id, path, matches);
            path.pop();
        }
    }
}

fn read_element(start: &quick_xml::events::BytesStart<'_>) -> SignResult<XmlElement> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| SignError::MalformedXml(format!("invalid UTF-8 in tag name: {e}")))?
        .to_owned();
    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| SignError::MalformedXml(e.to_string()))?;
        let name = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| SignError::MalformedXml(format!("invalid UTF-8 in attribute: {e}")))?
            .to_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| SignError::MalformedXml(e.to_string()))?
            .into_owned();
        element.attributes.push(XmlAttribute { name, value });
    }
    Ok(element)
}

fn close_element(
    element: XmlElement,
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
) -> SignResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(SignError::MalformedXml(
                    "more than one document element".into(),
                ));
            }
            *root = Some(element);
            Ok(())
        }
    }
}

fn write_element(element: &XmlElement, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        escape_attr_into(&attr.value, out);
        out.push('"');
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(e, out),
            XmlNode::Text(t) => escape_text_into(t, out),
            XmlNode::Comment(c) => write_comment(c, out),
        }
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn write_comment(comment: &str, out: &mut String) {
    out.push_str("<!--");
    out.push_str(comment);
    out.push_str("-->");
}

// A carriage return written raw would be normalized to LF by the next
// parser, changing the signed bytes. Character references survive a
// reparse untouched.
fn escape_text_into(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}

// Attribute-value normalization additionally folds TAB and LF to spaces,
// so those are escaped as well.
fn escape_attr_into(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}
