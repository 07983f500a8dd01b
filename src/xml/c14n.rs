//! XML Canonicalization (C14N) over the owned document tree.
//!
//! Implements Canonical XML 1.0 (with and without comments) and Exclusive
//! Canonical XML 1.0 for subtree canonicalization. The contract is
//! determinism: canonicalizing two logically equivalent fragments
//! (reordered attributes, different whitespace inside tags, different
//! quoting) yields byte-identical UTF-8 output.
//!
//! Canonicalizing a subtree takes the namespace context inherited from its
//! ancestors, so the result matches what a verifier computes when it
//! canonicalizes the same element in place inside the full document.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{SignError, SignResult};
use crate::xml::document::{XmlElement, XmlNode, split_qname};

pub const XML_NS_URI: &str = "http://www.w3.org/XML/1998/namespace";

const C14N_URI: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const C14N_WITH_COMMENTS_URI: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
const EXC_C14N_URI: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// The canonicalization algorithm, selected by its URI identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum C14nMethod {
    /// Canonical XML 1.0, the default used for XAdES signatures here.
    #[default]
    Inclusive,
    /// Canonical XML 1.0 with comments.
    InclusiveWithComments,
    /// Exclusive Canonical XML 1.0.
    Exclusive,
}

impl C14nMethod {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => C14N_URI,
            Self::InclusiveWithComments => C14N_WITH_COMMENTS_URI,
            Self::Exclusive => EXC_C14N_URI,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            C14N_URI => Some(Self::Inclusive),
            C14N_WITH_COMMENTS_URI => Some(Self::InclusiveWithComments),
            EXC_C14N_URI => Some(Self::Exclusive),
            _ => None,
        }
    }

    fn with_comments(&self) -> bool {
        matches!(self, Self::InclusiveWithComments)
    }

    fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive)
    }
}

/// Canonicalize `element` as a document subtree.
///
/// `inherited_ns` is the prefix → URI map in scope at the element's parent;
/// pass an empty map when canonicalizing a document root.
pub fn canonicalize(
    element: &XmlElement,
    inherited_ns: &BTreeMap<String, String>,
    method: C14nMethod,
) -> SignResult<Vec<u8>> {
    let mut output = Vec::new();
    // At the apex nothing has been rendered yet, so for inclusive C14N all
    // in-scope namespaces get emitted on the top element, exactly as they
    // would be for a document-subset canonicalization.
    process_element(
        element,
        &mut output,
        inherited_ns,
        &BTreeMap::new(),
        method,
    )?;
    Ok(output)
}

fn process_element(
    element: &XmlElement,
    output: &mut Vec<u8>,
    parent_scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
    method: C14nMethod,
) -> SignResult<()> {
    // In-scope namespaces at this element.
    let mut scope = parent_scope.clone();
    for (prefix, uri) in element.namespace_declarations() {
        if uri.is_empty() {
            scope.remove(&prefix);
        } else {
            scope.insert(prefix, uri);
        }
    }

    let ns_decls = if method.is_exclusive() {
        exclusive_declarations(element, &scope, rendered)?
    } else {
        inclusive_declarations(&scope, rendered)
    };

    let attrs = collect_attributes(element, &scope)?;

    let qname = element.name.as_str();
    if let Some(prefix) = element.prefix() {
        if prefix != "xml" && !scope.contains_key(prefix) {
            return Err(SignError::DigestComputation(format!(
                "unbound namespace prefix `{prefix}` on element <{qname}>"
            )));
        }
    }

    output.push(b'<');
    output.extend_from_slice(qname.as_bytes());
    for decl in &ns_decls {
        render_declaration(decl, output);
    }
    for attr in &attrs {
        output.push(b' ');
        output.extend_from_slice(attr.qname.as_bytes());
        output.extend_from_slice(b"=\"");
        output.extend_from_slice(escape_attr(&attr.value).as_bytes());
        output.push(b'"');
    }
    output.push(b'>');

    // Namespace context the children see as already rendered.
    let child_rendered: BTreeMap<String, String> = if method.is_exclusive() {
        let mut map = rendered.clone();
        for (prefix, uri) in &ns_decls {
            map.insert(prefix.clone(), uri.clone());
        }
        map
    } else {
        scope
            .iter()
            .filter(|(p, _)| p.as_str() != "xml")
            .map(|(p, u)| (p.clone(), u.clone()))
            .collect()
    };

    for child in &element.children {
        match child {
            XmlNode::Element(e) => {
                process_element(e, output, &scope, &child_rendered, method)?;
            }
            XmlNode::Text(t) => {
                output.extend_from_slice(escape_text(t).as_bytes());
            }
            XmlNode::Comment(c) => {
                if method.with_comments() {
                    output.extend_from_slice(b"<!--");
                    output.extend_from_slice(c.as_bytes());
                    output.extend_from_slice(b"-->");
                }
            }
        }
    }

    output.extend_from_slice(b"</");
    output.extend_from_slice(qname.as_bytes());
    output.push(b'>');
    Ok(())
}

/// Inclusive C14N: every in-scope namespace whose declaration differs from
/// what an output ancestor already rendered, sorted default-first then by
/// prefix. The `xml` prefix is never emitted.
fn inclusive_declarations(
    scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut decls: Vec<(String, String)> = scope
        .iter()
        .filter(|(prefix, _)| prefix.as_str() != "xml")
        .filter(|(prefix, uri)| rendered.get(*prefix) != Some(*uri))
        .map(|(p, u)| (p.clone(), u.clone()))
        .collect();

    // Undeclare the default namespace when an output ancestor rendered a
    // non-empty one that is no longer in scope.
    if let Some(default) = rendered.get("") {
        if !default.is_empty() && !scope.contains_key("") {
            decls.push((String::new(), String::new()));
        }
    }
    decls.sort();
    decls
}

/// Exclusive C14N: only namespaces visibly utilized by the element tag or
/// its attributes.
fn exclusive_declarations(
    element: &XmlElement,
    scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
) -> SignResult<Vec<(String, String)>> {
    let mut utilized: BTreeSet<&str> = BTreeSet::new();
    utilized.insert(element.prefix().unwrap_or(""));
    for attr in &element.attributes {
        if is_namespace_declaration(&attr.name) {
            continue;
        }
        if let (Some(prefix), _) = split_qname(&attr.name) {
            if prefix != "xml" {
                utilized.insert(prefix);
            }
        }
    }

    let mut decls = Vec::new();
    for prefix in utilized {
        if prefix == "xml" {
            continue;
        }
        match scope.get(prefix) {
            Some(uri) => {
                if rendered.get(prefix) != Some(uri) {
                    decls.push((prefix.to_owned(), uri.clone()));
                }
            }
            None if prefix.is_empty() => {
                if rendered.get("").is_some_and(|u| !u.is_empty()) {
                    decls.push((String::new(), String::new()));
                }
            }
            None => {
                return Err(SignError::DigestComputation(format!(
                    "unbound namespace prefix `{prefix}`"
                )));
            }
        }
    }
    decls.sort();
    Ok(decls)
}

fn render_declaration(decl: &(String, String), output: &mut Vec<u8>) {
    let (prefix, uri) = decl;
    if prefix.is_empty() {
        output.extend_from_slice(b" xmlns=\"");
    } else {
        output.extend_from_slice(b" xmlns:");
        output.extend_from_slice(prefix.as_bytes());
        output.extend_from_slice(b"=\"");
    }
    output.extend_from_slice(escape_attr(uri).as_bytes());
    output.push(b'"');
}

struct RenderAttr {
    ns_uri: String,
    local: String,
    qname: String,
    value: String,
}

/// Collect non-namespace attributes sorted per C14N: unqualified attributes
/// first by local name, then qualified ones by (namespace URI, local name).
fn collect_attributes(
    element: &XmlElement,
    scope: &BTreeMap<String, String>,
) -> SignResult<Vec<RenderAttr>> {
    let mut attrs = Vec::new();
    for attr in &element.attributes {
        if is_namespace_declaration(&attr.name) {
            continue;
        }
        let (prefix, local) = split_qname(&attr.name);
        let ns_uri = match prefix {
            None => String::new(),
            Some("xml") => XML_NS_URI.to_owned(),
            Some(p) => scope
                .get(p)
                .cloned()
                .ok_or_else(|| {
                    SignError::DigestComputation(format!(
                        "unbound namespace prefix `{p}` on attribute {}",
                        attr.name
                    ))
                })?,
        };
        attrs.push(RenderAttr {
            ns_uri,
            local: local.to_owned(),
            qname: attr.name.clone(),
            value: attr.value.clone(),
        });
    }
    attrs.sort_by(|a, b| match (a.ns_uri.is_empty(), b.ns_uri.is_empty()) {
        (true, true) => a.local.cmp(&b.local),
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        (false, false) => a.ns_uri.cmp(&b.ns_uri).then(a.local.cmp(&b.local)),
    });
    Ok(attrs)
}

fn is_namespace_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

/// Escape text node content per C14N rules.
fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape attribute values per C14N rules.
fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}
