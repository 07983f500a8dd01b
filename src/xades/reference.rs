//! Reference and digest builder.
//!
//! Applies the declared transform chain to the target element, runs it
//! through canonicalization and digests the canonical bytes. The resulting
//! [`Reference`] is immutable and embedded verbatim into `SignedInfo`.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::constants::{DSIG_NS, ENVELOPED_SIGNATURE, SHA256_DIGEST};
use crate::error::{SignError, SignResult};
use crate::xml::c14n::{self, C14nMethod};
use crate::xml::document::{NodePath, XmlDocument, XmlElement, XmlNode};

/// A transform applied to the referenced content before digesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformId {
    /// Remove any `ds:Signature` descendants before canonicalization, so
    /// the digest matches what a verifier computes after stripping the
    /// signature it is checking.
    EnvelopedSignature,
    /// Declares the canonicalization algorithm the digest was computed
    /// with. Verifiers default to Canonical XML 1.0, so any other method
    /// must be spelled out in the transform chain or the digests mismatch.
    Canonicalization(C14nMethod),
}

impl TransformId {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::EnvelopedSignature => ENVELOPED_SIGNATURE,
            Self::Canonicalization(method) => method.uri(),
        }
    }
}

/// Digest algorithm for a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Sha256 => SHA256_DIGEST,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// A computed reference, immutable once built.
#[derive(Debug, Clone)]
pub struct Reference {
    pub uri: String,
    pub transforms: Vec<TransformId>,
    pub digest_algorithm: DigestAlgorithm,
    pub digest_value: Vec<u8>,
}

/// Digest the element at `target` after applying `transforms` in order and
/// canonicalizing with `c14n`.
pub fn build_reference(
    document: &XmlDocument,
    target: &NodePath,
    uri: &str,
    transforms: &[TransformId],
    digest_algorithm: DigestAlgorithm,
    c14n_method: C14nMethod,
) -> SignResult<Reference> {
    let element = document
        .element(target)
        .ok_or_else(|| SignError::ElementNotFound("stale signing target path".into()))?;
    let inherited = document.parent_scope(target);

    let mut subject = element.clone();
    for transform in transforms {
        match transform {
            TransformId::EnvelopedSignature => strip_signatures(&mut subject, &inherited),
            // The canonicalization step below is the transform; this entry
            // only records it for the ds:Transforms chain.
            TransformId::Canonicalization(_) => {}
        }
    }

    let canonical = c14n::canonicalize(&subject, &inherited, c14n_method)?;
    Ok(Reference {
        uri: uri.to_owned(),
        transforms: transforms.to_vec(),
        digest_algorithm,
        digest_value: digest_algorithm.digest(&canonical),
    })
}

/// Remove every `ds:Signature` descendant (namespace-aware) from `element`.
fn strip_signatures(element: &mut XmlElement, inherited: &BTreeMap<String, String>) {
    let mut scope = inherited.clone();
    for (prefix, uri) in element.namespace_declarations() {
        if uri.is_empty() {
            scope.remove(&prefix);
        } else {
            scope.insert(prefix, uri);
        }
    }

    element.children.retain(|child| match child {
        XmlNode::Element(e) => !is_dsig_signature(e, &scope),
        _ => true,
    });
    for child in &mut element.children {
        if let XmlNode::Element(e) = child {
            strip_signatures(e, &scope);
        }
    }
}

fn is_dsig_signature(element: &XmlElement, parent_scope: &BTreeMap<String, String>) -> bool {
    if element.local_name() != "Signature" {
        return false;
    }
    let mut scope = parent_scope.clone();
    for (prefix, uri) in element.namespace_declarations() {
        if uri.is_empty() {
            scope.remove(&prefix);
        } else {
            scope.insert(prefix, uri);
        }
    }
    let prefix = element.prefix().unwrap_or("");
    scope.get(prefix).map(String::as_str) == Some(DSIG_NS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> XmlDocument {
        XmlDocument::parse(xml).unwrap()
    }

    #[test]
    fn digest_is_sha256_of_canonical_form() {
        let doc = parse(r#"<factura id="F1"><total>10</total></factura>"#);
        let reference = build_reference(
            &doc,
            &vec![],
            "#F1",
            &[TransformId::EnvelopedSignature],
            DigestAlgorithm::Sha256,
            C14nMethod::Inclusive,
        )
        .unwrap();

        let canonical =
            c14n::canonicalize(doc.root(), &BTreeMap::new(), C14nMethod::Inclusive).unwrap();
        assert_eq!(reference.digest_value, Sha256::digest(&canonical).to_vec());
        assert_eq!(reference.uri, "#F1");
        assert_eq!(reference.digest_algorithm.uri(), SHA256_DIGEST);
    }

    #[test]
    fn enveloped_transform_strips_existing_signature() {
        let signed = parse(
            r#"<factura id="F1"><total>10</total><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo/></ds:Signature></factura>"#,
        );
        let unsigned = parse(r#"<factura id="F1"><total>10</total></factura>"#);

        let with_transform = build_reference(
            &signed,
            &vec![],
            "#F1",
            &[TransformId::EnvelopedSignature],
            DigestAlgorithm::Sha256,
            C14nMethod::Inclusive,
        )
        .unwrap();
        let baseline = build_reference(
            &unsigned,
            &vec![],
            "#F1",
            &[],
            DigestAlgorithm::Sha256,
            C14nMethod::Inclusive,
        )
        .unwrap();

        // Stripping the signature makes the digest re-producible.
        assert_eq!(with_transform.digest_value, baseline.digest_value);
    }

    #[test]
    fn unprefixed_signature_in_default_dsig_namespace_is_stripped() {
        let signed = parse(
            r#"<doc id="d"><Signature xmlns="http://www.w3.org/2000/09/xmldsig#"/></doc>"#,
        );
        let unsigned = parse(r#"<doc id="d"/>"#);
        let a = build_reference(
            &signed,
            &vec![],
            "#d",
            &[TransformId::EnvelopedSignature],
            DigestAlgorithm::Sha256,
            C14nMethod::Inclusive,
        )
        .unwrap();
        let b = build_reference(
            &unsigned,
            &vec![],
            "#d",
            &[],
            DigestAlgorithm::Sha256,
            C14nMethod::Inclusive,
        )
        .unwrap();
        assert_eq!(a.digest_value, b.digest_value);
    }

    #[test]
    fn foreign_signature_elements_are_kept() {
        // A Signature element outside the XML-DSig namespace is content,
        // not a signature, and must affect the digest.
        let doc = parse(r#"<doc id="d"><Signature xmlns="urn:other"/></doc>"#);
        let bare = parse(r#"<doc id="d"/>"#);
        let a = build_reference(
            &doc,
            &vec![],
            "#d",
            &[TransformId::EnvelopedSignature],
            DigestAlgorithm::Sha256,
            C14nMethod::Inclusive,
        )
        .unwrap();
        let b = build_reference(
            &bare,
            &vec![],
            "#d",
            &[],
            DigestAlgorithm::Sha256,
            C14nMethod::Inclusive,
        )
        .unwrap();
        assert_ne!(a.digest_value, b.digest_value);
    }
}
