//! Signature assembler.
//!
//! Builds `SignedInfo`, the XAdES qualifying properties and the complete
//! `ds:Signature` element. The invariant that keeps the output
//! interoperable: the bytes passed to the signing key are exactly the
//! canonical form of `SignedInfo` as it will appear in the final document,
//! in-scope namespaces included, never a private serialization.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use uuid::Uuid;

use super::constants::{DSIG_NS, SIGNED_PROPERTIES_TYPE, XADES_NS};
use super::keys::SigningContext;
use super::reference::{DigestAlgorithm, Reference, TransformId};
use crate::error::SignResult;
use crate::xml::c14n::{self, C14nMethod};
use crate::xml::document::XmlElement;

/// The terminal signature artifact: the assembled `ds:Signature` element
/// and its generated ID. Never mutated after creation.
pub struct AssembledSignature {
    pub element: XmlElement,
    pub id: String,
}

/// Assemble and sign.
///
/// `target_scope` is the namespace context in scope at the element the
/// signature will be embedded into; both `SignedInfo` and
/// `SignedProperties` are canonicalized against it so a verifier
/// re-canonicalizing them in place reproduces the same bytes.
pub fn assemble(
    context: &SigningContext,
    target_scope: &BTreeMap<String, String>,
    document_reference: Reference,
    c14n_method: C14nMethod,
) -> SignResult<AssembledSignature> {
    let signature_id = format!("xmldsig-{}", Uuid::new_v4());
    let properties_id = format!("{signature_id}-signedprops");
    let value_id = format!("{signature_id}-sigvalue");
    let reference_id = format!("{signature_id}-ref0");
    let digest_algorithm = document_reference.digest_algorithm;

    // XAdES signed properties: signing time and signing certificate.
    let signed_properties = build_signed_properties(context, &properties_id, digest_algorithm)?;

    // Digest the properties as they will sit in the final document, with
    // ds: and xades: inherited from Signature and QualifyingProperties.
    let mut properties_scope = target_scope.clone();
    properties_scope.insert("ds".to_owned(), DSIG_NS.to_owned());
    properties_scope.insert("xades".to_owned(), XADES_NS.to_owned());
    let canonical_properties =
        c14n::canonicalize(&signed_properties, &properties_scope, c14n_method)?;
    let properties_reference = Reference {
        uri: format!("#{properties_id}"),
        transforms: declared_canonicalization(c14n_method),
        digest_algorithm,
        digest_value: digest_algorithm.digest(&canonical_properties),
    };

    let signed_info = build_signed_info(
        context,
        c14n_method,
        &[
            (&document_reference, Some(reference_id.as_str()), None),
            (
                &properties_reference,
                None,
                Some(SIGNED_PROPERTIES_TYPE),
            ),
        ],
    );

    // Sign exactly the canonical SignedInfo bytes.
    let mut signed_info_scope = target_scope.clone();
    signed_info_scope.insert("ds".to_owned(), DSIG_NS.to_owned());
    let canonical_signed_info = c14n::canonicalize(&signed_info, &signed_info_scope, c14n_method)?;
    let signature_value = context.sign(&canonical_signed_info)?;

    let qualifying_properties = XmlElement::new("xades:QualifyingProperties")
        .with_attr("xmlns:xades", XADES_NS)
        .with_attr("Target", format!("#{signature_id}"))
        .with_child(signed_properties);

    let element = XmlElement::new("ds:Signature")
        .with_attr("xmlns:ds", DSIG_NS)
        .with_attr("Id", &signature_id)
        .with_child(signed_info)
        .with_child(
            XmlElement::new("ds:SignatureValue")
                .with_attr("Id", value_id)
                .with_text(BASE64.encode(&signature_value)),
        )
        .with_child(
            XmlElement::new("ds:KeyInfo").with_child(
                XmlElement::new("ds:X509Data").with_child(
                    XmlElement::new("ds:X509Certificate")
                        .with_text(BASE64.encode(context.certificate_der()?)),
                ),
            ),
        )
        .with_child(XmlElement::new("ds:Object").with_child(qualifying_properties));

    Ok(AssembledSignature {
        element,
        id: signature_id,
    })
}

/// Transform entries declaring a non-default canonicalization method.
/// Canonical XML 1.0 is the XML-DSig default and needs no declaration.
pub fn declared_canonicalization(method: C14nMethod) -> Vec<TransformId> {
    match method {
        C14nMethod::Inclusive => Vec::new(),
        other => vec![TransformId::Canonicalization(other)],
    }
}

fn build_signed_info(
    context: &SigningContext,
    c14n_method: C14nMethod,
    references: &[(&Reference, Option<&str>, Option<&str>)],
) -> XmlElement {
    let mut signed_info = XmlElement::new("ds:SignedInfo")
        .with_child(
            XmlElement::new("ds:CanonicalizationMethod")
                .with_attr("Algorithm", c14n_method.uri()),
        )
        .with_child(
            XmlElement::new("ds:SignatureMethod")
                .with_attr("Algorithm", context.suite().uri()),
        );
    for (reference, id, ref_type) in references {
        signed_info = signed_info.with_child(reference_element(reference, *id, *ref_type));
    }
    signed_info
}

fn reference_element(
    reference: &Reference,
    id: Option<&str>,
    ref_type: Option<&str>,
) -> XmlElement {
    let mut element = XmlElement::new("ds:Reference");
    if let Some(id) = id {
        element = element.with_attr("Id", id);
    }
    if let Some(ref_type) = ref_type {
        element = element.with_attr("Type", ref_type);
    }
    element = element.with_attr("URI", &reference.uri);
    if !reference.transforms.is_empty() {
        let mut transforms = XmlElement::new("ds:Transforms");
        for transform in &reference.transforms {
            transforms = transforms
                .with_child(XmlElement::new("ds:Transform").with_attr("Algorithm", transform.uri()));
        }
        element = element.with_child(transforms);
    }
    element
        .with_child(
            XmlElement::new("ds:DigestMethod")
                .with_attr("Algorithm", reference.digest_algorithm.uri()),
        )
        .with_child(
            XmlElement::new("ds:DigestValue").with_text(BASE64.encode(&reference.digest_value)),
        )
}

fn build_signed_properties(
    context: &SigningContext,
    properties_id: &str,
    digest_algorithm: DigestAlgorithm,
) -> SignResult<XmlElement> {
    // Read at the moment of signing; never supplied by the caller.
    let signing_time = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let cert = XmlElement::new("xades:Cert")
        .with_child(
            XmlElement::new("xades:CertDigest")
                .with_child(
                    XmlElement::new("ds:DigestMethod")
                        .with_attr("Algorithm", digest_algorithm.uri()),
                )
                .with_child(
                    XmlElement::new("ds:DigestValue")
                        .with_text(BASE64.encode(context.certificate_digest()?)),
                ),
        )
        .with_child(
            XmlElement::new("xades:IssuerSerial")
                .with_child(XmlElement::new("ds:X509IssuerName").with_text(context.issuer_name()?))
                .with_child(
                    XmlElement::new("ds:X509SerialNumber").with_text(context.serial_number()?),
                ),
        );

    Ok(XmlElement::new("xades:SignedProperties")
        .with_attr("Id", properties_id)
        .with_child(
            XmlElement::new("xades:SignedSignatureProperties")
                .with_child(XmlElement::new("xades:SigningTime").with_text(signing_time))
                .with_child(XmlElement::new("xades:SigningCertificate").with_child(cert)),
        ))
}
