//! XAdES-BES enveloped signature pipeline.
//!
//! The stages mirror the signing flow: resolve the target element, digest
//! it through the transform chain ([`reference`]), build and sign
//! `SignedInfo` plus the qualifying properties ([`assembler`]), then embed
//! the signature and re-serialize ([`embed`]). Each call is self-contained;
//! nothing is shared or cached across invocations.

pub mod assembler;
pub mod constants;
pub mod embed;
pub mod keys;
pub mod reference;

#[cfg(test)]
pub(crate) mod testkeys;

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::debug;

use crate::error::{SignError, SignResult};
use crate::xml::c14n::C14nMethod;
use crate::xml::document::{XmlDocument, default_id_attribute};

pub use assembler::{AssembledSignature, assemble, declared_canonicalization};
pub use embed::embed;
pub use keys::{SignatureSuite, SigningContext};
pub use reference::{DigestAlgorithm, Reference, TransformId, build_reference};

/// Fallback ID value assigned to a root element that has no ID attribute.
/// Fixed and documented; SRI comprobantes have always been signed with it.
pub const DEFAULT_FALLBACK_ID: &str = "comprobante";

/// Per-request signing options.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Attribute name treated as the ID-type attribute.
    pub id_attribute: String,
    /// Value assigned to the root when it lacks the ID attribute.
    pub fallback_id: String,
    /// Sign the element carrying this ID instead of the root.
    pub target_id: Option<String>,
    /// Canonicalization algorithm for references and `SignedInfo`.
    pub c14n_method: C14nMethod,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            id_attribute: default_id_attribute().to_owned(),
            fallback_id: DEFAULT_FALLBACK_ID.to_owned(),
            target_id: None,
            c14n_method: C14nMethod::Inclusive,
        }
    }
}

/// Sign `xml` with an enveloped XAdES-BES signature and return the signed
/// document text.
///
/// The output is structurally identical to the input except for the
/// inserted `ds:Signature` subtree. On any failure the input is returned
/// untouched as an error, never a partially signed document.
pub fn sign_enveloped(
    xml: &str,
    certificate: &X509,
    private_key: &PKey<Private>,
    options: &SignOptions,
) -> SignResult<String> {
    let mut document = XmlDocument::parse(xml)?;
    document.set_id_attribute(&options.id_attribute);

    let target = document.resolve_id_target(options.target_id.as_deref(), &options.fallback_id)?;
    let target_id = document
        .element(&target)
        .and_then(|e| e.attribute(&options.id_attribute))
        .ok_or_else(|| {
            SignError::ElementNotFound("signing target lost its ID attribute".into())
        })?
        .to_owned();

    let context = SigningContext::prepare(certificate, private_key)?;

    let mut transforms = vec![TransformId::EnvelopedSignature];
    transforms.extend(declared_canonicalization(options.c14n_method));
    let reference = build_reference(
        &document,
        &target,
        &format!("#{target_id}"),
        &transforms,
        DigestAlgorithm::Sha256,
        options.c14n_method,
    )?;

    let target_scope = document.namespaces_in_scope(&target);
    let signature = assemble(&context, &target_scope, reference, options.c14n_method)?;
    debug!(signature_id = %signature.id, target_id = %target_id, "signature assembled");

    embed(&mut document, &target, signature.element)?;
    Ok(document.serialize())
}
