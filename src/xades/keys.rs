//! Key material provider.
//!
//! Binds a decoded certificate and private key into a [`SigningContext`]
//! after verifying that they belong together, and exposes the signing and
//! certificate-metadata operations the assembler needs. The key handle
//! lives only as long as one signing call; nothing is cached.

use openssl::bn::BigNumContext;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use sha2::{Digest, Sha256};

use super::constants::{ECDSA_SHA256, RSA_SHA256};
use crate::error::{SignError, SignResult};

/// Signature suite implied by the key algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureSuite {
    RsaSha256,
    EcdsaSha256,
}

impl SignatureSuite {
    /// Algorithm URI for the `SignatureMethod` element.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha256 => RSA_SHA256,
            Self::EcdsaSha256 => ECDSA_SHA256,
        }
    }
}

/// Certificate plus matching private key, ready to sign one document.
#[derive(Debug)]
pub struct SigningContext {
    certificate: X509,
    key: PKey<Private>,
    suite: SignatureSuite,
}

impl SigningContext {
    /// Bind certificate and key together.
    ///
    /// Fails with [`SignError::KeyMismatch`] when the certificate's public
    /// key does not correspond to the private key; a silent mismatch would
    /// produce a signature that never verifies, with no error at signing
    /// time. Fails with [`SignError::UnsupportedAlgorithm`] for key
    /// families other than RSA and EC.
    pub fn prepare(certificate: &X509, key: &PKey<Private>) -> SignResult<Self> {
        let public = certificate
            .public_key()
            .map_err(|e| SignError::UnsupportedAlgorithm(format!("certificate public key: {e}")))?;
        if !key.public_eq(&public) {
            return Err(SignError::KeyMismatch);
        }
        let suite = match key.id() {
            Id::RSA => SignatureSuite::RsaSha256,
            Id::EC => SignatureSuite::EcdsaSha256,
            other => {
                return Err(SignError::UnsupportedAlgorithm(format!(
                    "key type {other:?} (only RSA and EC are supported)"
                )));
            }
        };
        Ok(Self {
            certificate: certificate.clone(),
            key: key.clone(),
            suite,
        })
    }

    pub fn suite(&self) -> SignatureSuite {
        self.suite
    }

    /// DER encoding of the certificate, for `KeyInfo`.
    pub fn certificate_der(&self) -> SignResult<Vec<u8>> {
        self.certificate
            .to_der()
            .map_err(|e| SignError::Signing(format!("certificate DER encoding: {e}")))
    }

    /// SHA-256 over the certificate DER bytes, for the XAdES
    /// `SigningCertificate` property.
    pub fn certificate_digest(&self) -> SignResult<Vec<u8>> {
        Ok(Sha256::digest(self.certificate_der()?).to_vec())
    }

    /// Issuer distinguished name in RFC 2253 order and escaping, for
    /// `X509IssuerName`.
    pub fn issuer_name(&self) -> SignResult<String> {
        let mut parts = Vec::new();
        for entry in self.certificate.issuer_name().entries() {
            let key = entry
                .object()
                .nid()
                .short_name()
                .map_err(|e| SignError::Signing(format!("issuer name attribute: {e}")))?;
            let value = entry
                .data()
                .as_utf8()
                .map_err(|e| SignError::Signing(format!("issuer name encoding: {e}")))?;
            parts.push(format!("{key}={}", escape_rdn_value(&value)));
        }
        parts.reverse();
        Ok(parts.join(","))
    }

    /// Certificate serial number as a decimal string, for `X509SerialNumber`.
    pub fn serial_number(&self) -> SignResult<String> {
        let bn = self
            .certificate
            .serial_number()
            .to_bn()
            .map_err(|e| SignError::Signing(format!("serial number: {e}")))?;
        let dec = bn
            .to_dec_str()
            .map_err(|e| SignError::Signing(format!("serial number: {e}")))?;
        Ok(dec.to_string())
    }

    /// Sign `data` with the algorithm implied by the key family
    /// (RSA-SHA256 or ECDSA-SHA256).
    ///
    /// ECDSA output is converted from OpenSSL's DER form to the raw
    /// `r || s` concatenation XML-DSig requires.
    pub fn sign(&self, data: &[u8]) -> SignResult<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)
            .map_err(|e| SignError::Signing(e.to_string()))?;
        signer
            .update(data)
            .map_err(|e| SignError::Signing(e.to_string()))?;
        let signature = signer
            .sign_to_vec()
            .map_err(|e| SignError::Signing(e.to_string()))?;
        match self.suite {
            SignatureSuite::RsaSha256 => Ok(signature),
            SignatureSuite::EcdsaSha256 => self.ecdsa_der_to_raw(&signature),
        }
    }

    fn ecdsa_der_to_raw(&self, der: &[u8]) -> SignResult<Vec<u8>> {
        let map = |e: openssl::error::ErrorStack| SignError::Signing(e.to_string());
        let ec = self.key.ec_key().map_err(map)?;
        let mut ctx = BigNumContext::new().map_err(map)?;
        let mut order = openssl::bn::BigNum::new().map_err(map)?;
        ec.group().order(&mut order, &mut ctx).map_err(map)?;
        let field_len = order.num_bytes();

        let sig = EcdsaSig::from_der(der).map_err(map)?;
        let mut raw = sig.r().to_vec_padded(field_len).map_err(map)?;
        raw.extend(sig.s().to_vec_padded(field_len).map_err(map)?);
        Ok(raw)
    }
}

/// Escape an RDN attribute value per RFC 2253 §2.4: backslash-escape the
/// special characters, a leading `#` or space and a trailing space, so a
/// value containing `,` or `=` stays unambiguous in the joined DN.
fn escape_rdn_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &ch) in chars.iter().enumerate() {
        let escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (ch == ' ' || ch == '#'))
            || (i == chars.len() - 1 && ch == ' ');
        if escape {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xades::testkeys;
    use openssl::sign::Verifier;

    #[test]
    fn prepare_accepts_matching_rsa_pair() {
        let (cert, key) = testkeys::rsa_identity();
        let ctx = SigningContext::prepare(&cert, &key).unwrap();
        assert_eq!(ctx.suite(), SignatureSuite::RsaSha256);
        assert_eq!(ctx.suite().uri(), RSA_SHA256);
    }

    #[test]
    fn prepare_rejects_mismatched_key() {
        let (cert, _) = testkeys::rsa_identity();
        let (_, other_key) = testkeys::rsa_identity();
        let err = SigningContext::prepare(&cert, &other_key).unwrap_err();
        assert!(matches!(err, SignError::KeyMismatch));
    }

    #[test]
    fn ec_keys_select_ecdsa_suite() {
        let (cert, key) = testkeys::ec_identity();
        let ctx = SigningContext::prepare(&cert, &key).unwrap();
        assert_eq!(ctx.suite(), SignatureSuite::EcdsaSha256);

        // P-256: raw signature is two 32-byte scalars.
        let signature = ctx.sign(b"payload").unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn rsa_signature_verifies() {
        let (cert, key) = testkeys::rsa_identity();
        let ctx = SigningContext::prepare(&cert, &key).unwrap();
        let signature = ctx.sign(b"canonical signed info").unwrap();

        let public = cert.public_key().unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public).unwrap();
        verifier.update(b"canonical signed info").unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn certificate_digest_is_sha256_of_der() {
        let (cert, key) = testkeys::rsa_identity();
        let ctx = SigningContext::prepare(&cert, &key).unwrap();
        let expected = Sha256::digest(cert.to_der().unwrap()).to_vec();
        assert_eq!(ctx.certificate_digest().unwrap(), expected);
    }

    #[test]
    fn issuer_serial_metadata() {
        let (cert, key) = testkeys::rsa_identity();
        let ctx = SigningContext::prepare(&cert, &key).unwrap();
        assert!(ctx.issuer_name().unwrap().contains("CN=xades-signer test"));
        assert_eq!(ctx.serial_number().unwrap(), testkeys::SERIAL.to_string());
    }

    #[test]
    fn issuer_values_with_separators_are_escaped() {
        let (cert, key) =
            testkeys::rsa_identity_with_subject(&[("O", "ACME, S.A. + Cia"), ("CN", "firma")]);
        let ctx = SigningContext::prepare(&cert, &key).unwrap();
        let issuer = ctx.issuer_name().unwrap();
        assert_eq!(issuer, r"CN=firma,O=ACME\, S.A. \+ Cia");
    }

    #[test]
    fn rdn_escaping_covers_leading_and_trailing_cases() {
        assert_eq!(escape_rdn_value("plain"), "plain");
        assert_eq!(escape_rdn_value("a,b;c"), r"a\,b\;c");
        assert_eq!(escape_rdn_value("#tagged"), r"\#tagged");
        assert_eq!(escape_rdn_value(" padded "), r"\ padded\ ");
        assert_eq!(escape_rdn_value(r"back\slash"), r"back\\slash");
    }
}
