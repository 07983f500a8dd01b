use thiserror::Error;

pub(crate) type SignResult<T> = Result<T, SignError>;

/// Error type for the signing pipeline.
///
/// Every failure in the core is one of these variants; nothing is retried
/// internally and no partially signed document is ever produced.
#[derive(Error, Debug)]
pub enum SignError {
    /// Input is not well-formed XML or uses disallowed constructs
    /// (DTDs, external entities and processing instructions are rejected
    /// outright).
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    /// The requested signing target does not exist, or more than one
    /// element carries the requested ID value.
    #[error("Signing target not found: {0}")]
    ElementNotFound(String),

    /// The private key does not correspond to the certificate public key.
    #[error("Private key does not match the certificate public key")]
    KeyMismatch,

    /// Key algorithm family outside the supported set (RSA, EC).
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Failure while canonicalizing or hashing.
    #[error("Digest computation failed: {0}")]
    DigestComputation(String),

    /// Failure during the asymmetric signing operation.
    #[error("Signing operation failed: {0}")]
    Signing(String),
}
