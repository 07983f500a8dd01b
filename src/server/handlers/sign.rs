//! `POST /sign`, the signing endpoint.
//!
//! Accepts the base64 transport envelope, decodes the PKCS#12 container at
//! the edge (the core consumes decoded key material only) and runs the
//! signing pipeline. The passphrase and private key live for the duration
//! of this handler and are dropped with it.

use axum::Json;
use axum::extract::State;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use openssl::pkcs12::Pkcs12;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::server::AppState;
use crate::server::errors::ApiError;
use crate::xades::{SignOptions, sign_enveloped};

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    /// Base64 of the XML document to sign.
    pub xml: String,
    /// Base64 of the PKCS#12 key container.
    pub p12: String,
    /// Container passphrase.
    pub password: SecretString,
    /// Sign the element with this ID instead of the root.
    #[serde(default)]
    pub target_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub success: bool,
    /// Base64 of the signed XML document.
    pub signed_xml: String,
}

#[instrument(skip_all)]
pub async fn handle_sign(
    State(state): State<AppState>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let xml_bytes = BASE64
        .decode(&request.xml)
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 in `xml`: {e}")))?;
    let xml = String::from_utf8(xml_bytes)
        .map_err(|e| ApiError::BadRequest(format!("`xml` is not UTF-8: {e}")))?;

    let p12_der = BASE64
        .decode(&request.p12)
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 in `p12`: {e}")))?;
    let container = Pkcs12::from_der(&p12_der)
        .map_err(|e| ApiError::BadRequest(format!("invalid PKCS#12 container: {e}")))?;
    let identity = container
        .parse2(request.password.expose_secret())
        .map_err(|_| ApiError::BadRequest("PKCS#12 decryption failed; wrong passphrase?".into()))?;

    let certificate = identity
        .cert
        .ok_or_else(|| ApiError::BadRequest("PKCS#12 container holds no certificate".into()))?;
    let private_key = identity
        .pkey
        .ok_or_else(|| ApiError::BadRequest("PKCS#12 container holds no private key".into()))?;

    let options = SignOptions {
        id_attribute: state.signing.id_attribute.clone(),
        fallback_id: state.signing.fallback_id.clone(),
        target_id: request.target_id.clone(),
        ..SignOptions::default()
    };
    let signed = sign_enveloped(&xml, &certificate, &private_key, &options)?;
    info!("document signed");

    Ok(Json(SignResponse {
        success: true,
        signed_xml: BASE64.encode(signed.as_bytes()),
    }))
}
