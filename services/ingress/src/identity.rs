//! Identity extraction from mTLS material.
//!
//! Three mutually exclusive sources, selected by configuration: the direct
//! TLS peer chain, an RFC 9440 `Client-Cert-Chain` header, or the AWS ALB
//! `X-Amzn-Mtls-Clientcert` header. All failures surface before the
//! WebSocket upgrade is attempted, so an unauthenticated peer never
//! completes an upgrade.
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use rustls::pki_types::CertificateDer;
use x509_parser::prelude::*;

use drover_telemetry::RequestIdentity;

use crate::config::{DirectCertSelection, TlsPassThrough};

/// RFC 9440 header: base64 of a PEM block, set by a terminating proxy.
pub const CLIENT_CERT_CHAIN_HEADER: &str = "Client-Cert-Chain";
/// AWS ALB mutual-auth header: URL-escaped PEM.
pub const AWS_ALB_CERT_HEADER: &str = "X-Amzn-Mtls-Clientcert";

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    #[error("missing client certificate")]
    MissingCertificate,
    #[error("parse client certificate: {0}")]
    ParseCertificate(String),
}

/// Derive the request identity from whichever mTLS source is configured.
///
/// Idempotent for a given request: the same headers and peer chain always
/// yield the same identity.
pub fn extract_identity(
    headers: &HeaderMap,
    peer_certs: &[CertificateDer<'static>],
    pass_through: Option<TlsPassThrough>,
    selection: DirectCertSelection,
) -> Result<RequestIdentity> {
    let der = match pass_through {
        Some(TlsPassThrough::Rfc9440) => cert_from_rfc9440(headers)?,
        Some(TlsPassThrough::AwsApplicationLoadBalancer) => cert_from_aws_alb(headers)?,
        None => cert_from_peer_chain(peer_certs, selection)?,
    };
    identity_from_der(&der)
}

fn cert_from_peer_chain(
    peer_certs: &[CertificateDer<'static>],
    selection: DirectCertSelection,
) -> Result<Vec<u8>> {
    let cert = match selection {
        DirectCertSelection::ChainLast => peer_certs.last(),
        DirectCertSelection::ChainFirst => peer_certs.first(),
    };
    cert.map(|cert| cert.as_ref().to_vec())
        .ok_or(IdentityError::MissingCertificate)
}

fn cert_from_rfc9440(headers: &HeaderMap) -> Result<Vec<u8>> {
    let raw = headers
        .get(CLIENT_CERT_CHAIN_HEADER)
        .ok_or(IdentityError::MissingCertificate)?;
    let raw = raw
        .to_str()
        .map_err(|_| IdentityError::ParseCertificate("header is not ASCII".to_string()))?;
    let decoded = BASE64_STANDARD
        .decode(raw.trim())
        .map_err(|err| IdentityError::ParseCertificate(format!("base64: {err}")))?;
    first_pem_block(&decoded)
}

fn cert_from_aws_alb(headers: &HeaderMap) -> Result<Vec<u8>> {
    let raw = headers
        .get(AWS_ALB_CERT_HEADER)
        .ok_or(IdentityError::MissingCertificate)?;
    let raw = raw
        .to_str()
        .map_err(|_| IdentityError::ParseCertificate("header is not ASCII".to_string()))?;
    let unescaped = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|err| IdentityError::ParseCertificate(format!("url escape: {err}")))?;
    first_pem_block(unescaped.as_bytes())
}

// A multi-certificate chain yields the first block only: the terminating
// proxy already validated the chain, and only leaf identity fields matter.
fn first_pem_block(pem: &[u8]) -> Result<Vec<u8>> {
    let (_, block) = parse_x509_pem(pem)
        .map_err(|err| IdentityError::ParseCertificate(format!("pem: {err}")))?;
    Ok(block.contents)
}

fn identity_from_der(der: &[u8]) -> Result<RequestIdentity> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|err| IdentityError::ParseCertificate(format!("der: {err}")))?;
    let client_type = common_name(cert.issuer()).ok_or_else(|| {
        IdentityError::ParseCertificate("issuer common name missing".to_string())
    })?;
    let device_id = common_name(cert.subject()).ok_or_else(|| {
        IdentityError::ParseCertificate("subject common name missing".to_string())
    })?;
    Ok(RequestIdentity::new(&client_type, device_id))
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
        .filter(|value| !value.is_empty())
}

/// Log leaf certificate details of the direct-TLS peer, if any.
pub fn log_peer_certificate(peer_certs: &[CertificateDer<'static>]) {
    let Some(leaf) = peer_certs.first() else {
        tracing::info!("client certificate not found");
        return;
    };
    match X509Certificate::from_der(leaf.as_ref()) {
        Ok((_, cert)) => {
            tracing::info!(
                subject = %cert.subject(),
                issuer = %cert.issuer(),
                not_before = %cert.validity().not_before,
                not_after = %cert.validity().not_after,
                "client certificate"
            );
        }
        Err(err) => tracing::info!(error = %err, "client certificate unparsable"),
    }
}
