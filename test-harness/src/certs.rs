// Certificate fixtures: a per-client-type CA and device certificates with
// the VIN in the subject common name.
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rcgen::{generate_simple_self_signed, BasicConstraints, Certificate, CertificateParams, DnType, IsCa};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// CA whose common name doubles as the client type of every device
/// certificate it signs.
pub struct DeviceCertAuthority {
    ca: Certificate,
}

/// One issued device certificate, ready for a TLS client or a
/// pass-through header.
pub struct DeviceCert {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    pub pem: String,
}

impl DeviceCertAuthority {
    pub fn new(client_type: &str) -> Result<Self> {
        let mut params = CertificateParams::new(vec![]);
        params
            .distinguished_name
            .push(DnType::CommonName, client_type);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = Certificate::from_params(params).context("generate device CA")?;
        Ok(Self { ca })
    }

    pub fn ca_der(&self) -> Result<CertificateDer<'static>> {
        Ok(CertificateDer::from(
            self.ca.serialize_der().context("serialize device CA")?,
        ))
    }

    /// Issue a certificate with `device_id` as the subject common name.
    pub fn issue(&self, device_id: &str) -> Result<DeviceCert> {
        let cert = self.device_cert(device_id)?;
        let der = cert
            .serialize_der_with_signer(&self.ca)
            .context("sign device certificate")?;
        let pem = cert
            .serialize_pem_with_signer(&self.ca)
            .context("sign device certificate pem")?;
        let key = PrivatePkcs8KeyDer::from(cert.serialize_private_key_der());
        Ok(DeviceCert {
            chain: vec![CertificateDer::from(der)],
            key: key.into(),
            pem,
        })
    }

    pub fn issue_der(&self, device_id: &str) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
        let issued = self.issue(device_id)?;
        let mut chain = issued.chain;
        Ok((chain.remove(0), issued.key))
    }

    pub fn issue_pem(&self, device_id: &str) -> Result<String> {
        Ok(self.issue(device_id)?.pem)
    }

    fn device_cert(&self, device_id: &str) -> Result<Certificate> {
        let mut params = CertificateParams::new(vec![]);
        params
            .distinguished_name
            .push(DnType::CommonName, device_id);
        Certificate::from_params(params).context("generate device certificate")
    }
}

/// Self-signed localhost identity for the test server listener.
pub fn server_identity() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert = generate_simple_self_signed(vec!["localhost".into()])
        .context("generate self-signed server cert")?;
    let cert_der = CertificateDer::from(cert.serialize_der()?);
    let key_der = PrivatePkcs8KeyDer::from(cert.get_key_pair().serialize_der());
    Ok((vec![cert_der], key_der.into()))
}

/// RFC 9440 header value: base64 of the PEM block.
pub fn rfc9440_header(pem: &str) -> String {
    BASE64_STANDARD.encode(pem)
}

/// AWS ALB pass-through header value: URL-escaped PEM.
pub fn alb_header(pem: &str) -> String {
    utf8_percent_encode(pem, NON_ALPHANUMERIC).to_string()
}
