// Server-side TLS assembly for the ingress listener.
use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use crate::config::IngressConfig;

/// Build the acceptor from configured PEM paths.
pub fn acceptor_from_config(config: &IngressConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&config.tls_cert)?;
    let key = load_key(&config.tls_key)?;
    let client_ca = match &config.tls_client_ca {
        Some(path) => Some(load_certs(path)?),
        None => None,
    };
    build_acceptor(certs, key, client_ca)
}

/// Build the acceptor from in-memory material; tests feed rcgen output here.
///
/// Client verification is optional on purpose: pass-through deployments
/// terminate mTLS upstream and present no peer certificate, and the
/// identity extractor rejects unauthenticated peers before upgrade.
pub fn build_acceptor(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_ca: Option<Vec<CertificateDer<'static>>>,
) -> Result<TlsAcceptor> {
    // First caller wins; the provider only has to be pinned once.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let builder = match client_ca {
        Some(roots) => {
            let mut store = RootCertStore::empty();
            for root in roots {
                store.add(root).context("add client CA root")?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(store))
                .allow_unauthenticated()
                .build()
                .context("build client certificate verifier")?;
            ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => ServerConfig::builder().with_no_client_auth(),
    };
    let server_config = builder
        .with_single_cert(certs, key)
        .context("assemble server TLS config")?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open certificate file: {path:?}"))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("parse certificate file: {path:?}"))?;
    Ok(certs)
}

fn load_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open key file: {path:?}"))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("parse key file: {path:?}"))?
        .with_context(|| format!("no private key found in {path:?}"))
}
