//! # TLS server presets.
//!
//! Two server-side levels, after the Mozilla recommendations:
//! - [`modern_config`]: TLS 1.3 only;
//! - [`intermediate_config`]: TLS 1.2 and 1.3.
//!
//! Both restrict key exchange to X25519, P-256 and P-384. The result plugs into
//! [`ListenerConfig::with_tls`](crate::ListenerConfig::with_tls).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{NamedGroup, ServerConfig, SupportedProtocolVersion};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid certificate PEM: {0}")]
    Certificates(#[source] io::Error),

    #[error("no certificate found in PEM input")]
    NoCertificates,

    #[error("invalid private key PEM: {0}")]
    PrivateKey(#[source] io::Error),

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("invalid tls configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// TLS 1.3 only.
pub fn modern_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>, TlsError> {
    build(&[&rustls::version::TLS13], cert_pem, key_pem)
}

/// TLS 1.2 and TLS 1.3.
pub fn intermediate_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>, TlsError> {
    build(
        &[&rustls::version::TLS13, &rustls::version::TLS12],
        cert_pem,
        key_pem,
    )
}

/// Reads a certificate chain and a private key from PEM files.
pub fn read_pem_files(
    cert: impl AsRef<Path>,
    key: impl AsRef<Path>,
) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
    };
    Ok((read(cert.as_ref())?, read(key.as_ref())?))
}

fn build(
    versions: &[&'static SupportedProtocolVersion],
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = parse_certs(cert_pem)?;
    let key = parse_key(key_pem)?;

    let config = ServerConfig::builder_with_provider(Arc::new(provider()))
        .with_protocol_versions(versions)?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

fn provider() -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.kx_groups.retain(|group| {
        matches!(
            group.name(),
            NamedGroup::X25519 | NamedGroup::secp256r1 | NamedGroup::secp384r1
        )
    });
    provider
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut &*pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Certificates)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut &*pem)
        .map_err(TlsError::PrivateKey)?
        .ok_or(TlsError::NoPrivateKey)
}
