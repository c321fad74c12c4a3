//! Client-side TLS for STARTTLS upgrades.
//!
//! Loading the platform trust store is comparatively slow, so a connector is
//! built once and cloned into every connection.

use std::sync::Arc;

use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};
use volley_common::tracing;

use super::error::{ClientError, Result};

/// Builds a [`TlsConnector`] trusting the platform's native roots.
///
/// With `accept_invalid_certs` the server certificate is not checked at all.
///
/// # Errors
///
/// Fails if a native root certificate is rejected by rustls.
pub fn connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(native_roots()?)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

fn native_roots() -> Result<RootCertStore> {
    let loaded = rustls_native_certs::load_native_certs();
    if !loaded.errors.is_empty() {
        tracing::warn!(
            errors = ?loaded.errors,
            "Skipped {} unreadable native certificates",
            loaded.errors.len()
        );
    }

    let mut roots = RootCertStore::empty();
    for certificate in loaded.certs {
        roots
            .add(certificate)
            .map_err(|e| ClientError::TlsError(format!("Rejected native root: {e}")))?;
    }
    Ok(roots)
}

/// Parses `domain` into the name presented during the handshake.
pub(super) fn server_name(domain: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(domain.to_owned())
        .map_err(|e| ClientError::TlsError(format!("'{domain}' is not a valid server name: {e}")))
}

/// Trusts whatever certificate the server presents.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> std::result::Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        use SignatureScheme::{
            ECDSA_NISTP256_SHA256, ECDSA_NISTP384_SHA384, ED25519, RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384, RSA_PSS_SHA256, RSA_PSS_SHA384,
        };

        vec![
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ED25519,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
        ]
    }
}
