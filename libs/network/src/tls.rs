//! TLS configuration builders
//!
//! All configs use the ring provider explicitly so the process never
//! depends on a globally installed default.

use crate::{Result, TransportError};
use relay_config::{TlsClientConfig, TlsListenerConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Read every certificate from a PEM file
pub fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| TransportError::io(format!("Failed to open certificate file {:?}", path), e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TransportError::io(format!("Failed to parse certificates in {:?}", path), e))?;
    if certs.is_empty() {
        return Err(TransportError::security(format!(
            "No certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

/// Read the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| TransportError::io(format!("Failed to open key file {:?}", path), e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TransportError::io(format!("Failed to parse key file {:?}", path), e))?
        .ok_or_else(|| TransportError::security(format!("No private key found in {:?}", path)))
}

fn root_store(ca_file: &str) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        roots
            .add(cert)
            .map_err(|e| TransportError::security(format!("Invalid CA certificate: {e}")))?;
    }
    Ok(roots)
}

/// Client config for dialing aggregators over `tls://`
pub fn client_config(tls: &TlsClientConfig) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::security(e.to_string()))?
        .with_root_certificates(root_store(&tls.ca_file)?);

    let config = if tls.cert_file.is_empty() || tls.key_file.is_empty() {
        builder.with_no_client_auth()
    } else {
        builder
            .with_client_auth_cert(load_certs(&tls.cert_file)?, load_private_key(&tls.key_file)?)
            .map_err(|e| TransportError::security(format!("Invalid client certificate: {e}")))?
    };
    Ok(Arc::new(config))
}

/// Server config for the aggregator's secure listener; a CA file turns on
/// mutual authentication
pub fn server_config(tls: &TlsListenerConfig) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(&tls.cert_file)?;
    let key = load_private_key(&tls.key_file)?;

    let builder = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::security(e.to_string()))?;

    let builder = if tls.ca_file.is_empty() {
        builder.with_no_client_auth()
    } else {
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(root_store(&tls.ca_file)?), provider())
                .build()
                .map_err(|e| TransportError::security(format!("Invalid client CA: {e}")))?;
        builder.with_client_cert_verifier(verifier)
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::security(format!("Invalid server certificate: {e}")))?;
    Ok(Arc::new(config))
}

/// Client config for external drains: platform roots, or no verification at
/// all when the operator opted out
pub fn drain_client_config(skip_cert_verify: bool) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::security(e.to_string()))?;

    if skip_cert_verify {
        warn!("Drain certificate verification is disabled");
        let config = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider())))
            .with_no_client_auth();
        return Ok(Arc::new(config));
    }

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!(error = %err, "Failed to load a platform certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "Loaded platform root certificates");

    Ok(Arc::new(
        builder.with_root_certificates(roots).with_no_client_auth(),
    ))
}

/// Server name for SNI and certificate checks
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::configuration(format!("Invalid server name {host}"), Some("host")))
}

#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_path;

    #[test]
    fn test_fixture_material_loads() {
        assert_eq!(load_certs(fixture_path("server.crt")).unwrap().len(), 1);
        assert!(load_private_key(fixture_path("server.key")).is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_certs("/nonexistent/cert.pem").unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
    }

    #[test]
    fn test_key_file_without_key_is_security_error() {
        let err = load_private_key(fixture_path("ca.crt")).unwrap_err();
        assert!(matches!(err, TransportError::Security { .. }));
    }

    #[test]
    fn test_server_config_with_and_without_client_auth() {
        let mut listener = TlsListenerConfig {
            port: 0,
            cert_file: fixture_path("server.crt"),
            key_file: fixture_path("server.key"),
            ca_file: String::new(),
        };
        assert!(server_config(&listener).is_ok());
        listener.ca_file = fixture_path("ca.crt");
        assert!(server_config(&listener).is_ok());
    }

    #[test]
    fn test_drain_configs_build() {
        assert!(drain_client_config(true).is_ok());
        assert!(drain_client_config(false).is_ok());
    }

    #[test]
    fn test_server_name_accepts_hosts_and_ips() {
        assert!(server_name("localhost").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
