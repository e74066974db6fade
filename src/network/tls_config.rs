/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! TLS client configuration for DNS over TLS upstreams
//!
//! Provides pre-built TLS configurations for:
//! - Secure mode: validates certificates against the webpki roots
//! - Insecure mode: skips certificate validation (for testing only)
//!
//! Configurations are lazily initialized and cached for reuse.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref PROVIDER: Arc<CryptoProvider> = Arc::new(ring::default_provider());

    /// Secure TLS configuration with certificate validation
    static ref SECURE_CONFIG: ClientConfig = build_secure_config();

    /// Insecure TLS configuration (no certificate validation)
    static ref INSECURE_CONFIG: ClientConfig = build_insecure_config();
}

fn build_secure_config() -> ClientConfig {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder_with_provider(PROVIDER.clone())
        .with_safe_default_protocol_versions()
        .expect("ring provider supports the default protocol versions")
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn build_insecure_config() -> ClientConfig {
    ClientConfig::builder_with_provider(PROVIDER.clone())
        .with_safe_default_protocol_versions()
        .expect("ring provider supports the default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertVerification(PROVIDER.clone())))
        .with_no_client_auth()
}

/// Get secure TLS configuration (with certificate validation)
pub(crate) fn secure_client_config() -> ClientConfig {
    SECURE_CONFIG.clone()
}

/// Get insecure TLS configuration (no certificate validation)
///
/// **WARNING**: Only use for testing/development!
pub(crate) fn insecure_client_config() -> ClientConfig {
    INSECURE_CONFIG.clone()
}

/// Certificate verifier that accepts any certificate (INSECURE!)
struct NoCertVerification(Arc<CryptoProvider>);

impl Debug for NoCertVerification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NoCertVerification")
    }
}

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}
