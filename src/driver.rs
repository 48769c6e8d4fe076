//! The facade tying key/certificate generation, resource decoding, and
//! session creation together: the single entry point higher layers use
//! instead of reaching into [`crate::key`], [`crate::certificate`],
//! [`crate::resource`], or [`crate::session`] directly.
//!
//! [`Driver`] owns no per-call state of its own — generation and
//! decoding are pure functions of their arguments — but its
//! constructor is where the underlying TLS library's process-wide
//! state (the `ring` crypto provider's algorithm registry and RNG
//! hooks) is installed, exactly once, the first time any `Driver` is
//! built or any [`crate::session::Session`] is created. Nothing tears
//! that registration down; it is not specified and not needed for
//! process lifetime.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::certificate::{Certificate, CertificateOptions, DistinguishedName};
use crate::error::Result;
use crate::key::{Key, KeyGenOptions};
use crate::options::{ClientOptions, HandshakeOptions, ServerOptions};
use crate::resource::{Resource, ResourceOptions};
use crate::session::Session;

static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the default `ring`-backed crypto provider exactly once per
/// process. Safe to call concurrently from multiple threads; a racing
/// `CryptoProvider::install_default` elsewhere in the process (e.g. an
/// embedding binary that also uses `rustls` directly) is tolerated —
/// we only care that *some* provider ends up installed.
pub(crate) fn ensure_crypto_provider_installed() {
    PROVIDER_INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
        debug!("installed default rustls crypto provider");
    });
}

/// The facade exposing generation, decoding, and session-creation
/// operations. Stateless and cheap to construct; safe to share across
/// threads. Every `Driver` in a process shares the same process-wide
/// `rustls` provider registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Driver;

impl Driver {
    /// Build a driver, installing the process-wide crypto provider if
    /// no `Driver` or `Session` has already done so.
    pub fn new() -> Self {
        ensure_crypto_provider_installed();
        Driver
    }

    /// Generate a fresh asymmetric key for the requested algorithm.
    pub fn generate_key(&self, options: KeyGenOptions) -> Result<Key> {
        Key::generate(options)
    }

    /// Decode a key from its encoded form.
    pub fn decode_key(&self, bytes: &[u8], options: &ResourceOptions) -> Result<Key> {
        Key::decode(bytes, options)
    }

    /// Generate a self-signed certificate: `issuer == subject`.
    pub fn generate_self_signed_certificate(
        &self,
        subject: DistinguishedName,
        subject_key: &Key,
        options: CertificateOptions,
    ) -> Result<Certificate> {
        Certificate::generate_self_signed(subject, subject_key, options)
    }

    /// Generate a certificate signed by `issuer_cert`/`issuer_key`.
    pub fn generate_certificate(
        &self,
        subject: DistinguishedName,
        subject_key: &Key,
        issuer_cert: &Certificate,
        issuer_key: &Key,
        options: CertificateOptions,
    ) -> Result<Certificate> {
        Certificate::generate_signed_by(subject, subject_key, issuer_cert, issuer_key, options)
    }

    /// Decode a certificate from its encoded form.
    pub fn decode_certificate(&self, bytes: &[u8], options: &ResourceOptions) -> Result<Certificate> {
        Certificate::decode(bytes, options)
    }

    /// An empty [`Resource`] builder.
    pub fn create_resource(&self) -> Resource {
        Resource::new()
    }

    /// Decode a key/certificate/chain bundle from its container
    /// encoding.
    pub fn decode_resource(&self, bytes: &[u8], options: &ResourceOptions) -> Result<Resource> {
        Resource::decode(bytes, options)
    }

    /// Build a client-side TLS session. The handshake does not begin
    /// until [`Session::initiate_handshake`] is called on the result.
    pub fn create_encryption_client(
        &self,
        options: &ClientOptions,
        handshake: &HandshakeOptions,
    ) -> Result<Session> {
        ensure_crypto_provider_installed();
        Session::new_client(options, handshake)
    }

    /// Build a server-side TLS session. `options` supplies the
    /// top-level identity, authentication policy, and SNI override
    /// map; the effective identity for a given handshake is resolved
    /// once the ClientHello's server name is known.
    pub fn create_encryption_server(&self, options: Arc<ServerOptions>) -> Result<Session> {
        ensure_crypto_provider_installed();
        Session::new_server(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyAlgorithm;
    use crate::options::{AuthenticationMode, Identity};
    use std::sync::Arc;

    #[test]
    fn generates_key_and_self_signed_ca() {
        let driver = Driver::new();
        let key = driver
            .generate_key(KeyGenOptions::new(KeyAlgorithm::EcP256))
            .unwrap();
        let subject = DistinguishedName::new()
            .with_common_name("TEST.AUTHORITY")
            .with_organization("Example LP");
        let mut options = CertificateOptions::default();
        options.is_ca = true;
        options.serial = Some(1);
        let cert = driver
            .generate_self_signed_certificate(subject, &key, options)
            .unwrap();
        assert!(cert.is_self_signed());
        assert!(cert.is_ca());
    }

    #[test]
    fn create_encryption_server_requires_identity_or_overrides() {
        let driver = Driver::new();
        let options = Arc::new(ServerOptions {
            authentication: AuthenticationMode::None,
            ..ServerOptions::default()
        });
        let result = driver.create_encryption_server(options);
        assert!(result.is_err());
    }

    #[test]
    fn create_encryption_server_succeeds_with_identity() {
        let driver = Driver::new();
        let key = driver
            .generate_key(KeyGenOptions::new(KeyAlgorithm::EcP256))
            .unwrap();
        let subject = DistinguishedName::new().with_common_name("server.example.test");
        let cert = driver
            .generate_self_signed_certificate(subject, &key, CertificateOptions::default())
            .unwrap();
        let mut options = ServerOptions::default();
        options.identity = Some(Arc::new(Identity::new(cert, key)));
        let result = driver.create_encryption_server(Arc::new(options));
        assert!(result.is_ok());
    }

    #[test]
    fn concurrent_driver_construction_installs_provider_once() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(Driver::new))
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
