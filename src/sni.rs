//! Server-side SNI (Server Name Indication) dispatch.
//!
//! A pure function from (incoming ClientHello server name, top-level
//! `ServerOptions`) to the `ServerOptions` actually used for the rest
//! of the handshake, plus the `rustls` certificate resolver that wires
//! the pure function into the record layer in [`crate::session`].

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::error::Error;
use crate::options::ServerOptions;

/// Select the effective options for a handshake given the ClientHello's
/// `server_name` extension.
///
/// Lookup is exact-match on the lowercased host name. If no name was
/// sent, or no override matches, the top-level options apply
/// unchanged. Wildcard and multi-name matching is the certificate's
/// own SAN matching during peer validation, not this function's
/// concern.
pub fn dispatch(server_name: Option<&str>, top_level: &Arc<ServerOptions>) -> Arc<ServerOptions> {
    match server_name {
        Some(name) => {
            let key = name.to_ascii_lowercase();
            top_level
                .sni_overrides
                .get(&key)
                .cloned()
                .unwrap_or_else(|| top_level.clone())
        }
        None => top_level.clone(),
    }
}

/// Adapts [`dispatch`] to `rustls`'s certificate-resolution hook,
/// translating the selected `ServerOptions`' identity into the signing
/// key shape `rustls` expects.
pub(crate) struct SniCertResolver {
    pub(crate) top_level: Arc<ServerOptions>,
}

impl SniCertResolver {
    pub(crate) fn certified_key_for(options: &ServerOptions) -> Option<Arc<CertifiedKey>> {
        let identity = options.identity.as_ref()?;
        let mut chain = vec![rustls::pki_types::CertificateDer::from(
            identity.certificate.der().to_vec(),
        )];
        for ca in &identity.chain {
            chain.push(rustls::pki_types::CertificateDer::from(ca.der().to_vec()));
        }

        let key_der = identity
            .private_key
            .encode(&crate::resource::ResourceOptions::format(
                crate::resource::ContainerFormat::Asn1,
            ))
            .ok()?;
        let private_key_der =
            rustls::pki_types::PrivateKeyDer::try_from(key_der).ok()?;
        let signing_key =
            rustls::crypto::ring::sign::any_supported_type(&private_key_der).ok()?;

        Some(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}

impl std::fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniCertResolver").finish()
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name();
        let effective = dispatch(server_name, &self.top_level);
        Self::certified_key_for(&effective)
    }
}

pub(crate) fn missing_identity_error() -> Error {
    Error::invalid("server options have no identity to present for this server name")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateOptions, DistinguishedName};
    use crate::key::{Key, KeyAlgorithm, KeyGenOptions};
    use crate::options::Identity;

    fn make_identity(cn: &str) -> Identity {
        let key = Key::generate(KeyGenOptions::new(KeyAlgorithm::EcP256)).unwrap();
        let subject = DistinguishedName::new().with_common_name(cn);
        let cert =
            crate::certificate::Certificate::generate_self_signed(subject, &key, CertificateOptions::default())
                .unwrap();
        Identity::new(cert, key)
    }

    #[test]
    fn exact_match_override_wins() {
        let mut top = ServerOptions::default();
        top.identity = Some(Arc::new(make_identity("top-level")));
        let one = Arc::new({
            let mut o = ServerOptions::default();
            o.identity = Some(Arc::new(make_identity("server-one")));
            o
        });
        top.add_override("one.example.com", one.clone());
        let top = Arc::new(top);

        let effective = dispatch(Some("ONE.example.com"), &top);
        assert_eq!(
            effective.identity.as_ref().unwrap().certificate.subject().get("2.5.4.3"),
            Some("server-one")
        );
    }

    #[test]
    fn no_name_uses_top_level() {
        let mut top = ServerOptions::default();
        top.identity = Some(Arc::new(make_identity("top-level")));
        let top = Arc::new(top);
        let effective = dispatch(None, &top);
        assert_eq!(
            effective.identity.as_ref().unwrap().certificate.subject().get("2.5.4.3"),
            Some("top-level")
        );
    }

    #[test]
    fn unmatched_name_uses_top_level() {
        let mut top = ServerOptions::default();
        top.identity = Some(Arc::new(make_identity("top-level")));
        top.add_override(
            "one.example.com",
            Arc::new({
                let mut o = ServerOptions::default();
                o.identity = Some(Arc::new(make_identity("server-one")));
                o
            }),
        );
        let top = Arc::new(top);
        let effective = dispatch(Some("nope.example.com"), &top);
        assert_eq!(
            effective.identity.as_ref().unwrap().certificate.subject().get("2.5.4.3"),
            Some("top-level")
        );
    }
}
