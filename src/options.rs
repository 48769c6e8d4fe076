//! Immutable TLS configuration: protocol-version bounds, authentication
//! mode, identity material, the trusted authority set, the per-call
//! validation policy, and (server-side) the SNI override map.

use std::collections::HashMap;
use std::sync::Arc;

use crate::certificate::Certificate;
use crate::key::Key;
use crate::secret::Validation;

/// The half-open `[min, max]` interval of negotiable protocol versions.
///
/// Only the two versions `rustls` itself negotiates are represented;
/// anything older is refused by the underlying library before this
/// crate is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3.
    Tls13,
}

impl ProtocolVersion {
    pub(crate) fn to_rustls(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            ProtocolVersion::Tls12 => &rustls::version::TLS12,
            ProtocolVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// Whether a side of the session requires and validates the peer's
/// certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMode {
    /// No peer certificate is required or validated.
    None,
    /// The peer must present a certificate that chains to a configured
    /// authority and passes the validation callback.
    VerifyPeer,
}

/// An own certificate paired with the private key that signs for it.
/// Shared (via `Arc`) across every `Session` created from the same
/// factory.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The end-entity certificate presented to the peer.
    pub certificate: Certificate,
    /// The private key matching `certificate`'s public key.
    pub private_key: Key,
    /// Any intermediate certificates to present alongside the
    /// end-entity certificate, leaf to root.
    pub chain: Vec<Certificate>,
}

impl Identity {
    /// Build an identity with no intermediate chain.
    pub fn new(certificate: Certificate, private_key: Key) -> Self {
        Self {
            certificate,
            private_key,
            chain: Vec::new(),
        }
    }
}

/// Client-side TLS configuration.
#[derive(Clone)]
pub struct ClientOptions {
    /// Whether the server's certificate is validated.
    pub authentication: AuthenticationMode,
    /// Minimum protocol version this side will negotiate.
    pub min_version: ProtocolVersion,
    /// Maximum protocol version this side will negotiate.
    pub max_version: ProtocolVersion,
    /// Trusted authority set used to validate the peer's chain.
    pub authorities: Arc<Vec<Certificate>>,
    /// This side's own identity, presented if the peer requests client
    /// authentication.
    pub identity: Option<Arc<Identity>>,
    /// Additional user-level validation run after chain verification
    /// succeeds. `None` accepts whatever the chain verifier accepted.
    pub validation: Option<Validation<Certificate>>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("authentication", &self.authentication)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("authorities", &self.authorities.len())
            .field("identity", &self.identity.is_some())
            .field("validation", &self.validation.is_some())
            .finish()
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            authentication: AuthenticationMode::VerifyPeer,
            min_version: ProtocolVersion::Tls12,
            max_version: ProtocolVersion::Tls13,
            authorities: Arc::new(Vec::new()),
            identity: None,
            validation: None,
        }
    }
}

/// Server-side TLS configuration. Carries, in addition to the same
/// fields as [`ClientOptions`], an exact-match server-name override
/// map consulted by the [SNI dispatcher](crate::sni).
#[derive(Clone)]
pub struct ServerOptions {
    /// Whether the client's certificate is required and validated.
    pub authentication: AuthenticationMode,
    /// Minimum protocol version this side will negotiate.
    pub min_version: ProtocolVersion,
    /// Maximum protocol version this side will negotiate.
    pub max_version: ProtocolVersion,
    /// Trusted authority set used to validate the peer's chain.
    pub authorities: Arc<Vec<Certificate>>,
    /// This side's own identity, presented to the client.
    pub identity: Option<Arc<Identity>>,
    /// Additional user-level validation run after chain verification
    /// succeeds.
    pub validation: Option<Validation<Certificate>>,
    /// Lowercased server-name overrides. When the ClientHello's
    /// `server_name` extension exactly matches a key, the nested
    /// options replace these for the remainder of the handshake.
    pub sni_overrides: HashMap<String, Arc<ServerOptions>>,
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("authentication", &self.authentication)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("authorities", &self.authorities.len())
            .field("identity", &self.identity.is_some())
            .field("validation", &self.validation.is_some())
            .field("sni_overrides", &self.sni_overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            authentication: AuthenticationMode::None,
            min_version: ProtocolVersion::Tls12,
            max_version: ProtocolVersion::Tls13,
            authorities: Arc::new(Vec::new()),
            identity: None,
            validation: None,
            sni_overrides: HashMap::new(),
        }
    }
}

impl ServerOptions {
    /// Register an override: when the client's SNI host name exactly
    /// matches `name` (case-insensitively), `options` is used instead
    /// of `self` for the remainder of that handshake.
    pub fn add_override(&mut self, name: impl Into<String>, options: Arc<ServerOptions>) {
        self.sni_overrides.insert(name.into().to_ascii_lowercase(), options);
    }
}

/// Per-handshake options, distinct from the factory-wide
/// [`ClientOptions`]/[`ServerOptions`]: the server name a client sends
/// in its ClientHello.
#[derive(Debug, Clone, Default)]
pub struct HandshakeOptions {
    /// The SNI host name to advertise. Client-side only; ignored when
    /// passed to a server-role session.
    pub server_name: Option<String>,
}
