//! # ntls-core
//!
//! A buffer-driven, non-blocking TLS session engine and the
//! cryptographic material management layer that feeds it: asymmetric
//! key generation/encoding, X.509 certificate generation/validation,
//! and a format-agnostic codec for bundling keys, end-entity
//! certificates, and CA chains into DER, PEM, PKCS#7, PKCS#8, or
//! PKCS#12 containers.
//!
//! ## Architecture
//!
//! - [`secret`]: opaque, zeroizing byte container and the validation
//!   predicate wrapper used by certificate and session authentication
//!   policy.
//! - [`key`]: the [`key::Key`] sum type over RSA/DSA/EC/Ed25519 and its
//!   codec.
//! - [`certificate`]: the [`certificate::Certificate`] object model,
//!   generation, and RFC 5280 field extraction.
//! - [`resource`]: bundles of key + end-entity certificate + CA chain,
//!   serialized to any of the five container formats.
//! - [`options`]: immutable client/server TLS configuration.
//! - [`sni`]: server-side SNI dispatch from `ClientOptions`/`ServerOptions`.
//! - [`session`]: the four-queue, non-blocking TLS state machine.
//! - [`driver`]: the facade tying generation, decoding, and session
//!   creation together.
//!
//! No socket I/O, thread pool, event loop, or CLI front-end is
//! provided; callers move ciphertext and plaintext bytes in and out of
//! a [`session::Session`] themselves.

pub mod crypto;
pub mod error;
pub mod secret;
pub mod key;
pub mod certificate;
pub mod resource;
pub mod options;
pub mod sni;
pub mod session;
pub mod driver;

pub use error::{Error, ErrorKind, Result};

/// Convenience re-exports for the common entry points.
pub mod prelude {
    pub use crate::certificate::{
        Certificate, CertificateOptions, DistinguishedName, SubjectAltName,
    };
    pub use crate::driver::Driver;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::key::{Key, KeyAlgorithm, KeyGenOptions};
    pub use crate::options::{
        AuthenticationMode, ClientOptions, ProtocolVersion, ServerOptions,
    };
    pub use crate::resource::{ContainerFormat, Resource, ResourceOptions};
    pub use crate::secret::Secret;
    pub use crate::session::{HandshakeResult, Session, SessionRole, SessionState};
}
