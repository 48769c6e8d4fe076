//! Container format enumeration and the options that steer encoding
//! and decoding of [`crate::key::Key`], [`crate::certificate::Certificate`],
//! and [`super::Resource`] bundles.

use crate::secret::Secret;
use std::sync::Arc;

/// The five container formats the codec understands.
///
/// `Asn1` and `Asn1Pem` differ only in the outer envelope (raw DER vs
/// PEM-wrapped DER); `Pkcs7`/`Pkcs7Pem` and `Pkcs8`/`Pkcs8Pem` are
/// likewise DER/PEM pairs over the same inner structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// Raw DER (X.690). Key or certificate alone, never both.
    Asn1,
    /// PEM-wrapped DER (RFC 7468). Key, certificate, and/or chain.
    Asn1Pem,
    /// PKCS#7 signed-data (RFC 5652), DER form. Certificates only.
    Pkcs7,
    /// PKCS#7 signed-data, PEM form.
    Pkcs7Pem,
    /// PKCS#8 private key info (RFC 5958), DER form.
    Pkcs8,
    /// PKCS#8 private key info, PEM form.
    Pkcs8Pem,
    /// PKCS#12 (RFC 7292). Key, certificate, and chain together.
    Pkcs12,
}

impl ContainerFormat {
    /// Whether this format can carry a private key.
    pub fn supports_private_key(self) -> bool {
        matches!(
            self,
            ContainerFormat::Asn1
                | ContainerFormat::Asn1Pem
                | ContainerFormat::Pkcs8
                | ContainerFormat::Pkcs8Pem
                | ContainerFormat::Pkcs12
        )
    }

    /// Whether this format can carry an end-entity certificate.
    pub fn supports_certificate(self) -> bool {
        matches!(
            self,
            ContainerFormat::Asn1
                | ContainerFormat::Asn1Pem
                | ContainerFormat::Pkcs7
                | ContainerFormat::Pkcs7Pem
                | ContainerFormat::Pkcs12
        )
    }

    /// Whether this format can carry a CA chain alongside the
    /// end-entity certificate.
    pub fn supports_chain(self) -> bool {
        matches!(
            self,
            ContainerFormat::Asn1Pem
                | ContainerFormat::Pkcs7
                | ContainerFormat::Pkcs7Pem
                | ContainerFormat::Pkcs12
        )
    }

    /// Whether the format allows a private key and a certificate in
    /// the same bundle.
    pub fn supports_key_and_certificate(self) -> bool {
        matches!(self, ContainerFormat::Asn1Pem | ContainerFormat::Pkcs12)
    }

    /// Whether this format's PEM-wrapped variant is the one being used.
    pub fn is_pem(self) -> bool {
        matches!(
            self,
            ContainerFormat::Asn1Pem | ContainerFormat::Pkcs7Pem | ContainerFormat::Pkcs8Pem
        )
    }

    /// Whether this format supports whole-container or per-block
    /// passphrase encryption.
    pub fn supports_encryption(self) -> bool {
        matches!(
            self,
            ContainerFormat::Asn1Pem
                | ContainerFormat::Pkcs8
                | ContainerFormat::Pkcs8Pem
                | ContainerFormat::Pkcs12
        )
    }
}

/// A lazily-evaluated passphrase source: either a concrete [`Secret`]
/// or a callback invoked at the moment encryption/decryption needs it.
#[derive(Clone)]
pub enum PassphraseSource {
    /// The passphrase is already in hand.
    Direct(Secret),
    /// Fetch the passphrase on demand, e.g. by prompting a user.
    Callback(Arc<dyn Fn() -> Option<Secret> + Send + Sync>),
}

impl PassphraseSource {
    /// Resolve the source to a concrete secret, if one is available.
    pub fn resolve(&self) -> Option<Secret> {
        match self {
            PassphraseSource::Direct(s) => Some(s.clone()),
            PassphraseSource::Callback(f) => f(),
        }
    }
}

impl std::fmt::Debug for PassphraseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassphraseSource::Direct(_) => write!(f, "PassphraseSource::Direct(***)"),
            PassphraseSource::Callback(_) => write!(f, "PassphraseSource::Callback(..)"),
        }
    }
}

/// Options governing one encode or decode call.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    /// The container format to use. `None` on decode means "sniff it".
    /// Required on encode.
    pub format: Option<ContainerFormat>,
    /// Whether the encoded form (or an expected decoded form) is
    /// passphrase-encrypted.
    pub encrypted: bool,
    /// The passphrase source, consulted when `encrypted` is set.
    pub passphrase: Option<PassphraseSource>,
}

impl ResourceOptions {
    /// Options requesting a specific unencrypted format.
    pub fn format(format: ContainerFormat) -> Self {
        Self {
            format: Some(format),
            encrypted: false,
            passphrase: None,
        }
    }

    /// Options requesting a specific format encrypted with a known
    /// passphrase.
    pub fn encrypted_with(format: ContainerFormat, passphrase: Secret) -> Self {
        Self {
            format: Some(format),
            encrypted: true,
            passphrase: Some(PassphraseSource::Direct(passphrase)),
        }
    }

    /// Resolve the configured passphrase, if any.
    pub fn resolve_passphrase(&self) -> Option<Secret> {
        self.passphrase.as_ref().and_then(|p| p.resolve())
    }
}
